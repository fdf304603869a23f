use crate::domain::models::{area_color, TimeBlock};
use crate::domain::time::{Interval, TimeError, TimeGrid};
use serde::Serialize;
use std::collections::HashMap;

pub const Z_INDEX_FLOOR: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BlockPosition {
    pub top: f64,
    pub height: f64,
}

impl BlockPosition {
    pub fn to_pixels(self, grid: &TimeGrid) -> (f64, f64) {
        (self.top * grid.pixels_per_hour, self.height * grid.pixels_per_hour)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockGeometry {
    pub block_id: String,
    pub top_px: f64,
    pub height_px: f64,
    pub z_index: i32,
    pub color: &'static str,
    pub dimmed: bool,
}

pub fn position_of(interval: Interval, grid: &TimeGrid) -> BlockPosition {
    BlockPosition {
        top: f64::from(grid.minutes_from_anchor(interval.start)) / 60.0,
        height: f64::from(interval.duration()) / 60.0,
    }
}

pub fn block_position(block: &TimeBlock, grid: &TimeGrid) -> Result<BlockPosition, TimeError> {
    Ok(position_of(block.interval()?, grid))
}

/// z-index per block id: earlier starts stack above later ones.
pub fn stack_order(blocks: &[TimeBlock]) -> HashMap<String, i32> {
    let mut ordered = blocks
        .iter()
        .map(|block| {
            let start = block.interval().map(|interval| interval.start).unwrap_or(i32::MAX);
            (start, block.id.as_str())
        })
        .collect::<Vec<_>>();
    ordered.sort_by_key(|(start, _)| *start);

    let count = ordered.len() as i32;
    ordered
        .into_iter()
        .enumerate()
        .map(|(index, (_, id))| (id.to_string(), count - index as i32 + Z_INDEX_FLOOR))
        .collect()
}

pub fn layout_blocks(blocks: &[TimeBlock], grid: &TimeGrid) -> Vec<BlockGeometry> {
    let z_order = stack_order(blocks);
    blocks
        .iter()
        .filter_map(|block| {
            let position = match block_position(block, grid) {
                Ok(position) => position,
                Err(error) => {
                    log::warn!("skipping block {} with unusable times: {error}", block.id);
                    return None;
                }
            };
            let (top_px, height_px) = position.to_pixels(grid);
            Some(BlockGeometry {
                block_id: block.id.clone(),
                top_px,
                height_px,
                z_index: z_order.get(&block.id).copied().unwrap_or(Z_INDEX_FLOOR),
                color: area_color(&block.area),
                dimmed: block.is_completed(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BlockStatus, TaskStatus};
    use crate::domain::time::minutes_to_time;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn block(id: &str, start: i32, end: i32) -> TimeBlock {
        TimeBlock {
            id: id.to_string(),
            task_id: format!("task-{id}"),
            task_name: format!("Task {id}"),
            task_status: TaskStatus::NotStarted,
            area: "Full Stack".to_string(),
            scheduled_date: NaiveDate::from_ymd_opt(2024, 6, 10).expect("valid date"),
            start_time: minutes_to_time(start).expect("start"),
            end_time: minutes_to_time(end).expect("end"),
            status: BlockStatus::Scheduled,
            hours_projected: None,
            actual_duration_minutes: None,
            notes: None,
        }
    }

    #[test]
    fn position_is_relative_to_anchor() {
        let grid = TimeGrid::default();
        let position = block_position(&block("a", 9 * 60, 10 * 60 + 30), &grid).expect("position");
        assert_eq!(position, BlockPosition { top: 3.0, height: 1.5 });
        assert_eq!(position.to_pixels(&grid), (192.0, 96.0));

        let late_night = block_position(&block("b", 60, 120), &grid).expect("position");
        assert_eq!(late_night.top, 19.0);
    }

    #[test]
    fn earliest_block_stacks_highest() {
        let blocks = vec![
            block("noon", 12 * 60, 13 * 60),
            block("nine", 9 * 60, 10 * 60),
            block("ten", 10 * 60, 11 * 60),
        ];
        let z = stack_order(&blocks);
        assert_eq!(z["nine"], 13);
        assert_eq!(z["ten"], 12);
        assert_eq!(z["noon"], 11);
        assert!(z.values().all(|value| *value > Z_INDEX_FLOOR));
    }

    #[test]
    fn ties_keep_input_order() {
        let blocks = vec![block("first", 9 * 60, 10 * 60), block("second", 9 * 60, 9 * 60 + 30)];
        let z = stack_order(&blocks);
        assert!(z["first"] > z["second"]);
    }

    #[test]
    fn layout_colors_and_dims() {
        let mut done = block("done", 9 * 60, 10 * 60);
        done.status = BlockStatus::Completed;
        let mut unknown_area = block("other", 10 * 60, 11 * 60);
        unknown_area.area = "Chess".to_string();
        let mut broken = block("broken", 11 * 60, 12 * 60);
        broken.start_time = "noon".to_string();
        let input = vec![done, unknown_area, broken];

        let geometry = layout_blocks(&input, &TimeGrid::default());
        assert_eq!(geometry.len(), 2);
        assert_eq!(geometry[0].color, "#10b981");
        assert!(geometry[0].dimmed);
        assert_eq!(geometry[1].color, "#6b7280");
        assert!(!geometry[1].dimmed);
    }

    #[test]
    fn layout_does_not_mutate_input() {
        let blocks = vec![block("b", 10 * 60, 11 * 60), block("a", 9 * 60, 10 * 60)];
        let before = blocks.clone();
        let _ = layout_blocks(&blocks, &TimeGrid::default());
        assert_eq!(blocks, before);
    }

    // Feature: timegrid, Property 7: stacking is independent of input order
    proptest! {
        #[test]
        fn property7_stacking_determinism(
            starts in proptest::collection::btree_set(0i32..90, 1..12),
            seed in any::<u64>(),
        ) {
            let blocks = starts
                .iter()
                .map(|slot| block(&format!("b{slot}"), slot * 15, slot * 15 + 15))
                .collect::<Vec<_>>();
            let mut shuffled = blocks.clone();
            let len = shuffled.len();
            shuffled.rotate_left(seed as usize % len);
            if seed % 2 == 0 {
                shuffled.reverse();
            }

            prop_assert_eq!(stack_order(&blocks), stack_order(&shuffled));
        }
    }
}
