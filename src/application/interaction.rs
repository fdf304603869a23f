use crate::domain::models::{BlockPatch, TaskEstimate, TimeBlock, UnscheduledTask};
use crate::domain::time::{Interval, TimeError, TimeGrid};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InteractionError {
    #[error("a gesture on block {0} is already in progress")]
    GestureInProgress(String),
    #[error("unknown block: {0}")]
    UnknownBlock(String),
    #[error(transparent)]
    Time(#[from] TimeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragEdge {
    Top,
    Bottom,
    Whole,
}

impl DragEdge {
    pub fn is_resize(self) -> bool {
        matches!(self, Self::Top | Self::Bottom)
    }
}

pub struct PointerCapture {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl PointerCapture {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn detached() -> Self {
        Self { release: None }
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for PointerCapture {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for PointerCapture {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PointerCapture")
            .field("held", &self.release.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct ActiveGesture {
    pub block: TimeBlock,
    pub edge: DragEdge,
    pub original: Interval,
    pub anchor_y: f64,
    pub last_y: f64,
    pub preview: Interval,
    pub target_date: NaiveDate,
    capture: PointerCapture,
}

#[derive(Debug, Default)]
pub enum GestureState {
    #[default]
    Idle,
    Dragging(ActiveGesture),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub block_id: String,
    pub edge: DragEdge,
    pub original: TimeBlock,
    pub updated: TimeBlock,
    pub patch: BlockPatch,
    pub estimate: Option<TaskEstimate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutcome {
    Unchanged { block_id: String },
    Commit(SaveRequest),
}

#[derive(Debug, Default)]
pub struct DragController {
    grid: TimeGrid,
    state: GestureState,
}

impl DragController {
    pub fn new(grid: TimeGrid) -> Self {
        Self {
            grid,
            state: GestureState::Idle,
        }
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, GestureState::Idle)
    }

    pub fn active(&self) -> Option<&ActiveGesture> {
        match &self.state {
            GestureState::Dragging(gesture) => Some(gesture),
            GestureState::Idle => None,
        }
    }

    pub fn begin(
        &mut self,
        block: &TimeBlock,
        edge: DragEdge,
        pointer_y: f64,
        capture: PointerCapture,
    ) -> Result<(), InteractionError> {
        if let Some(active) = self.active() {
            // `capture` drops here and releases its listeners.
            return Err(InteractionError::GestureInProgress(active.block.id.clone()));
        }
        let original = block.interval()?;
        self.state = GestureState::Dragging(ActiveGesture {
            block: block.clone(),
            edge,
            original,
            anchor_y: pointer_y,
            last_y: pointer_y,
            preview: original,
            target_date: block.scheduled_date,
            capture,
        });
        Ok(())
    }

    pub fn pointer_move(&mut self, pointer_y: f64) -> Option<Interval> {
        let grid = self.grid;
        let GestureState::Dragging(gesture) = &mut self.state else {
            return None;
        };
        gesture.last_y = pointer_y;
        let delta = grid.snap_pixel_delta(pointer_y - gesture.anchor_y);
        gesture.preview = apply_delta(gesture.edge, gesture.original, delta, &grid);
        Some(gesture.preview)
    }

    pub fn hover_date(&mut self, date: NaiveDate) -> bool {
        match &mut self.state {
            GestureState::Dragging(gesture) if gesture.edge == DragEdge::Whole => {
                gesture.target_date = date;
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self, pointer_y: f64) -> Option<GestureOutcome> {
        self.pointer_move(pointer_y)?;
        self.complete()
    }

    pub fn capture_lost(&mut self) -> Option<GestureOutcome> {
        let last_y = self.active()?.last_y;
        self.finish(last_y)
    }

    fn complete(&mut self) -> Option<GestureOutcome> {
        let GestureState::Dragging(gesture) = std::mem::take(&mut self.state) else {
            return None;
        };
        let ActiveGesture {
            block,
            edge,
            original,
            preview,
            target_date,
            capture,
            ..
        } = gesture;
        capture.release();

        if preview == original && target_date == block.scheduled_date {
            return Some(GestureOutcome::Unchanged { block_id: block.id });
        }

        match build_save_request(&block, edge, original, preview, target_date) {
            Ok(request) => Some(GestureOutcome::Commit(request)),
            Err(error) => {
                log::error!("dropping gesture on block {}: {error}", block.id);
                Some(GestureOutcome::Unchanged { block_id: block.id })
            }
        }
    }
}

/// Applies a snapped minute delta to one edge of `original`, clamped so the
/// result never crosses the grid top or midnight and never shrinks below one
/// grid unit.
pub fn apply_delta(edge: DragEdge, original: Interval, delta: i32, grid: &TimeGrid) -> Interval {
    let min_duration = grid.min_duration();
    let (floor, ceiling) = editable_bounds(original, grid);
    let shrinkable = original.duration() >= min_duration;

    let (start, end) = match edge {
        DragEdge::Whole => {
            let lowest = floor - original.start;
            let highest = (ceiling - original.end).max(lowest);
            let clamped = delta.max(lowest).min(highest);
            if clamped != delta {
                log::debug!("move delta {delta} clamped to {clamped}");
            }
            (original.start + clamped, original.end + clamped)
        }
        DragEdge::Top => {
            let highest = if shrinkable {
                original.end - min_duration
            } else {
                original.start
            };
            let start = (original.start + delta).max(floor).min(highest);
            (start, original.end)
        }
        DragEdge::Bottom => {
            let lowest = if shrinkable {
                original.start + min_duration
            } else {
                original.end
            };
            let end = (original.end + delta).min(ceiling).max(lowest);
            (original.start, end)
        }
    };

    Interval::new(start, end).unwrap_or(original)
}

// Daytime blocks live between the anchor and the last line before midnight;
// late-night blocks between midnight and the anchor.
fn editable_bounds(original: Interval, grid: &TimeGrid) -> (i32, i32) {
    let anchor = grid.anchor_minutes.clamp(0, grid.latest_end());
    let (floor, ceiling) = if original.start >= anchor {
        (anchor, grid.latest_end())
    } else {
        (0, anchor)
    };
    (floor.min(original.start), ceiling.max(original.end))
}

pub fn projected_hours_after_resize(
    original_hours: Option<f64>,
    before: Interval,
    after: Interval,
) -> f64 {
    let change = f64::from(after.duration() - before.duration()) / 60.0;
    (original_hours.unwrap_or(0.0) + change).max(0.0)
}

fn build_save_request(
    block: &TimeBlock,
    edge: DragEdge,
    original: Interval,
    preview: Interval,
    target_date: NaiveDate,
) -> Result<SaveRequest, TimeError> {
    let mut patch = BlockPatch::default();
    if preview.start != original.start {
        patch.start_time = Some(preview.start_time()?);
    }
    if preview.end != original.end {
        patch.end_time = Some(preview.end_time()?);
    }
    if target_date != block.scheduled_date {
        patch.date = Some(target_date);
    }

    let estimate = (edge.is_resize() && preview.duration() != original.duration()).then(|| {
        TaskEstimate {
            task_id: block.task_id.clone(),
            hours_projected: projected_hours_after_resize(block.hours_projected, original, preview),
        }
    });

    let mut updated = patch.apply_to(block);
    if let Some(estimate) = &estimate {
        updated.hours_projected = Some(estimate.hours_projected);
    }

    Ok(SaveRequest {
        block_id: block.id.clone(),
        edge,
        original: block.clone(),
        updated,
        patch,
        estimate,
    })
}

pub fn drop_duration_minutes(
    task: Option<&UnscheduledTask>,
    default_minutes: i32,
    max_minutes: i32,
) -> i32 {
    let remaining_minutes = task
        .map(|task| (task.hours_remaining * 60.0).round() as i32)
        .filter(|minutes| *minutes > 0);
    match remaining_minutes {
        Some(minutes) => minutes.min(max_minutes),
        None => default_minutes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BlockStatus, TaskStatus};
    use crate::domain::time::minutes_to_time;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PX_PER_MINUTE: f64 = 64.0 / 60.0;

    fn block(start: i32, end: i32) -> TimeBlock {
        TimeBlock {
            id: "blk-1".to_string(),
            task_id: "tsk-1".to_string(),
            task_name: "Focus".to_string(),
            task_status: TaskStatus::InProgress,
            area: "S4".to_string(),
            scheduled_date: NaiveDate::from_ymd_opt(2024, 6, 10).expect("valid date"),
            start_time: minutes_to_time(start).expect("start"),
            end_time: minutes_to_time(end).expect("end"),
            status: BlockStatus::Scheduled,
            hours_projected: Some(2.0),
            actual_duration_minutes: None,
            notes: None,
        }
    }

    fn counting_capture() -> (PointerCapture, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let capture = PointerCapture::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (capture, released)
    }

    fn commit(outcome: Option<GestureOutcome>) -> SaveRequest {
        match outcome {
            Some(GestureOutcome::Commit(request)) => request,
            other => panic!("expected commit, got {other:?}"),
        }
    }

    // Feature: timegrid, Property 8: 47 minutes of drag snaps to 45
    #[test]
    fn property8_drag_down_47_minutes() {
        let mut controller = DragController::default();
        controller
            .begin(&block(540, 600), DragEdge::Whole, 100.0, PointerCapture::detached())
            .expect("begin");

        let preview = controller.pointer_move(100.0 + 47.0 * PX_PER_MINUTE).expect("preview");
        assert_eq!(preview, Interval { start: 585, end: 645 });

        let request = commit(controller.finish(100.0 + 47.0 * PX_PER_MINUTE));
        assert_eq!(request.patch.start_time.as_deref(), Some("09:45:00"));
        assert_eq!(request.patch.end_time.as_deref(), Some("10:45:00"));
        assert_eq!(request.patch.date, None);
        assert_eq!(request.estimate, None);
        assert!(controller.is_idle());
    }

    #[test]
    fn unchanged_release_is_a_no_op() {
        let mut controller = DragController::default();
        controller
            .begin(&block(540, 600), DragEdge::Bottom, 10.0, PointerCapture::detached())
            .expect("begin");
        let outcome = controller.finish(10.0 + 5.0 * PX_PER_MINUTE);
        assert_eq!(
            outcome,
            Some(GestureOutcome::Unchanged { block_id: "blk-1".to_string() })
        );
    }

    #[test]
    fn only_one_gesture_at_a_time() {
        let mut controller = DragController::default();
        let (first, first_released) = counting_capture();
        let (second, second_released) = counting_capture();
        controller.begin(&block(540, 600), DragEdge::Top, 0.0, first).expect("begin");

        let error = controller
            .begin(&block(540, 600), DragEdge::Whole, 0.0, second)
            .expect_err("second gesture");
        assert_eq!(error, InteractionError::GestureInProgress("blk-1".to_string()));
        assert_eq!(second_released.load(Ordering::SeqCst), 1);
        assert_eq!(first_released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn capture_released_once_on_every_exit() {
        let mut controller = DragController::default();
        let (capture, released) = counting_capture();
        controller.begin(&block(540, 600), DragEdge::Whole, 0.0, capture).expect("begin");
        controller.finish(30.0);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let (capture, released) = counting_capture();
        controller.begin(&block(540, 600), DragEdge::Whole, 0.0, capture).expect("begin");
        drop(controller);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn capture_loss_commits_last_known_position() {
        let mut controller = DragController::default();
        let (capture, released) = counting_capture();
        controller.begin(&block(540, 600), DragEdge::Whole, 0.0, capture).expect("begin");
        controller.pointer_move(64.0);

        let request = commit(controller.capture_lost());
        assert_eq!(request.updated.start_time, "10:00:00");
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(controller.capture_lost().is_none());
    }

    #[test]
    fn resize_proposes_projected_hours() {
        let mut controller = DragController::default();
        controller
            .begin(&block(540, 600), DragEdge::Bottom, 0.0, PointerCapture::detached())
            .expect("begin");
        let request = commit(controller.finish(32.0));
        assert_eq!(request.patch.end_time.as_deref(), Some("10:30:00"));
        assert_eq!(request.patch.start_time, None);
        assert_eq!(
            request.estimate,
            Some(TaskEstimate { task_id: "tsk-1".to_string(), hours_projected: 2.5 })
        );
    }

    #[test]
    fn shrinking_below_zero_projection_floors_at_zero() {
        let before = Interval { start: 540, end: 720 };
        let after = Interval { start: 540, end: 555 };
        assert_eq!(projected_hours_after_resize(Some(1.0), before, after), 0.0);
        let longer = Interval { start: 540, end: 780 };
        assert_eq!(projected_hours_after_resize(None, before, longer), 1.0);
    }

    #[test]
    fn whole_move_across_columns_changes_date_only() {
        let mut controller = DragController::default();
        controller
            .begin(&block(540, 600), DragEdge::Whole, 0.0, PointerCapture::detached())
            .expect("begin");
        let next_day = NaiveDate::from_ymd_opt(2024, 6, 11).expect("valid date");
        assert!(controller.hover_date(next_day));

        let request = commit(controller.finish(0.0));
        assert_eq!(request.patch.date, Some(next_day));
        assert_eq!(request.patch.start_time, None);
        assert_eq!(request.updated.scheduled_date, next_day);
    }

    #[test]
    fn resize_ignores_column_changes() {
        let mut controller = DragController::default();
        controller
            .begin(&block(540, 600), DragEdge::Top, 0.0, PointerCapture::detached())
            .expect("begin");
        assert!(!controller.hover_date(NaiveDate::from_ymd_opt(2024, 6, 11).expect("valid date")));
    }

    #[test]
    fn moves_stay_inside_the_day() {
        let grid = TimeGrid::default();
        let early = Interval { start: 30, end: 90 };
        assert_eq!(
            apply_delta(DragEdge::Whole, early, -120, &grid),
            Interval { start: 0, end: 60 }
        );
        let late = Interval { start: 22 * 60, end: 23 * 60 };
        assert_eq!(
            apply_delta(DragEdge::Whole, late, 180, &grid),
            Interval { start: 22 * 60 + 45, end: 23 * 60 + 45 }
        );
    }

    #[test]
    fn upward_drag_stops_at_the_grid_top() {
        let grid = TimeGrid::default();
        let mut controller = DragController::default();
        controller
            .begin(&block(375, 435), DragEdge::Whole, 16.0, PointerCapture::detached())
            .expect("begin");
        let preview = controller.pointer_move(16.0 - 64.0).expect("preview");
        assert_eq!(preview, Interval { start: 360, end: 420 });
        assert_eq!(grid.minutes_from_anchor(preview.start), 0);

        let top = apply_delta(DragEdge::Top, Interval { start: 375, end: 435 }, -120, &grid);
        assert_eq!(top, Interval { start: 360, end: 435 });
    }

    #[test]
    fn late_night_blocks_stay_below_the_grid_top() {
        let grid = TimeGrid::default();
        let night = Interval { start: 4 * 60, end: 5 * 60 };
        assert_eq!(
            apply_delta(DragEdge::Whole, night, 120, &grid),
            Interval { start: 5 * 60, end: 6 * 60 }
        );
        assert_eq!(
            apply_delta(DragEdge::Bottom, night, 120, &grid),
            Interval { start: 4 * 60, end: 6 * 60 }
        );
    }

    #[test]
    fn drop_duration_uses_remaining_hours_with_cap() {
        let mut task = UnscheduledTask {
            task_id: "t".to_string(),
            task_name: "T".to_string(),
            area: "S4".to_string(),
            status: TaskStatus::NotStarted,
            due_date: None,
            hours_projected: 2.0,
            hours_worked: 0.5,
            hours_remaining: 1.5,
        };
        assert_eq!(drop_duration_minutes(Some(&task), 60, 240), 90);
        task.hours_remaining = 6.0;
        assert_eq!(drop_duration_minutes(Some(&task), 60, 240), 240);
        task.hours_remaining = 0.0;
        assert_eq!(drop_duration_minutes(Some(&task), 60, 240), 60);
        assert_eq!(drop_duration_minutes(None, 60, 240), 60);
    }

    // Feature: timegrid, Property 3: whole-block moves keep the duration
    proptest! {
        #[test]
        fn property3_move_keeps_duration(
            slot in 0i32..80,
            length in 1i32..16,
            pixels in -2000.0f64..2000.0,
        ) {
            let original = Interval::new(slot * 15, slot * 15 + length * 15).expect("interval");
            let mut controller = DragController::default();
            let mut source = block(original.start, original.end);
            source.hours_projected = None;
            controller
                .begin(&source, DragEdge::Whole, 0.0, PointerCapture::detached())
                .expect("begin");
            let preview = controller.pointer_move(pixels).expect("preview");
            let grid = TimeGrid::default();
            prop_assert_eq!(preview.duration(), original.duration());
            prop_assert!(preview.start >= 0);
            prop_assert!(preview.end <= grid.latest_end());
            if original.start >= grid.anchor_minutes {
                prop_assert!(preview.start >= grid.anchor_minutes);
            } else if original.end <= grid.anchor_minutes {
                prop_assert!(preview.end <= grid.anchor_minutes);
            }
        }
    }

    // Feature: timegrid, Property 4: resize clamps at one grid unit
    proptest! {
        #[test]
        fn property4_resize_minimum(
            slot in 0i32..80,
            length in 1i32..16,
            pixels in -3000.0f64..3000.0,
            top in any::<bool>(),
        ) {
            let grid = TimeGrid::default();
            let original = Interval::new(slot * 15, slot * 15 + length * 15).expect("interval");
            let edge = if top { DragEdge::Top } else { DragEdge::Bottom };
            let delta = grid.snap_pixel_delta(pixels);
            let resized = apply_delta(edge, original, delta, &grid);
            prop_assert!(resized.duration() >= grid.snap_minutes);
            prop_assert!(resized.start < resized.end);
        }
    }

    // Feature: timegrid, Property 9: a one-unit block cannot be bottom-resized upward
    proptest! {
        #[test]
        fn property9_bottom_resize_upward_is_clamped(pixels in 0.0f64..5000.0) {
            let mut controller = DragController::default();
            controller
                .begin(&block(540, 555), DragEdge::Bottom, 5000.0, PointerCapture::detached())
                .expect("begin");
            let preview = controller.pointer_move(5000.0 - pixels).expect("preview");
            prop_assert_eq!(preview, Interval { start: 540, end: 555 });
        }
    }
}
