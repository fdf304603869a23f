use crate::domain::models::{BlockStatus, TimeBlock};
use crate::domain::time::Interval;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub block_id: String,
    pub task_name: String,
    pub start_time: String,
    pub end_time: String,
}

/// Blocks on `date` whose interval overlaps `candidate`, ordered by start.
pub fn find_conflicts(
    candidate: Interval,
    date: NaiveDate,
    blocks: &[TimeBlock],
    exclude_id: Option<&str>,
) -> Vec<ConflictEntry> {
    let mut hits = blocks
        .iter()
        .filter(|block| block.scheduled_date == date)
        .filter(|block| block.status != BlockStatus::Cancelled)
        .filter(|block| exclude_id != Some(block.id.as_str()))
        .filter_map(|block| match block.interval() {
            Ok(interval) => candidate.overlaps(&interval).then_some((interval.start, block)),
            Err(error) => {
                log::warn!("skipping block {} in conflict check: {error}", block.id);
                None
            }
        })
        .collect::<Vec<_>>();
    hits.sort_by_key(|(start, _)| *start);

    hits.into_iter()
        .map(|(_, block)| ConflictEntry {
            block_id: block.id.clone(),
            task_name: block.task_name.clone(),
            start_time: block.start_time.clone(),
            end_time: block.end_time.clone(),
        })
        .collect()
}

pub fn has_conflicts(
    candidate: Interval,
    date: NaiveDate,
    blocks: &[TimeBlock],
    exclude_id: Option<&str>,
) -> bool {
    !find_conflicts(candidate, date, blocks, exclude_id).is_empty()
}
