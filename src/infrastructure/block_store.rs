use crate::domain::models::{
    BlockChange, BlockPatch, BlockStatus, ChangeOperation, TaskEstimate, TaskStatus, TaskSummary,
    TimeBlock, UnscheduledTask,
};
use crate::domain::time::Interval;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

pub const CHANGE_FEED_CAPACITY: usize = 256;

#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn fetch_blocks_for_date(&self, date: NaiveDate) -> Result<Vec<TimeBlock>, InfraError>;

    async fn fetch_blocks_for_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TimeBlock>, InfraError>;

    async fn create_block(
        &self,
        task_id: &str,
        date: NaiveDate,
        interval: Interval,
    ) -> Result<TimeBlock, InfraError>;

    async fn update_block(&self, block_id: &str, patch: &BlockPatch)
        -> Result<TimeBlock, InfraError>;

    async fn delete_block(&self, block_id: &str) -> Result<(), InfraError>;

    async fn update_task_estimate(&self, estimate: &TaskEstimate) -> Result<(), InfraError>;

    /// Time change plus projected-hours change. Either both land or neither.
    async fn resize_block(
        &self,
        block_id: &str,
        patch: &BlockPatch,
        estimate: Option<&TaskEstimate>,
    ) -> Result<TimeBlock, InfraError>;

    async fn update_block_status(
        &self,
        block_id: &str,
        status: BlockStatus,
        actual_duration_minutes: Option<i32>,
    ) -> Result<TimeBlock, InfraError>;

    async fn fetch_unscheduled_tasks(
        &self,
        area: Option<&str>,
    ) -> Result<Vec<UnscheduledTask>, InfraError>;

    fn subscribe(&self) -> broadcast::Receiver<BlockChange>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Create,
    Update,
    Delete,
    UpdateEstimate,
    UpdateStatus,
}

pub(crate) fn normalized_id(value: &str) -> Option<String> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return None;
    }
    Some(normalized.to_string())
}

pub(crate) fn select_unscheduled(
    tasks: impl IntoIterator<Item = TaskSummary>,
    scheduled_task_ids: &HashSet<String>,
    area: Option<&str>,
) -> Vec<UnscheduledTask> {
    let area = area.map(str::trim).filter(|value| !value.is_empty());
    let mut selected = tasks
        .into_iter()
        .filter(|task| task.status != TaskStatus::Done)
        .filter(|task| !scheduled_task_ids.contains(&task.id))
        .filter(|task| area.is_none_or(|area| task.area == area))
        .collect::<Vec<_>>();
    selected.sort_by(|left, right| {
        let left_due = left.due_date.unwrap_or(NaiveDate::MAX);
        let right_due = right.due_date.unwrap_or(NaiveDate::MAX);
        left_due.cmp(&right_due).then_with(|| left.name.cmp(&right.name))
    });
    selected.iter().map(UnscheduledTask::from).collect()
}

pub(crate) fn sort_blocks(blocks: &mut [TimeBlock]) {
    blocks.sort_by(|left, right| {
        left.scheduled_date
            .cmp(&right.scheduled_date)
            .then_with(|| left.start_time.cmp(&right.start_time))
            .then_with(|| left.id.cmp(&right.id))
    });
}

#[derive(Debug)]
pub struct InMemoryBlockStore {
    tasks: Mutex<HashMap<String, TaskSummary>>,
    blocks: Mutex<BTreeMap<String, TimeBlock>>,
    failing: Mutex<HashSet<StoreOperation>>,
    sequence: AtomicU64,
    changes: broadcast::Sender<BlockChange>,
}

impl Default for InMemoryBlockStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            tasks: Mutex::new(HashMap::new()),
            blocks: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(HashSet::new()),
            sequence: AtomicU64::new(0),
            changes,
        }
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, InfraError> {
    mutex
        .lock()
        .map_err(|error| InfraError::Persistence(format!("{name} lock poisoned: {error}")))
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = TaskSummary>) -> Self {
        let store = Self::default();
        if let Ok(mut stored) = store.tasks.lock() {
            stored.extend(tasks.into_iter().map(|task| (task.id.clone(), task)));
        }
        store
    }

    pub fn insert_block(&self, block: TimeBlock) -> Result<(), InfraError> {
        block.validate().map_err(InfraError::InvalidConfig)?;
        lock(&self.blocks, "block store")?.insert(block.id.clone(), block);
        Ok(())
    }

    pub fn task(&self, task_id: &str) -> Result<Option<TaskSummary>, InfraError> {
        Ok(lock(&self.tasks, "task store")?.get(task_id.trim()).cloned())
    }

    pub fn block(&self, block_id: &str) -> Result<Option<TimeBlock>, InfraError> {
        Ok(lock(&self.blocks, "block store")?.get(block_id.trim()).cloned())
    }

    pub fn fail_operation(&self, operation: StoreOperation) -> Result<(), InfraError> {
        lock(&self.failing, "failure script")?.insert(operation);
        Ok(())
    }

    pub fn clear_failures(&self) -> Result<(), InfraError> {
        lock(&self.failing, "failure script")?.clear();
        Ok(())
    }

    fn check_scripted_failure(&self, operation: StoreOperation) -> Result<(), InfraError> {
        if lock(&self.failing, "failure script")?.contains(&operation) {
            return Err(InfraError::Persistence(format!(
                "scripted failure for {operation:?}"
            )));
        }
        Ok(())
    }

    fn next_block_id(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("blk-{sequence}")
    }

    fn publish(&self, operation: ChangeOperation, block: &TimeBlock) {
        // Nobody listening is fine.
        let _ = self.changes.send(BlockChange {
            operation,
            block: block.clone(),
        });
    }
}

#[async_trait]
impl BlockStore for InMemoryBlockStore {
    async fn fetch_blocks_for_date(&self, date: NaiveDate) -> Result<Vec<TimeBlock>, InfraError> {
        self.fetch_blocks_for_range(date, date).await
    }

    async fn fetch_blocks_for_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        let blocks = lock(&self.blocks, "block store")?;
        let mut selected = blocks
            .values()
            .filter(|block| (start..=end).contains(&block.scheduled_date))
            .cloned()
            .collect::<Vec<_>>();
        sort_blocks(&mut selected);
        Ok(selected)
    }

    async fn create_block(
        &self,
        task_id: &str,
        date: NaiveDate,
        interval: Interval,
    ) -> Result<TimeBlock, InfraError> {
        self.check_scripted_failure(StoreOperation::Create)?;
        let task_id = normalized_id(task_id)
            .ok_or_else(|| InfraError::InvalidConfig("task id is required".to_string()))?;
        let task = self
            .task(&task_id)?
            .ok_or_else(|| InfraError::NotFound(format!("task {task_id}")))?;

        let block = TimeBlock {
            id: self.next_block_id(),
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            task_status: task.status,
            area: task.area.clone(),
            scheduled_date: date,
            start_time: interval.start_time()?,
            end_time: interval.end_time()?,
            status: BlockStatus::Scheduled,
            hours_projected: task.hours_projected,
            actual_duration_minutes: None,
            notes: None,
        };
        lock(&self.blocks, "block store")?.insert(block.id.clone(), block.clone());
        self.publish(ChangeOperation::Insert, &block);
        Ok(block)
    }

    async fn update_block(
        &self,
        block_id: &str,
        patch: &BlockPatch,
    ) -> Result<TimeBlock, InfraError> {
        self.check_scripted_failure(StoreOperation::Update)?;
        let updated = {
            let mut blocks = lock(&self.blocks, "block store")?;
            let current = blocks
                .get(block_id.trim())
                .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))?;
            let updated = patch.apply_to(current);
            updated.interval()?;
            blocks.insert(updated.id.clone(), updated.clone());
            updated
        };
        self.publish(ChangeOperation::Update, &updated);
        Ok(updated)
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), InfraError> {
        self.check_scripted_failure(StoreOperation::Delete)?;
        let removed = lock(&self.blocks, "block store")?.remove(block_id.trim());
        match removed {
            Some(block) => {
                self.publish(ChangeOperation::Delete, &block);
                Ok(())
            }
            None => Err(InfraError::NotFound(format!("block {block_id}"))),
        }
    }

    async fn update_task_estimate(&self, estimate: &TaskEstimate) -> Result<(), InfraError> {
        self.check_scripted_failure(StoreOperation::UpdateEstimate)?;
        if estimate.hours_projected < 0.0 {
            return Err(InfraError::Persistence(
                "hours_projected must be >= 0".to_string(),
            ));
        }
        let mut tasks = lock(&self.tasks, "task store")?;
        let task = tasks
            .get_mut(estimate.task_id.trim())
            .ok_or_else(|| InfraError::NotFound(format!("task {}", estimate.task_id)))?;
        task.hours_projected = Some(estimate.hours_projected);

        let mut blocks = lock(&self.blocks, "block store")?;
        for block in blocks.values_mut().filter(|block| block.task_id == task.id) {
            block.hours_projected = Some(estimate.hours_projected);
        }
        Ok(())
    }

    async fn resize_block(
        &self,
        block_id: &str,
        patch: &BlockPatch,
        estimate: Option<&TaskEstimate>,
    ) -> Result<TimeBlock, InfraError> {
        self.check_scripted_failure(StoreOperation::Update)?;
        if estimate.is_some() {
            self.check_scripted_failure(StoreOperation::UpdateEstimate)?;
        }

        let resized = {
            let mut tasks = lock(&self.tasks, "task store")?;
            let mut blocks = lock(&self.blocks, "block store")?;
            let current = blocks
                .get(block_id.trim())
                .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))?;
            let mut resized = patch.apply_to(current);
            resized.interval()?;

            if let Some(estimate) = estimate {
                if estimate.hours_projected < 0.0 {
                    return Err(InfraError::Persistence(
                        "hours_projected must be >= 0".to_string(),
                    ));
                }
                let task = tasks
                    .get_mut(estimate.task_id.trim())
                    .ok_or_else(|| InfraError::NotFound(format!("task {}", estimate.task_id)))?;
                task.hours_projected = Some(estimate.hours_projected);
                for block in blocks.values_mut().filter(|block| block.task_id == task.id) {
                    block.hours_projected = Some(estimate.hours_projected);
                }
                resized.hours_projected = Some(estimate.hours_projected);
            }

            blocks.insert(resized.id.clone(), resized.clone());
            resized
        };
        self.publish(ChangeOperation::Update, &resized);
        Ok(resized)
    }

    async fn update_block_status(
        &self,
        block_id: &str,
        status: BlockStatus,
        actual_duration_minutes: Option<i32>,
    ) -> Result<TimeBlock, InfraError> {
        self.check_scripted_failure(StoreOperation::UpdateStatus)?;
        let updated = {
            let mut blocks = lock(&self.blocks, "block store")?;
            let block = blocks
                .get_mut(block_id.trim())
                .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))?;
            block.status = status;
            if actual_duration_minutes.is_some() {
                block.actual_duration_minutes = actual_duration_minutes;
            }
            block.clone()
        };
        self.publish(ChangeOperation::Update, &updated);
        Ok(updated)
    }

    async fn fetch_unscheduled_tasks(
        &self,
        area: Option<&str>,
    ) -> Result<Vec<UnscheduledTask>, InfraError> {
        let scheduled = lock(&self.blocks, "block store")?
            .values()
            .filter(|block| block.status != BlockStatus::Cancelled)
            .map(|block| block.task_id.clone())
            .collect::<HashSet<_>>();
        let tasks = lock(&self.tasks, "task store")?
            .values()
            .cloned()
            .collect::<Vec<_>>();
        Ok(select_unscheduled(tasks, &scheduled, area))
    }

    fn subscribe(&self) -> broadcast::Receiver<BlockChange> {
        self.changes.subscribe()
    }
}
