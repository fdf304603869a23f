use crate::domain::models::{
    BlockChange, BlockPatch, BlockStatus, ChangeOperation, TaskEstimate, TaskStatus, TaskSummary,
    TimeBlock, UnscheduledTask,
};
use crate::domain::time::Interval;
use crate::infrastructure::block_store::{
    normalized_id, select_unscheduled, BlockStore, CHANGE_FEED_CAPACITY,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

const BLOCK_COLUMNS: &str = "b.id, b.task_id, t.name, t.status, t.area, b.scheduled_date,
     b.start_time, b.end_time, b.status, t.hours_projected, b.actual_duration_minutes, b.notes";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_block_id() -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("blk-{}-{sequence}", Utc::now().timestamp_micros())
}

struct BlockRow {
    id: String,
    task_id: String,
    task_name: String,
    task_status: String,
    area: String,
    scheduled_date: String,
    start_time: String,
    end_time: String,
    status: String,
    hours_projected: Option<f64>,
    actual_duration_minutes: Option<i32>,
    notes: Option<String>,
}

impl BlockRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            task_name: row.get(2)?,
            task_status: row.get(3)?,
            area: row.get(4)?,
            scheduled_date: row.get(5)?,
            start_time: row.get(6)?,
            end_time: row.get(7)?,
            status: row.get(8)?,
            hours_projected: row.get(9)?,
            actual_duration_minutes: row.get(10)?,
            notes: row.get(11)?,
        })
    }

    fn into_block(self) -> Result<TimeBlock, InfraError> {
        let task_status = TaskStatus::parse(&self.task_status).ok_or_else(|| {
            InfraError::InvalidConfig(format!("invalid tasks.status '{}'", self.task_status))
        })?;
        let status = BlockStatus::parse(&self.status).ok_or_else(|| {
            InfraError::InvalidConfig(format!("invalid time_blocks.status '{}'", self.status))
        })?;
        Ok(TimeBlock {
            id: self.id,
            task_id: self.task_id,
            task_name: self.task_name,
            task_status,
            area: self.area,
            scheduled_date: parse_date(&self.scheduled_date)?,
            start_time: self.start_time,
            end_time: self.end_time,
            status,
            hours_projected: self.hours_projected,
            actual_duration_minutes: self.actual_duration_minutes,
            notes: self.notes,
        })
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, InfraError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|error| InfraError::InvalidConfig(format!("invalid date '{value}': {error}")))
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone)]
pub struct SqliteBlockStore {
    db_path: PathBuf,
    changes: broadcast::Sender<BlockChange>,
}

impl SqliteBlockStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            changes,
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        let connection = Connection::open(&self.db_path)?;
        connection.pragma_update(None, "foreign_keys", "ON")?;
        Ok(connection)
    }

    pub fn upsert_task(&self, task: &TaskSummary) -> Result<(), InfraError> {
        task.validate().map_err(InfraError::InvalidConfig)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO tasks (id, name, area, status, due_date, hours_projected, hours_worked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               area = excluded.area,
               status = excluded.status,
               due_date = excluded.due_date,
               hours_projected = excluded.hours_projected,
               hours_worked = excluded.hours_worked,
               updated_at = CURRENT_TIMESTAMP",
            params![
                task.id.trim(),
                task.name.trim(),
                task.area,
                task.status.as_str(),
                task.due_date.map(format_date),
                task.hours_projected,
                task.hours_worked,
            ],
        )?;
        Ok(())
    }

    pub fn load_task(&self, task_id: &str) -> Result<Option<TaskSummary>, InfraError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                "SELECT id, name, area, status, due_date, hours_projected, hours_worked
                 FROM tasks WHERE id = ?1",
                params![task_id.trim()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                        row.get::<_, Option<f64>>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, name, area, status, due_date, hours_projected, hours_worked)) = row else {
            return Ok(None);
        };
        Ok(Some(TaskSummary {
            id,
            name,
            area,
            status: TaskStatus::parse(&status).ok_or_else(|| {
                InfraError::InvalidConfig(format!("invalid tasks.status '{status}'"))
            })?,
            due_date: due_date.as_deref().map(parse_date).transpose()?,
            hours_projected,
            hours_worked,
        }))
    }

    pub fn find_block(&self, block_id: &str) -> Result<Option<TimeBlock>, InfraError> {
        let connection = self.connect()?;
        Self::load_block(&connection, block_id.trim())
    }

    fn load_tasks(connection: &Connection) -> Result<Vec<TaskSummary>, InfraError> {
        let mut statement = connection.prepare(
            "SELECT id, name, area, status, due_date, hours_projected, hours_worked FROM tasks",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, Option<f64>>(6)?,
            ))
        })?;

        let mut tasks = Vec::new();
        for row in rows {
            let (id, name, area, status, due_date, hours_projected, hours_worked) = row?;
            let Some(status) = TaskStatus::parse(&status) else {
                log::warn!("skipping task {id} with unknown status '{status}'");
                continue;
            };
            tasks.push(TaskSummary {
                id,
                name,
                area,
                status,
                due_date: due_date.as_deref().map(parse_date).transpose()?,
                hours_projected,
                hours_worked,
            });
        }
        Ok(tasks)
    }

    fn load_block(
        connection: &Connection,
        block_id: &str,
    ) -> Result<Option<TimeBlock>, InfraError> {
        let sql = format!(
            "SELECT {BLOCK_COLUMNS} FROM time_blocks b JOIN tasks t ON t.id = b.task_id
             WHERE b.id = ?1"
        );
        let row = connection
            .query_row(&sql, params![block_id.trim()], BlockRow::from_row)
            .optional()?;
        row.map(BlockRow::into_block).transpose()
    }

    fn require_block(connection: &Connection, block_id: &str) -> Result<TimeBlock, InfraError> {
        Self::load_block(connection, block_id)?
            .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))
    }

    fn write_patch(
        connection: &Connection,
        block_id: &str,
        patch: &BlockPatch,
    ) -> Result<TimeBlock, InfraError> {
        let current = Self::require_block(connection, block_id)?;
        let updated = patch.apply_to(&current);
        updated.interval()?;
        connection.execute(
            "UPDATE time_blocks
             SET scheduled_date = ?2, start_time = ?3, end_time = ?4, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![
                current.id,
                format_date(updated.scheduled_date),
                updated.start_time,
                updated.end_time,
            ],
        )?;
        Ok(updated)
    }

    fn write_estimate(connection: &Connection, estimate: &TaskEstimate) -> Result<(), InfraError> {
        if estimate.hours_projected < 0.0 {
            return Err(InfraError::Persistence(
                "hours_projected must be >= 0".to_string(),
            ));
        }
        let changed = connection.execute(
            "UPDATE tasks SET hours_projected = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![estimate.task_id.trim(), estimate.hours_projected],
        )?;
        if changed == 0 {
            return Err(InfraError::NotFound(format!("task {}", estimate.task_id)));
        }
        Ok(())
    }

    fn publish(&self, operation: ChangeOperation, block: &TimeBlock) {
        let _ = self.changes.send(BlockChange {
            operation,
            block: block.clone(),
        });
    }
}

#[async_trait]
impl BlockStore for SqliteBlockStore {
    async fn fetch_blocks_for_date(&self, date: NaiveDate) -> Result<Vec<TimeBlock>, InfraError> {
        self.fetch_blocks_for_range(date, date).await
    }

    async fn fetch_blocks_for_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        let connection = self.connect()?;
        let sql = format!(
            "SELECT {BLOCK_COLUMNS} FROM time_blocks b JOIN tasks t ON t.id = b.task_id
             WHERE b.scheduled_date BETWEEN ?1 AND ?2
             ORDER BY b.scheduled_date, b.start_time, b.id"
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement.query_map(
            params![format_date(start), format_date(end)],
            BlockRow::from_row,
        )?;
        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?.into_block()?);
        }
        Ok(blocks)
    }

    async fn create_block(
        &self,
        task_id: &str,
        date: NaiveDate,
        interval: Interval,
    ) -> Result<TimeBlock, InfraError> {
        let task_id = normalized_id(task_id)
            .ok_or_else(|| InfraError::InvalidConfig("task id is required".to_string()))?;
        let connection = self.connect()?;
        let task_exists = connection
            .query_row("SELECT 1 FROM tasks WHERE id = ?1", params![task_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !task_exists {
            return Err(InfraError::NotFound(format!("task {task_id}")));
        }

        let block_id = next_block_id();
        connection.execute(
            "INSERT INTO time_blocks (id, task_id, scheduled_date, start_time, end_time, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                block_id,
                task_id,
                format_date(date),
                interval.start_time()?,
                interval.end_time()?,
                BlockStatus::Scheduled.as_str(),
            ],
        )?;
        let block = Self::require_block(&connection, &block_id)?;
        self.publish(ChangeOperation::Insert, &block);
        Ok(block)
    }

    async fn update_block(
        &self,
        block_id: &str,
        patch: &BlockPatch,
    ) -> Result<TimeBlock, InfraError> {
        let connection = self.connect()?;
        let updated = Self::write_patch(&connection, block_id, patch)?;
        self.publish(ChangeOperation::Update, &updated);
        Ok(updated)
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let block = Self::require_block(&connection, block_id)?;
        connection.execute("DELETE FROM time_blocks WHERE id = ?1", params![block.id])?;
        self.publish(ChangeOperation::Delete, &block);
        Ok(())
    }

    async fn update_task_estimate(&self, estimate: &TaskEstimate) -> Result<(), InfraError> {
        let connection = self.connect()?;
        Self::write_estimate(&connection, estimate)
    }

    async fn resize_block(
        &self,
        block_id: &str,
        patch: &BlockPatch,
        estimate: Option<&TaskEstimate>,
    ) -> Result<TimeBlock, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        Self::write_patch(&transaction, block_id, patch)?;
        if let Some(estimate) = estimate {
            Self::write_estimate(&transaction, estimate)?;
        }
        let resized = Self::require_block(&transaction, block_id)?;
        transaction.commit()?;
        self.publish(ChangeOperation::Update, &resized);
        Ok(resized)
    }

    async fn update_block_status(
        &self,
        block_id: &str,
        status: BlockStatus,
        actual_duration_minutes: Option<i32>,
    ) -> Result<TimeBlock, InfraError> {
        let connection = self.connect()?;
        let current = Self::require_block(&connection, block_id)?;
        connection.execute(
            "UPDATE time_blocks
             SET status = ?2,
                 actual_duration_minutes = COALESCE(?3, actual_duration_minutes),
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![current.id, status.as_str(), actual_duration_minutes],
        )?;
        let updated = Self::require_block(&connection, &current.id)?;
        self.publish(ChangeOperation::Update, &updated);
        Ok(updated)
    }

    async fn fetch_unscheduled_tasks(
        &self,
        area: Option<&str>,
    ) -> Result<Vec<UnscheduledTask>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare("SELECT DISTINCT task_id FROM time_blocks WHERE status != 'cancelled'")?;
        let scheduled = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        let tasks = Self::load_tasks(&connection)?;
        Ok(select_unscheduled(tasks, &scheduled, area))
    }

    fn subscribe(&self) -> broadcast::Receiver<BlockChange> {
        self.changes.subscribe()
    }
}
