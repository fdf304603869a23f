use crate::domain::time::{Interval, TimeError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const FALLBACK_AREA_COLOR: &str = "#6b7280";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl BlockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(Self::Scheduled),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "Not started")]
    NotStarted,
    #[serde(rename = "In progress")]
    InProgress,
    #[serde(rename = "Done")]
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::InProgress => "In progress",
            Self::Done => "Done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "not started" | "not_started" => Some(Self::NotStarted),
            "in progress" | "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

pub fn area_color(area: &str) -> &'static str {
    match area.trim() {
        "Full Stack" => "#10b981",
        "Huge Capital" => "#a855f7",
        "S4" => "#3b82f6",
        "808" => "#eab308",
        "Personal" => "#ec4899",
        "Golf" => "#f97316",
        "Health" => "#14b8a6",
        _ => FALLBACK_AREA_COLOR,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeBlock {
    #[serde(rename = "block_id")]
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    pub task_status: TaskStatus,
    pub area: String,
    pub scheduled_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub status: BlockStatus,
    #[serde(default)]
    pub hours_projected: Option<f64>,
    #[serde(default)]
    pub actual_duration_minutes: Option<i32>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TimeBlock {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "block.id")?;
        validate_non_empty(&self.task_id, "block.task_id")?;
        self.interval()
            .map_err(|_| "block.end_time must be after block.start_time".to_string())?;
        if let Some(hours) = self.hours_projected {
            if hours < 0.0 {
                return Err("block.hours_projected must be >= 0".to_string());
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Result<Interval, TimeError> {
        Interval::parse(&self.start_time, &self.end_time)
    }

    pub fn planned_duration_minutes(&self) -> Result<i32, TimeError> {
        self.interval().map(|interval| interval.duration())
    }

    pub fn is_completed(&self) -> bool {
        self.status == BlockStatus::Completed || self.task_status == TaskStatus::Done
    }

    pub fn with_interval(&self, interval: Interval) -> Result<Self, TimeError> {
        let mut block = self.clone();
        block.start_time = interval.start_time()?;
        block.end_time = interval.end_time()?;
        Ok(block)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub id: String,
    pub name: String,
    pub area: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub hours_projected: Option<f64>,
    #[serde(default)]
    pub hours_worked: Option<f64>,
}

impl TaskSummary {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.name, "task.name")?;
        Ok(())
    }

    pub fn hours_remaining(&self) -> f64 {
        let projected = self.hours_projected.unwrap_or(0.0);
        let worked = self.hours_worked.unwrap_or(0.0);
        (projected - worked).max(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnscheduledTask {
    pub task_id: String,
    pub task_name: String,
    pub area: String,
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
    pub hours_projected: f64,
    pub hours_worked: f64,
    pub hours_remaining: f64,
}

impl From<&TaskSummary> for UnscheduledTask {
    fn from(task: &TaskSummary) -> Self {
        Self {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            area: task.area.clone(),
            status: task.status,
            due_date: task.due_date,
            hours_projected: task.hours_projected.unwrap_or(0.0),
            hours_worked: task.hours_worked.unwrap_or(0.0),
            hours_remaining: task.hours_remaining(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(rename = "scheduled_date", skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl BlockPatch {
    pub fn is_empty(&self) -> bool {
        self.start_time.is_none() && self.end_time.is_none() && self.date.is_none()
    }

    pub fn apply_to(&self, block: &TimeBlock) -> TimeBlock {
        let mut updated = block.clone();
        if let Some(start) = &self.start_time {
            updated.start_time = start.clone();
        }
        if let Some(end) = &self.end_time {
            updated.end_time = end.clone();
        }
        if let Some(date) = self.date {
            updated.scheduled_date = date;
        }
        updated
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEstimate {
    pub task_id: String,
    pub hours_projected: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockChange {
    pub operation: ChangeOperation,
    pub block: TimeBlock,
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
