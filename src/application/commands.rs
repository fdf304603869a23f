use crate::application::bootstrap::bootstrap_workspace;
use crate::application::interaction::drop_duration_minutes;
use crate::application::schedule_view::{summarize_week, DaySummary, ViewSettings};
use crate::domain::calendar::{week_start, LocalCalendar, NowProvider};
use crate::domain::conflicts::{find_conflicts, ConflictEntry};
use crate::domain::models::{
    BlockPatch, BlockStatus, TaskEstimate, TaskSummary, TimeBlock, UnscheduledTask,
};
use crate::domain::time::{time_to_minutes, Interval, DAY_MINUTES};
use crate::infrastructure::block_store::BlockStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::sqlite_block_store::SqliteBlockStore;
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    store: Arc<SqliteBlockStore>,
    calendar: LocalCalendar,
    settings: ViewSettings,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Ok(Self {
            config_dir: bootstrap.config_dir,
            logs_dir: workspace_root.join("logs"),
            store: Arc::new(SqliteBlockStore::new(&bootstrap.database_path)),
            database_path: bootstrap.database_path,
            calendar: LocalCalendar::new(bootstrap.timezone),
            settings: bootstrap.settings,
            log_guard: Mutex::new(()),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.calendar = self.calendar.with_now_provider(now_provider);
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn store(&self) -> Arc<SqliteBlockStore> {
        Arc::clone(&self.store)
    }

    pub fn calendar(&self) -> &LocalCalendar {
        &self.calendar
    }

    pub fn settings(&self) -> ViewSettings {
        self.settings
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleTaskResponse {
    pub block: TimeBlock,
    pub conflicts: Vec<ConflictEntry>,
}

fn required_input<'a>(value: &'a str, field_name: &str) -> Result<&'a str, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InfraError::InvalidConfig(format!(
            "{field_name} must not be empty"
        )));
    }
    Ok(value)
}

fn parse_date_input(value: &str, field_name: &str) -> Result<NaiveDate, InfraError> {
    let value = required_input(value, field_name)?;
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|error| {
        InfraError::InvalidConfig(format!("{field_name} must be YYYY-MM-DD: {error}"))
    })
}

fn optional_date_input(
    state: &AppState,
    value: Option<String>,
    field_name: &str,
) -> Result<NaiveDate, InfraError> {
    match value.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_date_input(value, field_name),
        None => Ok(state.calendar.today()),
    }
}

fn parse_interval_input(start_time: &str, end_time: &str) -> Result<Interval, InfraError> {
    let start = time_to_minutes(required_input(start_time, "start_time")?)?;
    let end = time_to_minutes(required_input(end_time, "end_time")?)?;
    Ok(Interval::new(start, end)?)
}

fn parse_status_action(action: &str) -> Result<BlockStatus, InfraError> {
    match action.trim().to_ascii_lowercase().as_str() {
        "start" => Ok(BlockStatus::InProgress),
        "complete" => Ok(BlockStatus::Completed),
        "cancel" => Ok(BlockStatus::Cancelled),
        other => Err(InfraError::InvalidConfig(format!(
            "unknown block action '{other}' (expected start, complete or cancel)"
        ))),
    }
}

pub async fn list_blocks_impl(
    state: &AppState,
    date: Option<String>,
) -> Result<Vec<TimeBlock>, InfraError> {
    let date = optional_date_input(state, date, "date")?;
    state.store.fetch_blocks_for_date(date).await
}

pub async fn list_blocks_in_range_impl(
    state: &AppState,
    start_date: String,
    end_date: String,
) -> Result<Vec<TimeBlock>, InfraError> {
    let start = parse_date_input(&start_date, "start_date")?;
    let end = parse_date_input(&end_date, "end_date")?;
    if end < start {
        return Err(InfraError::InvalidConfig(
            "end_date must not be before start_date".to_string(),
        ));
    }
    state.store.fetch_blocks_for_range(start, end).await
}

pub async fn schedule_task_impl(
    state: &AppState,
    task_id: String,
    date: String,
    start_time: String,
    duration_minutes: Option<i32>,
) -> Result<ScheduleTaskResponse, InfraError> {
    let task_id = required_input(&task_id, "task_id")?;
    let date = parse_date_input(&date, "date")?;
    let grid = state.settings.grid;
    let start = grid.snap(time_to_minutes(required_input(&start_time, "start_time")?)?);

    let duration = match duration_minutes {
        Some(minutes) if minutes < grid.min_duration() || minutes > DAY_MINUTES => {
            return Err(InfraError::InvalidConfig(format!(
                "duration_minutes must be between {} and {DAY_MINUTES}",
                grid.min_duration()
            )));
        }
        Some(minutes) => minutes,
        None => {
            let unscheduled = state.store.fetch_unscheduled_tasks(None).await?;
            drop_duration_minutes(
                unscheduled.iter().find(|task| task.task_id == task_id),
                state.settings.default_drop_minutes,
                state.settings.max_drop_minutes,
            )
        }
    };
    let interval = Interval::new(start, (start + duration).min(grid.latest_end()))?;

    let existing = state.store.fetch_blocks_for_date(date).await?;
    let conflicts = find_conflicts(interval, date, &existing, None);
    let block = state.store.create_block(task_id, date, interval).await?;

    state.log_info(
        "schedule_task",
        &format!(
            "scheduled task_id={task_id} block_id={} date={date} start={} end={} conflicts={}",
            block.id,
            block.start_time,
            block.end_time,
            conflicts.len()
        ),
    );
    Ok(ScheduleTaskResponse { block, conflicts })
}

pub async fn adjust_block_time_impl(
    state: &AppState,
    block_id: String,
    start_time: String,
    end_time: String,
    date: Option<String>,
) -> Result<TimeBlock, InfraError> {
    let block_id = required_input(&block_id, "block_id")?;
    let interval = parse_interval_input(&start_time, &end_time)?;
    let date = match date.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => Some(parse_date_input(value, "date")?),
        None => None,
    };

    let current = state
        .store
        .find_block(block_id)?
        .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))?;
    let original = current.interval()?;
    let patch = BlockPatch {
        start_time: Some(interval.start_time()?),
        end_time: Some(interval.end_time()?),
        date,
    };

    let updated = if interval.duration() != original.duration() {
        let change_hours = f64::from(interval.duration() - original.duration()) / 60.0;
        let estimate = TaskEstimate {
            task_id: current.task_id.clone(),
            hours_projected: (current.hours_projected.unwrap_or(0.0) + change_hours).max(0.0),
        };
        state
            .store
            .resize_block(block_id, &patch, Some(&estimate))
            .await?
    } else {
        state.store.update_block(block_id, &patch).await?
    };

    state.log_info(
        "adjust_block_time",
        &format!(
            "adjusted block_id={block_id} date={} start={} end={}",
            updated.scheduled_date, updated.start_time, updated.end_time
        ),
    );
    Ok(updated)
}

pub async fn remove_block_impl(state: &AppState, block_id: String) -> Result<bool, InfraError> {
    let block_id = required_input(&block_id, "block_id")?;
    match state.store.delete_block(block_id).await {
        Ok(()) => {
            state.log_info("remove_block", &format!("removed block_id={block_id}"));
            Ok(true)
        }
        Err(InfraError::NotFound(_)) => Ok(false),
        Err(error) => Err(error),
    }
}

pub async fn check_conflicts_impl(
    state: &AppState,
    date: String,
    start_time: String,
    end_time: String,
    exclude_block_id: Option<String>,
) -> Result<Vec<ConflictEntry>, InfraError> {
    let date = parse_date_input(&date, "date")?;
    let interval = parse_interval_input(&start_time, &end_time)?;
    let blocks = state.store.fetch_blocks_for_date(date).await?;
    let exclude = exclude_block_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    Ok(find_conflicts(interval, date, &blocks, exclude))
}

pub async fn set_block_status_impl(
    state: &AppState,
    block_id: String,
    action: String,
    actual_duration_minutes: Option<i32>,
) -> Result<TimeBlock, InfraError> {
    let block_id = required_input(&block_id, "block_id")?;
    let status = parse_status_action(&action)?;
    if let Some(minutes) = actual_duration_minutes {
        if minutes < 0 {
            return Err(InfraError::InvalidConfig(
                "actual_duration_minutes must be >= 0".to_string(),
            ));
        }
    }
    let actual = if status == BlockStatus::Completed {
        actual_duration_minutes
    } else {
        None
    };

    let updated = state
        .store
        .update_block_status(block_id, status, actual)
        .await?;
    state.log_info(
        "set_block_status",
        &format!("block_id={block_id} status={}", status.as_str()),
    );
    Ok(updated)
}

pub async fn weekly_summary_impl(
    state: &AppState,
    week_of: Option<String>,
) -> Result<Vec<DaySummary>, InfraError> {
    let start = match week_of.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => week_start(parse_date_input(value, "week_of")?),
        None => state.calendar.current_week_start(),
    };
    let blocks = state
        .store
        .fetch_blocks_for_range(start, start + Duration::days(6))
        .await?;
    Ok(summarize_week(start, &blocks))
}

pub async fn list_unscheduled_tasks_impl(
    state: &AppState,
    area: Option<String>,
) -> Result<Vec<UnscheduledTask>, InfraError> {
    state.store.fetch_unscheduled_tasks(area.as_deref()).await
}

pub fn import_task_impl(state: &AppState, task: TaskSummary) -> Result<TaskSummary, InfraError> {
    task.validate().map_err(InfraError::InvalidConfig)?;
    state.store.upsert_task(&task)?;
    state.log_info("import_task", &format!("imported task_id={}", task.id));
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskStatus;
    use chrono::TimeZone;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "timegrid-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        fn app_state(&self) -> AppState {
            let now = Utc
                .with_ymd_and_hms(2024, 6, 12, 9, 0, 0)
                .single()
                .expect("valid instant");
            let state = AppState::new(self.path.clone())
                .expect("initialize app state")
                .with_now_provider(Arc::new(move || now));
            import_task_impl(
                &state,
                TaskSummary {
                    id: "t1".to_string(),
                    name: "Quarterly report".to_string(),
                    area: "Huge Capital".to_string(),
                    status: TaskStatus::InProgress,
                    due_date: None,
                    hours_projected: Some(3.0),
                    hours_worked: Some(1.0),
                },
            )
            .expect("import task");
            state
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    async fn schedule(
        state: &AppState,
        start_time: &str,
        duration_minutes: Option<i32>,
    ) -> Result<ScheduleTaskResponse, InfraError> {
        schedule_task_impl(
            state,
            "t1".to_string(),
            "2024-06-12".to_string(),
            start_time.to_string(),
            duration_minutes,
        )
        .await
    }

    async fn conflicts_at(
        state: &AppState,
        start_time: &str,
        end_time: &str,
        exclude: Option<String>,
    ) -> Vec<ConflictEntry> {
        check_conflicts_impl(
            state,
            "2024-06-12".to_string(),
            start_time.to_string(),
            end_time.to_string(),
            exclude,
        )
        .await
        .expect("check conflicts")
    }

    #[tokio::test]
    async fn bootstrap_creates_workspace_layout() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        assert!(state.config_dir().join("grid.json").exists());
        assert!(state.database_path().exists());
        assert!(workspace.path.join("logs").is_dir());
    }

    #[tokio::test]
    async fn schedule_task_defaults_to_remaining_hours_and_reports_conflicts() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let first = schedule_task_impl(
            &state,
            "t1".to_string(),
            "2024-06-12".to_string(),
            "14:00".to_string(),
            None,
        )
        .await
        .expect("schedule");
        assert_eq!(first.block.start_time, "14:00:00");
        assert_eq!(first.block.end_time, "16:00:00");
        assert!(first.conflicts.is_empty());

        let second = schedule_task_impl(
            &state,
            "t1".to_string(),
            "2024-06-12".to_string(),
            "15:07".to_string(),
            Some(60),
        )
        .await
        .expect("schedule overlapping");
        assert_eq!(second.block.start_time, "15:00:00");
        assert_eq!(second.conflicts.len(), 1);
        assert_eq!(second.conflicts[0].block_id, first.block.id);

        let log = fs::read_to_string(workspace.path.join("logs").join("commands.log"))
            .expect("read command log");
        assert!(log.contains("\"command\":\"schedule_task\""));
    }

    #[tokio::test]
    async fn schedule_task_rejects_bad_input() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let empty = schedule_task_impl(
            &state,
            " ".to_string(),
            "2024-06-12".to_string(),
            "09:00".to_string(),
            None,
        )
        .await;
        assert!(matches!(empty, Err(InfraError::InvalidConfig(_))));
        assert!(matches!(schedule(&state, "9am", None).await, Err(InfraError::Time(_))));
        assert!(matches!(
            schedule(&state, "09:00", Some(5)).await,
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn schedule_task_rejects_durations_longer_than_a_day() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        for duration in [i32::MAX, DAY_MINUTES + 15] {
            assert!(matches!(
                schedule(&state, "09:00", Some(duration)).await,
                Err(InfraError::InvalidConfig(_))
            ));
        }
        let whole_day = schedule(&state, "09:00", Some(DAY_MINUTES)).await.expect("clamped");
        assert_eq!(whole_day.block.end_time, "23:45:00");
        assert_eq!(list_blocks_impl(&state, None).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn adjust_block_time_moves_without_touching_estimate() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let created = schedule(&state, "09:00", Some(60)).await.expect("schedule");

        let moved = adjust_block_time_impl(
            &state,
            created.block.id.clone(),
            "09:45:00".to_string(),
            "10:45:00".to_string(),
            None,
        )
        .await
        .expect("move");
        assert_eq!(moved.start_time, "09:45:00");
        assert_eq!(moved.hours_projected, Some(3.0));

        let resized = adjust_block_time_impl(
            &state,
            created.block.id.clone(),
            "09:45:00".to_string(),
            "11:15:00".to_string(),
            Some("2024-06-13".to_string()),
        )
        .await
        .expect("resize");
        assert_eq!(resized.end_time, "11:15:00");
        assert_eq!(
            resized.scheduled_date,
            NaiveDate::from_ymd_opt(2024, 6, 13).expect("date")
        );
        assert_eq!(resized.hours_projected, Some(3.5));
    }

    #[tokio::test]
    async fn adjust_block_time_rejects_inverted_interval() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let result = adjust_block_time_impl(
            &state,
            "blk-any".to_string(),
            "11:00".to_string(),
            "10:00".to_string(),
            None,
        )
        .await;
        assert!(matches!(result, Err(InfraError::Time(_))));
    }

    #[tokio::test]
    async fn status_actions_and_removal() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let created = schedule(&state, "09:00", Some(60)).await.expect("schedule");
        let block_id = created.block.id;

        let started =
            set_block_status_impl(&state, block_id.clone(), "start".to_string(), Some(30))
                .await
                .expect("start");
        assert_eq!(started.status, BlockStatus::InProgress);
        assert_eq!(started.actual_duration_minutes, None);

        let completed =
            set_block_status_impl(&state, block_id.clone(), "complete".to_string(), Some(55))
                .await
                .expect("complete");
        assert_eq!(completed.actual_duration_minutes, Some(55));
        let paused =
            set_block_status_impl(&state, block_id.clone(), "pause".to_string(), None).await;
        assert!(paused.is_err());

        assert!(remove_block_impl(&state, block_id.clone()).await.expect("remove"));
        assert!(!remove_block_impl(&state, block_id).await.expect("remove again"));
        let unscheduled = list_unscheduled_tasks_impl(&state, None).await.expect("unscheduled");
        assert_eq!(unscheduled.len(), 1);
        assert_eq!(unscheduled[0].hours_remaining, 2.0);
    }

    #[tokio::test]
    async fn weekly_summary_and_listing_use_injected_today() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        schedule(&state, "09:00", Some(90)).await.expect("schedule");

        let today = list_blocks_impl(&state, None).await.expect("list");
        assert_eq!(today.len(), 1);

        let summary = weekly_summary_impl(&state, None).await.expect("summary");
        assert_eq!(summary.len(), 7);
        assert_eq!(summary[0].date, NaiveDate::from_ymd_opt(2024, 6, 10).expect("date"));
        assert_eq!(summary[2].total_blocks, 1);
        assert_eq!(summary[2].total_planned_minutes, 90);
        assert_eq!(summary[2].areas, vec!["Huge Capital".to_string()]);

        let explicit = weekly_summary_impl(&state, Some("2024-06-16".to_string()))
            .await
            .expect("summary for sunday");
        assert_eq!(explicit, summary);

        let range =
            list_blocks_in_range_impl(&state, "2024-06-10".to_string(), "2024-06-16".to_string())
                .await
                .expect("range");
        assert_eq!(range.len(), 1);
        let inverted =
            list_blocks_in_range_impl(&state, "2024-06-16".to_string(), "2024-06-10".to_string())
                .await;
        assert!(inverted.is_err());
    }

    #[tokio::test]
    async fn check_conflicts_excludes_edited_block() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let created = schedule(&state, "09:00", Some(60)).await.expect("schedule");

        assert_eq!(conflicts_at(&state, "09:30", "10:30", None).await.len(), 1);
        assert!(conflicts_at(&state, "10:00", "11:00", None).await.is_empty());
        assert!(conflicts_at(&state, "09:30", "10:30", Some(created.block.id)).await.is_empty());
    }

    #[test]
    fn command_error_is_logged() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let message =
            state.command_error("remove_block", &InfraError::NotFound("block x".to_string()));
        assert_eq!(message, "Not found: block x");
        let log = fs::read_to_string(workspace.path.join("logs").join("commands.log"))
            .expect("read command log");
        assert!(log.contains("\"level\":\"error\""));
    }
}
