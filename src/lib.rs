pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use serde::Serialize;
use std::path::PathBuf;

pub use application::commands::AppState;
pub use application::interaction::{DragController, DragEdge, GestureOutcome, PointerCapture};
pub use application::schedule_view::{ScheduleView, ViewMode, ViewSettings};
pub use domain::conflicts::{find_conflicts, ConflictEntry};
pub use domain::models::{BlockPatch, BlockStatus, TaskSummary, TimeBlock, UnscheduledTask};
pub use domain::time::{Interval, TimeGrid};
pub use infrastructure::block_store::{BlockStore, InMemoryBlockStore};
pub use infrastructure::error::InfraError;
pub use infrastructure::rest_block_store::RestBlockStore;
pub use infrastructure::sqlite_block_store::SqliteBlockStore;

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub workspace_root: String,
    pub database_path: String,
    pub timezone: String,
}

/// Prepares config, database and log directories under `root`, or the
/// current directory when none is given.
pub fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
        timezone: result.timezone.name().to_string(),
    })
}
