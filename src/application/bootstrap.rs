use crate::application::schedule_view::ViewSettings;
use crate::infrastructure::config::{
    ensure_default_configs, load_configs, read_grid_config, read_timezone,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use chrono_tz::Tz;
use std::fs;
use std::path::{Path, PathBuf};

pub const DATABASE_FILE: &str = "timegrid.sqlite";

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub database_path: PathBuf,
    pub timezone: Tz,
    pub settings: ViewSettings,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join(DATABASE_FILE);

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let _ = load_configs(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        timezone: read_timezone(&config_dir)?,
        settings: read_grid_config(&config_dir)?.view_settings(),
        config_dir,
        database_path,
    })
}
