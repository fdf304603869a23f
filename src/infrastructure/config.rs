use crate::application::schedule_view::ViewSettings;
use crate::domain::time::{TimeGrid, DAY_MINUTES};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::rest_block_store::RestConfig;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use url::Url;

const APP_JSON: &str = "app.json";
const GRID_JSON: &str = "grid.json";
const BACKEND_JSON: &str = "backend.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub grid: serde_json::Value,
    pub backend: serde_json::Value,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Timegrid",
                "timezone": "UTC"
            }),
        ),
        (
            GRID_JSON,
            serde_json::json!({
                "schema": 1,
                "snapMinutes": 15,
                "pixelsPerHour": 64,
                "anchorHour": 6,
                "defaultDropMinutes": 60,
                "maxDropMinutes": 240,
                "weekStartHour": 6,
                "weekEndHour": 23
            }),
        ),
        (
            BACKEND_JSON,
            serde_json::json!({
                "schema": 1,
                "baseUrl": null,
                "userId": null
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    let bundle = ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        grid: read_config(&config_dir.join(GRID_JSON))?,
        backend: read_config(&config_dir.join(BACKEND_JSON))?,
    };
    read_timezone(config_dir)?;
    read_grid_config(config_dir)?;
    Ok(bundle)
}

pub fn read_timezone(config_dir: &Path) -> Result<Tz, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let name = app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("UTC");
    name.parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{name}': {error}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridConfig {
    pub snap_minutes: i32,
    pub pixels_per_hour: f64,
    pub anchor_hour: u32,
    pub default_drop_minutes: i32,
    pub max_drop_minutes: i32,
    pub week_start_hour: u32,
    pub week_end_hour: u32,
}

impl GridConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.snap_minutes <= 0 || DAY_MINUTES % self.snap_minutes != 0 {
            return Err("snapMinutes must be a positive divisor of 1440".to_string());
        }
        if self.pixels_per_hour <= 0.0 || !self.pixels_per_hour.is_finite() {
            return Err("pixelsPerHour must be > 0".to_string());
        }
        if self.anchor_hour > 23 {
            return Err("anchorHour must be between 0 and 23".to_string());
        }
        if self.default_drop_minutes < self.snap_minutes {
            return Err("defaultDropMinutes must be at least one grid unit".to_string());
        }
        if self.max_drop_minutes < self.default_drop_minutes {
            return Err("maxDropMinutes must be >= defaultDropMinutes".to_string());
        }
        if self.week_start_hour > self.week_end_hour || self.week_end_hour > 23 {
            return Err(
                "weekStartHour..weekEndHour must be an hour range within the day".to_string()
            );
        }
        Ok(())
    }

    pub fn view_settings(&self) -> ViewSettings {
        ViewSettings {
            grid: TimeGrid {
                snap_minutes: self.snap_minutes,
                pixels_per_hour: self.pixels_per_hour,
                anchor_minutes: (self.anchor_hour * 60) as i32,
            },
            default_drop_minutes: self.default_drop_minutes,
            max_drop_minutes: self.max_drop_minutes,
            week_start_hour: self.week_start_hour,
            week_end_hour: self.week_end_hour,
        }
    }
}

pub fn read_grid_config(config_dir: &Path) -> Result<GridConfig, InfraError> {
    let path = config_dir.join(GRID_JSON);
    let grid: GridConfig = serde_json::from_value(read_config(&path)?)?;
    grid.validate()
        .map_err(|message| InfraError::InvalidConfig(format!("{message} in {}", path.display())))?;
    Ok(grid)
}

pub fn read_rest_config<F>(config_dir: &Path, lookup: F) -> Result<Option<RestConfig>, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let backend = read_config(&config_dir.join(BACKEND_JSON))?;
    let Some(base_url) = json_string(&backend, "baseUrl") else {
        return Ok(None);
    };
    let base_url = Url::parse(&base_url)
        .map_err(|error| {
            InfraError::InvalidConfig(format!("invalid baseUrl '{base_url}': {error}"))
        })?;
    let user_id = json_string(&backend, "userId")
        .ok_or_else(|| InfraError::InvalidConfig("backend.json userId is required".to_string()))?;

    Ok(Some(RestConfig {
        base_url,
        api_key: required_lookup_value(&lookup, &["TIMEGRID_API_KEY"], "backend api key")?,
        access_token: required_lookup_value(
            &lookup,
            &["TIMEGRID_ACCESS_TOKEN"],
            "backend access token",
        )?,
        user_id,
    }))
}

pub fn read_rest_config_from_env(config_dir: &Path) -> Result<Option<RestConfig>, InfraError> {
    read_rest_config(config_dir, |key| std::env::var(key).ok())
}

fn json_string(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .ok_or_else(|| {
            InfraError::InvalidConfig(format!(
                "missing {} (set one of: {})",
                field_name,
                keys.join(", ")
            ))
        })
}
