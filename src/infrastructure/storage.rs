use crate::infrastructure::error::InfraError;
use rusqlite::Connection;
use std::fs;
use std::path::Path;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");
const SCHEMA_VERSION: i32 = 1;

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    connection.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

pub fn schema_version(path: &Path) -> Result<i32, InfraError> {
    let connection = Connection::open(path)?;
    let version = connection.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}
