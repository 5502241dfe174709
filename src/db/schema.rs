//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::StorageError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(StorageError::Config(format!(
            "database schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| StorageError::from_sqlite("Failed to create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .map_err(|e| StorageError::from_sqlite("Failed to read schema_version", e))?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StorageError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| StorageError::from_sqlite("Failed to clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| StorageError::from_sqlite("Failed to set schema_version", e))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(MEMBERSHIP_SCHEMA)
        .map_err(|e| StorageError::from_sqlite("Failed to create membership table", e))?;

    conn.execute_batch(STRATEGY_SCHEMA)
        .map_err(|e| StorageError::from_sqlite("Failed to create strategy tables", e))?;

    Ok(())
}

/// Material group membership: a material belongs to exactly one group
const MEMBERSHIP_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS material_groups (
    material_code INTEGER PRIMARY KEY NOT NULL CHECK (material_code <> 0),
    group_code INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_material_groups_group ON material_groups(group_code);
"#;

/// Strategy rows; `material_code = 0` is the group default
const STRATEGY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS strategy_params (
    group_code INTEGER NOT NULL,
    material_code INTEGER NOT NULL,
    client TEXT NOT NULL,

    -- JSON integer arrays, positionally aligned
    parameter_codes TEXT NOT NULL,
    option_codes TEXT NOT NULL,

    effective_date TEXT NOT NULL,

    PRIMARY KEY (group_code, material_code),
    CHECK (json_array_length(parameter_codes) = json_array_length(option_codes))
);

-- A material holds at most one row system-wide
CREATE UNIQUE INDEX IF NOT EXISTS idx_strategy_params_material
    ON strategy_params(material_code) WHERE material_code <> 0;
"#;
