//! Database schema and migrations.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        migrate_to_v2(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Readings and the pairing record.
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Glucose readings, one row per (scope, sample time)
        CREATE TABLE IF NOT EXISTS readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scope TEXT NOT NULL,
            captured_at INTEGER NOT NULL,
            value REAL NOT NULL,
            trend INTEGER,
            stored_at INTEGER NOT NULL,
            UNIQUE(scope, captured_at)
        );
        CREATE INDEX IF NOT EXISTS idx_readings_scope_time
            ON readings(scope, captured_at);

        -- The single paired transmitter
        CREATE TABLE IF NOT EXISTS pairing (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            serial TEXT NOT NULL,
            device_id TEXT NOT NULL,
            paired_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// v2: remember when the paired transmitter last authenticated.
fn migrate_to_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch("ALTER TABLE pairing ADD COLUMN last_connected_at INTEGER;")?;
    Ok(())
}

/// Run migrations from old_version to current.
fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    info!(
        "Migrating database schema from v{} to v{}",
        old_version, SCHEMA_VERSION
    );
    if old_version < 2 {
        migrate_to_v2(conn)?;
    }
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}
