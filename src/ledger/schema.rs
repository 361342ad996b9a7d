/*!
 * Ledger schema definitions.
 *
 * There is no migration path: a ledger written by a different schema
 * version is reported as incompatible and must be cleared with a force
 * restart before the run can continue.
 */

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::Connection;

use crate::errors::LedgerError;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Create the schema on a fresh database, or verify the version of an existing one
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Initializing ledger schema v{}", SCHEMA_VERSION);
        create_all_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version != SCHEMA_VERSION {
        return Err(LedgerError::Incompatible(format!(
            "ledger schema v{} cannot be read by this binary (expects v{})",
            current_version, SCHEMA_VERSION
        ))
        .into());
    } else {
        debug!("Ledger schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get the current schema version, 0 for an empty database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .context("Failed to check schema_version table existence")?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    // A version table without a row was not written by us
    version.ok_or_else(|| {
        LedgerError::Incompatible("schema_version table is empty".to_string()).into()
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version, updated_at) VALUES (1, ?1, datetime('now'))",
        [version],
    )?;
    Ok(())
}

fn create_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )?;

    // One row per run key; stage is the last completed stage
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_key TEXT PRIMARY KEY,
            stage TEXT,
            accumulated_cost REAL NOT NULL DEFAULT 0,
            aborted INTEGER NOT NULL DEFAULT 0,
            abort_reason TEXT,
            qa_sampled INTEGER NOT NULL DEFAULT 0,
            qa_passed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            run_key TEXT NOT NULL REFERENCES runs(run_key) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            source_ref TEXT NOT NULL,
            raw_text TEXT,
            cleaned_text TEXT,
            error TEXT,
            PRIMARY KEY (run_key, position)
        );
        "#,
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS segments (
            run_key TEXT NOT NULL REFERENCES runs(run_key) ON DELETE CASCADE,
            ordinal INTEGER NOT NULL,
            source_ref TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            text TEXT NOT NULL,
            PRIMARY KEY (run_key, ordinal)
        );

        CREATE INDEX IF NOT EXISTS idx_segments_hash ON segments(run_key, content_hash);
        "#,
    )?;

    // first_ordinal keeps the first-seen order of canonical units
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS units (
            run_key TEXT NOT NULL REFERENCES runs(run_key) ON DELETE CASCADE,
            content_hash TEXT NOT NULL,
            first_ordinal INTEGER NOT NULL,
            source_text TEXT NOT NULL,
            status TEXT NOT NULL,
            translated_text TEXT,
            cost REAL NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (run_key, content_hash)
        );

        CREATE INDEX IF NOT EXISTS idx_units_status ON units(run_key, status);
        "#,
    )?;

    info!("Ledger schema created successfully");
    Ok(())
}

/// Drop every table and recreate the current schema
pub fn reset_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS units;
        DROP TABLE IF EXISTS segments;
        DROP TABLE IF EXISTS documents;
        DROP TABLE IF EXISTS runs;
        DROP TABLE IF EXISTS schema_version;
        "#,
    )?;
    create_all_tables(conn)?;
    set_schema_version(conn, SCHEMA_VERSION)?;
    info!("Ledger schema reset to v{}", SCHEMA_VERSION);
    Ok(())
}
