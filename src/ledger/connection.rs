/*!
 * Ledger database connection management.
 *
 * Opens the SQLite file that backs the run ledger, applies the durability
 * pragmas on every open, and provides async-safe access through tokio's
 * blocking pool.
 */

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::schema;

/// Thread-safe handle to the ledger database
#[derive(Clone)]
pub struct DatabaseConnection {
    /// Path to the database file
    db_path: PathBuf,
    /// Every ledger mutation goes through this lock
    connection: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConnection")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl DatabaseConnection {
    /// Open the ledger at `db_path`, creating it if needed.
    ///
    /// Fails with `LedgerError::Incompatible` (wrapped in anyhow) when the file
    /// was written by a binary with a different schema version.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let (db_path, conn) = Self::open_file(db_path.as_ref())?;
        schema::initialize_schema(&conn)?;

        Ok(Self {
            db_path,
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the ledger, discarding every table if the schema is incompatible.
    ///
    /// Only the force-restart path uses this.
    pub fn new_resetting<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let (db_path, conn) = Self::open_file(db_path.as_ref())?;

        if let Err(e) = schema::initialize_schema(&conn) {
            warn!("Discarding incompatible ledger at {:?}: {:#}", db_path, e);
            schema::reset_schema(&conn)?;
        }

        Ok(Self {
            db_path,
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        debug!("Creating in-memory ledger database");

        let conn = Connection::open_in_memory().context("Failed to create in-memory database")?;
        apply_pragmas(&conn)?;
        schema::initialize_schema(&conn)?;

        Ok(Self {
            db_path: PathBuf::from(":memory:"),
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    fn open_file(db_path: &Path) -> Result<(PathBuf, Connection)> {
        let db_path = db_path.to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create ledger directory: {:?}", parent))?;
            }
        }

        info!("Opening ledger at: {:?}", db_path);

        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open ledger database: {:?}", db_path))?;
        apply_pragmas(&conn)?;

        Ok((db_path, conn))
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run a closure against the connection on the current thread
    pub fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .connection
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire database lock: {}", e))?;

        f(&conn)
    }

    /// Run a closure against the connection on the blocking pool
    pub async fn execute_async<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Failed to acquire database lock: {}", e))?;

            f(&conn)
        })
        .await
        .context("Database task panicked")?
    }

    /// Run a closure inside a single transaction on the blocking pool.
    ///
    /// The transaction commits only if the closure returns `Ok`.
    pub async fn transaction_async<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Failed to acquire database lock: {}", e))?;

            let tx = conn.transaction()?;
            let result = f(&tx)?;
            tx.commit()?;

            Ok(result)
        })
        .await
        .context("Database transaction task panicked")?
    }

    /// Row counts and file size, for the `status` command
    pub fn stats(&self) -> Result<LedgerStats> {
        self.execute(|conn| {
            let count = |table: &str| -> Result<i64> {
                Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?)
            };

            let file_size_bytes = if self.db_path.to_string_lossy() != ":memory:" {
                std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
            } else {
                0
            };

            Ok(LedgerStats {
                run_count: count("runs")?,
                segment_count: count("segments")?,
                unit_count: count("units")?,
                file_size_bytes,
            })
        })
    }
}

/// WAL keeps readers off the writer's back; FULL makes every commit survive power loss.
fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA synchronous=FULL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(())
}

/// Ledger database statistics
#[derive(Debug, Clone)]
pub struct LedgerStats {
    pub run_count: i64,
    pub segment_count: i64,
    pub unit_count: i64,
    /// Database file size in bytes
    pub file_size_bytes: u64,
}

impl std::fmt::Display for LedgerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Runs: {}, Segments: {}, Units: {}, Size: {} KB",
            self.run_count,
            self.segment_count,
            self.unit_count,
            self.file_size_bytes / 1024
        )
    }
}
