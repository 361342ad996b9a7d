/*!
 * Durable run state ledger.
 *
 * This module provides SQLite-based persistence for:
 * - Stage progress of each run, keyed by a deterministic run key
 * - Per-unit translation status, text, attempts and spend
 * - The extracted documents and segment list, so completed stages are skipped on resume
 */

pub mod connection;
pub mod models;
pub mod repository;
pub mod run_key;
pub mod schema;

pub use connection::{DatabaseConnection, LedgerStats};
pub use models::{
    AbortRecord, DocumentRecord, LedgerEntry, LedgerSnapshot, Stage, UnitRecord, UnitStatus,
    UnitUpdate,
};
pub use repository::RunLedger;
pub use run_key::{InputFingerprint, RunKey, RunParameters};
