/*!
 * Run ledger repository.
 *
 * `RunLedger` is the only writer of run state. Each public mutation is one
 * SQLite transaction committed with `synchronous=FULL` before the call
 * returns, so a crash after any `mark_*` loses nothing that was reported
 * as done.
 */

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::Result;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::LedgerError;
use crate::segments::{CanonicalUnit, Segment};

use super::connection::DatabaseConnection;
use super::models::{
    AbortRecord, DocumentRecord, LedgerEntry, LedgerSnapshot, Stage, UnitRecord, UnitStatus,
    UnitUpdate,
};
use super::run_key::RunKey;
use super::schema::SCHEMA_VERSION;

/// Handle on one run's rows in the ledger database
#[derive(Clone, Debug)]
pub struct RunLedger {
    db: DatabaseConnection,
    run_key: RunKey,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Parse a stored value, treating anything unreadable as an incompatible ledger
fn decode<T: FromStr>(value: &str, what: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        LedgerError::Incompatible(format!("unreadable {} '{}'", what, value)).into()
    })
}

impl RunLedger {
    // =========================================================================
    // Run lifecycle
    // =========================================================================

    /// Load the ledger entry for `run_key`, creating an empty one if none exists
    pub async fn load_or_create(
        db: DatabaseConnection,
        run_key: RunKey,
    ) -> Result<(Self, LedgerEntry), LedgerError> {
        let key = run_key.clone();

        let entry = db
            .transaction_async(move |tx| {
                let timestamp = now();
                let inserted = tx.execute(
                    r#"
                    INSERT OR IGNORE INTO runs (run_key, stage, accumulated_cost, aborted, created_at, updated_at)
                    VALUES (?1, NULL, 0, 0, ?2, ?2)
                    "#,
                    params![key.as_str(), timestamp],
                )?;
                if inserted > 0 {
                    info!("Created ledger entry for run {}", key.short());
                } else {
                    debug!("Loaded existing ledger entry for run {}", key.short());
                }

                read_entry(tx, &key)?
                    .ok_or_else(|| LedgerError::Storage("run row vanished after insert".into()).into())
            })
            .await?;

        Ok((Self { db, run_key }, entry))
    }

    /// Whether any state exists for `run_key`
    pub async fn is_resumable(db: &DatabaseConnection, run_key: &RunKey) -> Result<bool, LedgerError> {
        let key = run_key.clone();

        let exists = db
            .execute_async(move |conn| {
                let found: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM runs WHERE run_key = ?1",
                        [key.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;

        Ok(exists)
    }

    /// Delete every row belonging to `run_key`
    pub async fn force_restart(db: &DatabaseConnection, run_key: &RunKey) -> Result<(), LedgerError> {
        let key = run_key.clone();

        db.transaction_async(move |tx| {
            for table in ["units", "segments", "documents", "runs"] {
                tx.execute(
                    &format!("DELETE FROM {} WHERE run_key = ?1", table),
                    [key.as_str()],
                )?;
            }
            Ok(())
        })
        .await?;

        info!("Cleared ledger state for run {}", run_key.short());
        Ok(())
    }

    pub fn run_key(&self) -> &RunKey {
        &self.run_key
    }

    /// Re-read the entry from disk
    pub async fn entry(&self) -> Result<LedgerEntry, LedgerError> {
        let key = self.run_key.clone();

        let entry = self
            .db
            .execute_async(move |conn| {
                read_entry(conn, &key)?.ok_or_else(|| {
                    LedgerError::Storage(format!("no ledger entry for run {}", key)).into()
                })
            })
            .await?;

        Ok(entry)
    }

    /// Render the entry as a serializable record
    pub async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let entry = self.entry().await?;

        Ok(LedgerSnapshot {
            schema_version: SCHEMA_VERSION,
            run_key: entry.run_key.to_string(),
            stage: entry.stage,
            accumulated_cost: entry.accumulated_cost,
            aborted: entry.abort.is_some(),
            abort_reason: entry.abort.map(|a| a.reason),
            units: entry.units,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        })
    }

    /// Record `stage` as completed.
    ///
    /// Stages already completed are ignored; skipping a stage is an error.
    pub async fn mark_stage(&self, stage: Stage) -> Result<(), LedgerError> {
        let key = self.run_key.clone();

        self.db
            .transaction_async(move |tx| {
                let current = read_stage(tx, &key)?;

                if current.is_some_and(|done| done >= stage) {
                    debug!("Stage {} already recorded for run {}", stage, key.short());
                    return Ok(());
                }
                if Stage::after(current) != Some(stage) {
                    return Err(LedgerError::StageOrder {
                        from: current.map_or("start".to_string(), |s| s.to_string()),
                        to: stage.to_string(),
                    }
                    .into());
                }

                tx.execute(
                    "UPDATE runs SET stage = ?1, updated_at = ?2 WHERE run_key = ?3",
                    params![stage.as_str(), now(), key.as_str()],
                )?;
                Ok(())
            })
            .await?;

        debug!("Run {} completed stage {}", self.run_key.short(), stage);
        Ok(())
    }

    // =========================================================================
    // Unit state
    // =========================================================================

    /// Change one unit's status and add `cost_delta` to the run's spend.
    ///
    /// Returns the accumulated cost after the change.
    pub async fn mark_unit(
        &self,
        content_hash: &str,
        status: UnitStatus,
        cost_delta: f64,
    ) -> Result<f64, LedgerError> {
        let mut update = UnitUpdate::status(content_hash, status);
        update.cost_delta = cost_delta;
        self.apply_updates(vec![update]).await
    }

    /// Apply a batch of unit changes atomically.
    ///
    /// Either every change and its cost lands, or none does. Returns the
    /// accumulated cost after the changes.
    pub async fn apply_updates(&self, updates: Vec<UnitUpdate>) -> Result<f64, LedgerError> {
        let key = self.run_key.clone();

        let accumulated = self
            .db
            .transaction_async(move |tx| {
                let timestamp = now();
                let mut total_delta = 0.0;

                for update in &updates {
                    let stored: Option<String> = tx
                        .query_row(
                            "SELECT status FROM units WHERE run_key = ?1 AND content_hash = ?2",
                            params![key.as_str(), update.content_hash],
                            |row| row.get(0),
                        )
                        .optional()?;
                    let stored = stored.ok_or_else(|| {
                        LedgerError::Storage(format!("unknown unit {}", update.content_hash))
                    })?;
                    let current: UnitStatus = decode(&stored, "unit status")?;

                    if !current.can_transition_to(update.status) {
                        return Err(LedgerError::InvalidTransition {
                            content_hash: update.content_hash.clone(),
                            from: current.to_string(),
                            to: update.status.to_string(),
                        }
                        .into());
                    }

                    let claimed = i64::from(update.status == UnitStatus::Translating);
                    tx.execute(
                        r#"
                        UPDATE units
                        SET status = ?1,
                            translated_text = COALESCE(?2, translated_text),
                            cost = cost + ?3,
                            attempts = attempts + ?4,
                            last_error = ?5,
                            updated_at = ?6
                        WHERE run_key = ?7 AND content_hash = ?8
                        "#,
                        params![
                            update.status.to_string(),
                            update.translated_text,
                            update.cost_delta,
                            claimed,
                            update.error,
                            timestamp,
                            key.as_str(),
                            update.content_hash,
                        ],
                    )?;
                    total_delta += update.cost_delta;
                }

                tx.execute(
                    "UPDATE runs SET accumulated_cost = accumulated_cost + ?1, updated_at = ?2 WHERE run_key = ?3",
                    params![total_delta, timestamp, key.as_str()],
                )?;

                let accumulated: f64 = tx.query_row(
                    "SELECT accumulated_cost FROM runs WHERE run_key = ?1",
                    [key.as_str()],
                    |row| row.get(0),
                )?;
                Ok(accumulated)
            })
            .await?;

        Ok(accumulated)
    }

    pub async fn accumulated_cost(&self) -> Result<f64, LedgerError> {
        Ok(self.entry().await?.accumulated_cost)
    }

    /// All units of the run, ordered by first-seen ordinal
    pub async fn load_units(&self) -> Result<Vec<UnitRecord>, LedgerError> {
        let key = self.run_key.clone();

        let units = self
            .db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT content_hash, first_ordinal, source_text, status, translated_text,
                           cost, attempts, last_error
                    FROM units
                    WHERE run_key = ?1
                    ORDER BY first_ordinal
                    "#,
                )?;

                let rows = stmt
                    .query_map([key.as_str()], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, f64>(5)?,
                            row.get::<_, i64>(6)?,
                            row.get::<_, Option<String>>(7)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                rows.into_iter()
                    .map(
                        |(content_hash, first_ordinal, source_text, status, translated_text, cost, attempts, last_error)| {
                            Ok(UnitRecord {
                                content_hash,
                                first_ordinal: first_ordinal as u64,
                                source_text,
                                status: decode(&status, "unit status")?,
                                translated_text,
                                cost,
                                attempts: attempts as u32,
                                last_error,
                            })
                        },
                    )
                    .collect::<Result<Vec<_>>>()
            })
            .await?;

        Ok(units)
    }

    // =========================================================================
    // Abort and QA bookkeeping
    // =========================================================================

    pub async fn record_abort(&self, reason: &str) -> Result<(), LedgerError> {
        let key = self.run_key.clone();
        let reason = reason.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE runs SET aborted = 1, abort_reason = ?1, updated_at = ?2 WHERE run_key = ?3",
                    params![reason, now(), key.as_str()],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    pub async fn clear_abort(&self) -> Result<(), LedgerError> {
        let key = self.run_key.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE runs SET aborted = 0, abort_reason = NULL, updated_at = ?1 WHERE run_key = ?2",
                    params![now(), key.as_str()],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    pub async fn record_qa(&self, sampled: usize, passed: usize) -> Result<(), LedgerError> {
        let key = self.run_key.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE runs SET qa_sampled = ?1, qa_passed = ?2, updated_at = ?3 WHERE run_key = ?4",
                    params![sampled as i64, passed as i64, now(), key.as_str()],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    // =========================================================================
    // Stage artifacts
    // =========================================================================

    /// Replace the run's documents
    pub async fn save_documents(&self, documents: Vec<DocumentRecord>) -> Result<(), LedgerError> {
        let key = self.run_key.clone();

        self.db
            .transaction_async(move |tx| {
                tx.execute("DELETE FROM documents WHERE run_key = ?1", [key.as_str()])?;
                for doc in documents {
                    tx.execute(
                        r#"
                        INSERT INTO documents (run_key, position, source_ref, raw_text, cleaned_text, error)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                        params![
                            key.as_str(),
                            doc.position as i64,
                            doc.source_ref,
                            doc.raw_text,
                            doc.cleaned_text,
                            doc.error,
                        ],
                    )?;
                }
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Documents in input order
    pub async fn load_documents(&self) -> Result<Vec<DocumentRecord>, LedgerError> {
        let key = self.run_key.clone();

        let documents = self
            .db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT position, source_ref, raw_text, cleaned_text, error
                    FROM documents
                    WHERE run_key = ?1
                    ORDER BY position
                    "#,
                )?;

                let rows = stmt
                    .query_map([key.as_str()], |row| {
                        Ok(DocumentRecord {
                            position: row.get::<_, i64>(0)? as usize,
                            source_ref: row.get(1)?,
                            raw_text: row.get(2)?,
                            cleaned_text: row.get(3)?,
                            error: row.get(4)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        Ok(documents)
    }

    /// Store the run's segments and register one pending unit per distinct text.
    ///
    /// Units that already exist keep their status.
    pub async fn save_segments(
        &self,
        segments: Vec<Segment>,
        units: Vec<CanonicalUnit>,
    ) -> Result<(), LedgerError> {
        let key = self.run_key.clone();

        self.db
            .transaction_async(move |tx| {
                let timestamp = now();
                tx.execute("DELETE FROM segments WHERE run_key = ?1", [key.as_str()])?;

                for segment in &segments {
                    tx.execute(
                        r#"
                        INSERT INTO segments (run_key, ordinal, source_ref, content_hash, text)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        "#,
                        params![
                            key.as_str(),
                            segment.ordinal as i64,
                            segment.source_ref,
                            segment.content_hash,
                            segment.text,
                        ],
                    )?;
                }

                for unit in &units {
                    tx.execute(
                        r#"
                        INSERT OR IGNORE INTO units (run_key, content_hash, first_ordinal, source_text, status, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                        params![
                            key.as_str(),
                            unit.content_hash,
                            unit.first_ordinal as i64,
                            unit.source_text,
                            UnitStatus::Pending.to_string(),
                            timestamp,
                        ],
                    )?;
                }
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Segments in ordinal order
    pub async fn load_segments(&self) -> Result<Vec<Segment>, LedgerError> {
        let key = self.run_key.clone();

        let segments = self
            .db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT ordinal, text, content_hash, source_ref
                    FROM segments
                    WHERE run_key = ?1
                    ORDER BY ordinal
                    "#,
                )?;

                let rows = stmt
                    .query_map([key.as_str()], |row| {
                        Ok(Segment {
                            ordinal: row.get::<_, i64>(0)? as u64,
                            text: row.get(1)?,
                            content_hash: row.get(2)?,
                            source_ref: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        Ok(segments)
    }
}

fn read_stage(conn: &Connection, key: &RunKey) -> Result<Option<Stage>> {
    let stage: Option<Option<String>> = conn
        .query_row(
            "SELECT stage FROM runs WHERE run_key = ?1",
            [key.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    match stage.flatten() {
        Some(value) => Ok(Some(decode(&value, "stage")?)),
        None => Ok(None),
    }
}

fn read_entry(conn: &Connection, key: &RunKey) -> Result<Option<LedgerEntry>> {
    let row = conn
        .query_row(
            r#"
            SELECT stage, accumulated_cost, aborted, abort_reason, qa_sampled, qa_passed,
                   created_at, updated_at
            FROM runs WHERE run_key = ?1
            "#,
            [key.as_str()],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((stage, accumulated_cost, aborted, abort_reason, qa_sampled, qa_passed, created_at, updated_at)) =
        row
    else {
        return Ok(None);
    };

    let stage = match stage {
        Some(value) => Some(decode::<Stage>(&value, "stage")?),
        None => None,
    };

    let mut stmt = conn.prepare("SELECT content_hash, status FROM units WHERE run_key = ?1")?;
    let raw_units = stmt
        .query_map([key.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut units = BTreeMap::new();
    for (hash, status) in raw_units {
        units.insert(hash, decode::<UnitStatus>(&status, "unit status")?);
    }

    Ok(Some(LedgerEntry {
        run_key: key.clone(),
        stage,
        units,
        accumulated_cost,
        abort: aborted.then(|| AbortRecord {
            reason: abort_reason.unwrap_or_default(),
        }),
        qa_sampled: qa_sampled as usize,
        qa_passed: qa_passed as usize,
        created_at,
        updated_at,
    }))
}
