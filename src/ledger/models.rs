/*!
 * Ledger entity models.
 *
 * These structures map directly to ledger tables and provide
 * type-safe access to persisted run state.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::run_key::RunKey;

/// Pipeline stages in the only order they may complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extracted,
    Cleaned,
    Chunked,
    CostChecked,
    Translated,
    QaValidated,
    Exported,
}

impl Stage {
    /// Every stage, first to last
    pub const ALL: [Stage; 7] = [
        Stage::Extracted,
        Stage::Cleaned,
        Stage::Chunked,
        Stage::CostChecked,
        Stage::Translated,
        Stage::QaValidated,
        Stage::Exported,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extracted => "extracted",
            Stage::Cleaned => "cleaned",
            Stage::Chunked => "chunked",
            Stage::CostChecked => "cost_checked",
            Stage::Translated => "translated",
            Stage::QaValidated => "qa_validated",
            Stage::Exported => "exported",
        }
    }

    /// The stage a run enters after completing `last`, `None` once exported
    pub fn after(last: Option<Stage>) -> Option<Stage> {
        match last {
            None => Some(Stage::Extracted),
            Some(stage) => {
                let index = Stage::ALL.iter().position(|s| *s == stage)?;
                Stage::ALL.get(index + 1).copied()
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .find(|stage| stage.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Invalid stage: {}", s))
    }
}

/// Translation status of a canonical unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Not yet submitted
    Pending,
    /// Claimed by a batch that has not finished
    Translating,
    /// Translated; never resubmitted
    Succeeded,
    /// Retries exhausted on transient errors; retried by the next invocation
    FailedTransient,
    /// Provider rejected the unit; never retried automatically
    FailedPermanent,
}

impl UnitStatus {
    /// Whether the executor should pick this unit up.
    ///
    /// `Translating` counts because a unit can only be left in that state by an
    /// interrupted process.
    pub fn needs_translation(&self) -> bool {
        matches!(
            self,
            UnitStatus::Pending | UnitStatus::Translating | UnitStatus::FailedTransient
        )
    }

    /// Whether moving from `self` to `next` keeps the status history monotonic
    pub fn can_transition_to(&self, next: UnitStatus) -> bool {
        use UnitStatus::*;
        match (self, next) {
            (Pending, Translating) => true,
            (Translating, Translating | Succeeded | FailedTransient | FailedPermanent) => true,
            (FailedTransient, Translating) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Pending => write!(f, "pending"),
            UnitStatus::Translating => write!(f, "translating"),
            UnitStatus::Succeeded => write!(f, "succeeded"),
            UnitStatus::FailedTransient => write!(f, "failed_transient"),
            UnitStatus::FailedPermanent => write!(f, "failed_permanent"),
        }
    }
}

impl std::str::FromStr for UnitStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UnitStatus::Pending),
            "translating" => Ok(UnitStatus::Translating),
            "succeeded" => Ok(UnitStatus::Succeeded),
            "failed_transient" => Ok(UnitStatus::FailedTransient),
            "failed_permanent" => Ok(UnitStatus::FailedPermanent),
            _ => Err(anyhow::anyhow!("Invalid unit status: {}", s)),
        }
    }
}

/// Why a run stopped before spending more
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortRecord {
    pub reason: String,
}

/// In-memory view of a run's ledger row and unit status map
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub run_key: RunKey,
    /// Last completed stage, `None` for a fresh run
    pub stage: Option<Stage>,
    pub units: BTreeMap<String, UnitStatus>,
    pub accumulated_cost: f64,
    pub abort: Option<AbortRecord>,
    pub qa_sampled: usize,
    pub qa_passed: usize,
    pub created_at: String,
    pub updated_at: String,
}

impl LedgerEntry {
    pub fn is_complete(&self, stage: Stage) -> bool {
        self.stage.is_some_and(|done| done >= stage)
    }

    /// Number of units currently in `status`
    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.values().filter(|s| **s == status).count()
    }
}

/// Serializable rendering of a ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub schema_version: i32,
    pub run_key: String,
    pub stage: Option<Stage>,
    pub accumulated_cost: f64,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    pub units: BTreeMap<String, UnitStatus>,
    pub created_at: String,
    pub updated_at: String,
}

/// A stored input document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub position: usize,
    pub source_ref: String,
    pub raw_text: Option<String>,
    pub cleaned_text: Option<String>,
    /// Set when extraction failed; later stages skip the document
    pub error: Option<String>,
}

/// A canonical unit as stored in the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    pub content_hash: String,
    pub first_ordinal: u64,
    pub source_text: String,
    pub status: UnitStatus,
    pub translated_text: Option<String>,
    pub cost: f64,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// One status change submitted by a worker
#[derive(Debug, Clone, PartialEq)]
pub struct UnitUpdate {
    pub content_hash: String,
    pub status: UnitStatus,
    pub translated_text: Option<String>,
    pub cost_delta: f64,
    pub error: Option<String>,
}

impl UnitUpdate {
    pub fn status(content_hash: impl Into<String>, status: UnitStatus) -> Self {
        Self {
            content_hash: content_hash.into(),
            status,
            translated_text: None,
            cost_delta: 0.0,
            error: None,
        }
    }

    pub fn succeeded(content_hash: impl Into<String>, text: String, cost_delta: f64) -> Self {
        Self {
            content_hash: content_hash.into(),
            status: UnitStatus::Succeeded,
            translated_text: Some(text),
            cost_delta,
            error: None,
        }
    }

    pub fn failed(content_hash: impl Into<String>, status: UnitStatus, error: String) -> Self {
        Self {
            content_hash: content_hash.into(),
            status,
            translated_text: None,
            cost_delta: 0.0,
            error: Some(error),
        }
    }
}
