use chrono::Utc;
use serde::Serialize;

use crate::cost::{CostDecision, CostEstimate};
use crate::export::ExportSummary;
use crate::ledger::{RunKey, Stage, UnitStatus};
use crate::providers::ProviderInfo;
use crate::qa::QaSampleRecord;
use crate::segments::CanonicalUnit;

/// A document that could not be read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFailure {
    pub source_ref: String,
    pub error: String,
}

/// Outcome of one pipeline invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub run_key: String,
    pub succeeded_count: usize,
    pub failed_transient_count: usize,
    pub failed_permanent_count: usize,
    /// Units never attempted, e.g. after a cost abort
    pub pending_count: usize,
    pub unit_count: usize,
    pub segment_count: usize,
    pub total_cost: f64,
    pub qa_sampled: usize,
    pub qa_passed: usize,
    pub qa_pass_rate: f64,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    /// Set when this invocation evaluated the cost gate
    pub estimate: Option<CostEstimate>,
    /// Stages this invocation executed, skipped ones excluded
    pub stages_run: Vec<Stage>,
    pub document_failures: Vec<DocumentFailure>,
    pub failed_permanent: Vec<String>,
    pub qa_failures: Vec<QaSampleRecord>,
    pub export: Option<ExportSummary>,
}

impl RunResult {
    pub fn new(run_key: &RunKey) -> Self {
        Self {
            run_key: run_key.to_string(),
            succeeded_count: 0,
            failed_transient_count: 0,
            failed_permanent_count: 0,
            pending_count: 0,
            unit_count: 0,
            segment_count: 0,
            total_cost: 0.0,
            qa_sampled: 0,
            qa_passed: 0,
            qa_pass_rate: 1.0,
            aborted: false,
            abort_reason: None,
            estimate: None,
            stages_run: Vec::new(),
            document_failures: Vec::new(),
            failed_permanent: Vec::new(),
            qa_failures: Vec::new(),
            export: None,
        }
    }

    /// Recount unit statuses from the latest ledger state
    pub fn tally(&mut self, units: &[CanonicalUnit]) {
        let count = |status: UnitStatus| units.iter().filter(|u| u.status == status).count();

        self.unit_count = units.len();
        self.succeeded_count = count(UnitStatus::Succeeded);
        self.failed_transient_count = count(UnitStatus::FailedTransient);
        self.failed_permanent_count = count(UnitStatus::FailedPermanent);
        self.pending_count = count(UnitStatus::Pending) + count(UnitStatus::Translating);
        self.failed_permanent = units
            .iter()
            .filter(|u| u.status == UnitStatus::FailedPermanent)
            .map(|u| u.content_hash.clone())
            .collect();
    }

    pub fn record_qa(&mut self, sampled: usize, passed: usize) {
        self.qa_sampled = sampled;
        self.qa_passed = passed;
        self.qa_pass_rate = crate::qa::sampler::pass_rate(sampled, passed);
    }

    pub fn abort(&mut self, reason: String) {
        self.aborted = true;
        self.abort_reason = Some(reason);
    }
}

/// Gate evaluation without touching the ledger or the network
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateReport {
    pub run_key: String,
    pub documents: usize,
    pub document_failures: Vec<DocumentFailure>,
    pub segment_count: usize,
    pub estimate: CostEstimate,
    pub decision: CostDecision,
    pub currency: String,
}

/// Contents of the metadata side file
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata<'a> {
    pub generated_at: String,
    pub provider: ProviderInfo,
    pub source_language: &'a str,
    pub target_language: &'a str,
    pub chunk_size: usize,
    pub currency: &'a str,
    pub result: &'a RunResult,
}

impl<'a> RunMetadata<'a> {
    pub fn new(
        result: &'a RunResult,
        provider: ProviderInfo,
        source_language: &'a str,
        target_language: &'a str,
        chunk_size: usize,
        currency: &'a str,
    ) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339(),
            provider,
            source_language,
            target_language,
            chunk_size,
            currency,
            result,
        }
    }
}
