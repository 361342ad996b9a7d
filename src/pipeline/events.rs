/*!
 * Structured progress events.
 *
 * The pipeline reports what it does through an `EventSink` handed to it at
 * construction. `LogEventSink` forwards to the `log` facade and
 * `RecordingEventSink` keeps every event for inspection in tests.
 */

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::cost::{CostDecision, CostEstimate};
use crate::ledger::Stage;

/// How a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Succeeded,
    FailedTransient,
    FailedPermanent,
    /// Never dispatched because the cost threshold was reached
    Skipped,
}

/// Something the pipeline did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_key: String,
        resumed_from: Option<Stage>,
        inputs: usize,
    },
    StageStarted {
        stage: Stage,
    },
    StageCompleted {
        stage: Stage,
    },
    StageSkipped {
        stage: Stage,
    },
    DocumentFailed {
        source_ref: String,
        error: String,
    },
    CostChecked {
        estimate: CostEstimate,
        decision: CostDecision,
    },
    TranslationPlanned {
        units: usize,
        batches: usize,
    },
    BatchRetrying {
        batch: usize,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    BatchFinished {
        batch: usize,
        units: usize,
        outcome: BatchOutcome,
        accumulated_cost: f64,
    },
    CostAborted {
        accumulated_cost: f64,
        threshold: f64,
    },
    QaCompleted {
        sampled: usize,
        passed: usize,
    },
    RunFinished {
        succeeded: usize,
        failed_transient: usize,
        failed_permanent: usize,
        aborted: bool,
    },
}

/// Receiver of pipeline events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Forwards events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted {
                run_key,
                resumed_from,
                inputs,
            } => match resumed_from {
                Some(stage) => info!("Resuming run {} after stage {} ({} inputs)", run_key, stage, inputs),
                None => info!("Starting run {} ({} inputs)", run_key, inputs),
            },
            PipelineEvent::StageStarted { stage } => debug!("Stage {} started", stage),
            PipelineEvent::StageCompleted { stage } => info!("Stage {} completed", stage),
            PipelineEvent::StageSkipped { stage } => info!("Stage {} already completed, skipping", stage),
            PipelineEvent::DocumentFailed { source_ref, error } => {
                warn!("Skipping document {}: {}", source_ref, error)
            }
            PipelineEvent::CostChecked { estimate, decision } => info!(
                "Estimated {} words in {} units, projected cost {:.4} ({})",
                estimate.word_count,
                estimate.unit_count,
                estimate.projected_cost,
                if decision.is_allowed() { "allowed" } else { "over threshold" }
            ),
            PipelineEvent::TranslationPlanned { units, batches } => {
                info!("Translating {} units in {} batches", units, batches)
            }
            PipelineEvent::BatchRetrying {
                batch,
                attempt,
                delay_ms,
                error,
            } => warn!(
                "Batch {} attempt {} failed: {}. Retrying in {}ms",
                batch + 1,
                attempt,
                error,
                delay_ms
            ),
            PipelineEvent::BatchFinished {
                batch,
                units,
                outcome,
                accumulated_cost,
            } => match outcome {
                BatchOutcome::Succeeded => debug!(
                    "Batch {} ({} units) succeeded, accumulated cost {:.4}",
                    batch + 1,
                    units,
                    accumulated_cost
                ),
                other => warn!("Batch {} ({} units) finished as {:?}", batch + 1, units, other),
            },
            PipelineEvent::CostAborted {
                accumulated_cost,
                threshold,
            } => warn!(
                "Accumulated cost {:.4} exceeds threshold {:.4}, stopping",
                accumulated_cost, threshold
            ),
            PipelineEvent::QaCompleted { sampled, passed } => {
                info!("QA: {}/{} samples passed", passed, sampled)
            }
            PipelineEvent::RunFinished {
                succeeded,
                failed_transient,
                failed_permanent,
                aborted,
            } => info!(
                "Run finished: {} succeeded, {} failed (transient), {} failed (permanent){}",
                succeeded,
                failed_transient,
                failed_permanent,
                if *aborted { ", aborted" } else { "" }
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `predicate`
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&PipelineEvent) -> bool,
    {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Stages reported as completed, in order
    pub fn completed_stages(&self) -> Vec<Stage> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StageCompleted { stage } => Some(*stage),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        self.events.lock().push(event.clone());
    }
}
