/*!
 * Batch execution against a translator.
 *
 * Pending units are split into batches and run on a bounded pool. Every
 * status change goes through the run ledger before the executor moves on,
 * so an interrupted run can pick up exactly where it stopped.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, error};
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::app_config::Config;
use crate::cost::CostEstimator;
use crate::errors::{LedgerError, ProviderError};
use crate::ledger::{RunLedger, UnitStatus, UnitUpdate};
use crate::pipeline::events::{BatchOutcome, EventSink, PipelineEvent};
use crate::providers::Translator;
use crate::segments::CanonicalUnit;

use super::retry::RetryPolicy;

/// Knobs for one execution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Stop dispatching once accumulated spend exceeds this
    pub cost_threshold: Option<f64>,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.pipeline.batch_size.max(1),
            concurrency: config.pipeline.concurrency.max(1),
            retry: RetryPolicy::from_config(&config.retry),
            cost_threshold: config.cost.abort_threshold,
        }
    }
}

/// Spend that tripped the threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostAbort {
    pub accumulated_cost: f64,
    pub threshold: f64,
}

/// Totals for one execution, counted in units
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub batches: usize,
    pub succeeded: usize,
    pub failed_transient: usize,
    pub failed_permanent: usize,
    /// Units left untouched after a cost abort
    pub skipped: usize,
    pub accumulated_cost: f64,
    pub cost_abort: Option<CostAbort>,
}

impl ExecutionReport {
    pub fn aborted_on_cost(&self) -> bool {
        self.cost_abort.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct BatchReport {
    units: usize,
    outcome: BatchOutcome,
}

/// Runs translation batches and records every result in the ledger
pub struct BatchExecutor {
    translator: Arc<dyn Translator>,
    ledger: RunLedger,
    estimator: CostEstimator,
    settings: ExecutorSettings,
    events: Arc<dyn EventSink>,
}

impl BatchExecutor {
    pub fn new(
        translator: Arc<dyn Translator>,
        ledger: RunLedger,
        estimator: CostEstimator,
        settings: ExecutorSettings,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            translator,
            ledger,
            estimator,
            settings,
            events,
        }
    }

    /// Translate every unit that still needs it.
    ///
    /// Units that already succeeded are never resubmitted. Only ledger
    /// failures are returned as errors; provider failures end up in the
    /// report and in the units' statuses.
    pub async fn execute(&self, units: &[CanonicalUnit]) -> Result<ExecutionReport, LedgerError> {
        let pending: Vec<CanonicalUnit> = units
            .iter()
            .filter(|u| u.status.needs_translation())
            .cloned()
            .collect();

        let mut report = ExecutionReport::default();
        let starting_cost = self.ledger.accumulated_cost().await?;

        if pending.is_empty() {
            debug!("No units need translation");
            report.accumulated_cost = starting_cost;
            return Ok(report);
        }

        if let Some(abort) = self.over_threshold(starting_cost) {
            self.events.emit(&PipelineEvent::CostAborted {
                accumulated_cost: abort.accumulated_cost,
                threshold: abort.threshold,
            });
            report.skipped = pending.len();
            report.accumulated_cost = starting_cost;
            report.cost_abort = Some(abort);
            return Ok(report);
        }

        let batches: Vec<Vec<CanonicalUnit>> = pending
            .chunks(self.settings.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total_batches = batches.len();
        report.batches = total_batches;

        self.events.emit(&PipelineEvent::TranslationPlanned {
            units: pending.len(),
            batches: total_batches,
        });

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let stop = Arc::new(AtomicBool::new(false));

        let results = stream::iter(batches.into_iter().enumerate())
            .map(|(batch_index, batch)| {
                let semaphore = semaphore.clone();
                let stop = stop.clone();

                async move {
                    let skipped = BatchReport {
                        units: batch.len(),
                        outcome: BatchOutcome::Skipped,
                    };
                    let Ok(_permit) = semaphore.acquire().await else {
                        return Ok(skipped);
                    };
                    if stop.load(Ordering::SeqCst) {
                        return Ok(skipped);
                    }
                    self.run_batch(batch_index, batch, &stop).await
                }
            })
            .buffer_unordered(self.settings.concurrency)
            .collect::<Vec<Result<BatchReport, LedgerError>>>()
            .await;

        for result in results {
            let batch = result?;
            match batch.outcome {
                BatchOutcome::Succeeded => report.succeeded += batch.units,
                BatchOutcome::FailedTransient => report.failed_transient += batch.units,
                BatchOutcome::FailedPermanent => report.failed_permanent += batch.units,
                BatchOutcome::Skipped => report.skipped += batch.units,
            }
        }

        report.accumulated_cost = self.ledger.accumulated_cost().await?;
        if stop.load(Ordering::SeqCst) {
            report.cost_abort = self.over_threshold(report.accumulated_cost);
        }

        Ok(report)
    }

    fn over_threshold(&self, accumulated_cost: f64) -> Option<CostAbort> {
        match self.settings.cost_threshold {
            Some(threshold) if accumulated_cost > threshold => Some(CostAbort {
                accumulated_cost,
                threshold,
            }),
            _ => None,
        }
    }

    /// Run one batch end to end, retrying transient failures
    async fn run_batch(
        &self,
        batch_index: usize,
        batch: Vec<CanonicalUnit>,
        stop: &AtomicBool,
    ) -> Result<BatchReport, LedgerError> {
        let texts: Vec<String> = batch.iter().map(|u| u.source_text.clone()).collect();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.ledger
                .apply_updates(
                    batch
                        .iter()
                        .map(|u| UnitUpdate::status(u.content_hash.clone(), UnitStatus::Translating))
                        .collect(),
                )
                .await?;

            let error = match self.translate(&texts).await {
                Ok(translations) => return self.record_success(batch_index, &batch, translations, stop).await,
                Err(e) => e,
            };

            if self.settings.retry.should_retry(attempt, &error) {
                let delay = self.settings.retry.delay_for_attempt(attempt);
                self.events.emit(&PipelineEvent::BatchRetrying {
                    batch: batch_index,
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error: error.to_string(),
                });
                tokio::time::sleep(delay).await;
                continue;
            }

            return self.record_failure(batch_index, &batch, error).await;
        }
    }

    /// Call the translator and enforce positional output
    async fn translate(&self, texts: &[String]) -> Result<Vec<String>, ProviderError> {
        let translations = self.translator.translate_batch(texts).await?;
        if translations.len() != texts.len() {
            return Err(ProviderError::MalformedResponse(format!(
                "expected {} translations, got {}",
                texts.len(),
                translations.len()
            )));
        }
        Ok(translations)
    }

    async fn record_success(
        &self,
        batch_index: usize,
        batch: &[CanonicalUnit],
        translations: Vec<String>,
        stop: &AtomicBool,
    ) -> Result<BatchReport, LedgerError> {
        let updates = batch
            .iter()
            .zip(translations)
            .map(|(unit, text)| {
                let cost = self
                    .estimator
                    .cost_for_words(unit.word_count(), self.translator.as_ref());
                UnitUpdate::succeeded(unit.content_hash.clone(), text, cost)
            })
            .collect();
        let accumulated_cost = self.ledger.apply_updates(updates).await?;

        self.events.emit(&PipelineEvent::BatchFinished {
            batch: batch_index,
            units: batch.len(),
            outcome: BatchOutcome::Succeeded,
            accumulated_cost,
        });

        if let Some(abort) = self.over_threshold(accumulated_cost) {
            // Only the first batch over the line reports the abort
            if !stop.swap(true, Ordering::SeqCst) {
                self.events.emit(&PipelineEvent::CostAborted {
                    accumulated_cost: abort.accumulated_cost,
                    threshold: abort.threshold,
                });
            }
        }

        Ok(BatchReport {
            units: batch.len(),
            outcome: BatchOutcome::Succeeded,
        })
    }

    async fn record_failure(
        &self,
        batch_index: usize,
        batch: &[CanonicalUnit],
        failure: ProviderError,
    ) -> Result<BatchReport, LedgerError> {
        let (status, outcome) = if failure.is_transient() {
            (UnitStatus::FailedTransient, BatchOutcome::FailedTransient)
        } else {
            (UnitStatus::FailedPermanent, BatchOutcome::FailedPermanent)
        };
        error!("Batch {} failed: {}", batch_index + 1, failure);

        let message = failure.to_string();
        let accumulated_cost = self
            .ledger
            .apply_updates(
                batch
                    .iter()
                    .map(|u| UnitUpdate::failed(u.content_hash.clone(), status, message.clone()))
                    .collect(),
            )
            .await?;

        self.events.emit(&PipelineEvent::BatchFinished {
            batch: batch_index,
            units: batch.len(),
            outcome,
            accumulated_cost,
        });

        Ok(BatchReport {
            units: batch.len(),
            outcome,
        })
    }
}
