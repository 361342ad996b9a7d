/*!
 * Stage state machine driving a run from input documents to an exported
 * dataset.
 *
 * Stages run strictly forward and each completion is persisted before the
 * next stage starts, so a rerun with the same inputs and settings resumes at
 * the first stage that has not completed.
 */

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::app_config::Config;
use crate::cleaning::TextCleaner;
use crate::cost::{CostDecision, CostEstimator};
use crate::errors::{LedgerError, PipelineError};
use crate::export::{DatasetExporter, FailedUnit};
use crate::extraction::Extractor;
use crate::file_utils::FileManager;
use crate::ledger::{
    DatabaseConnection, DocumentRecord, LedgerEntry, LedgerSnapshot, RunKey, RunLedger, RunParameters, Stage,
    UnitStatus,
};
use crate::providers::Translator;
use crate::qa::{QaReport, QaSampler};
use crate::segments::{chunk_text, CanonicalUnit, Segment, SegmentStore};
use crate::translation::{BatchExecutor, ExecutorSettings};

use super::events::{EventSink, PipelineEvent};
use super::result::{DocumentFailure, EstimateReport, RunMetadata, RunResult};

/// Drives runs for one configuration
pub struct Pipeline {
    config: Config,
    translator: Arc<dyn Translator>,
    events: Arc<dyn EventSink>,
}

impl Pipeline {
    pub fn new(config: Config, translator: Arc<dyn Translator>, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            translator,
            events,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn run_parameters(&self) -> RunParameters {
        RunParameters {
            chunk_size: self.config.pipeline.chunk_size,
            source_language: self.config.translation.source_language.clone(),
            target_language: self.config.translation.target_language.clone(),
        }
    }

    fn estimator(&self) -> CostEstimator {
        CostEstimator::from_config(&self.config.cost)
    }

    // =========================================================================
    // Inputs and ledger access
    // =========================================================================

    async fn resolve_inputs(&self, inputs: &[PathBuf]) -> Result<(Vec<PathBuf>, RunKey), PipelineError> {
        let files = FileManager::collect_inputs(inputs).map_err(input_error)?;
        if files.is_empty() {
            return Err(PipelineError::NoInputs);
        }

        let fingerprints = FileManager::fingerprint_inputs(&files).await.map_err(input_error)?;
        let run_key = RunKey::derive(&fingerprints, &self.run_parameters());
        Ok((files, run_key))
    }

    /// Run key the given inputs map to under this configuration
    pub async fn run_key_for(&self, inputs: &[PathBuf]) -> Result<RunKey, PipelineError> {
        Ok(self.resolve_inputs(inputs).await?.1)
    }

    fn open_ledger_db(&self) -> Result<DatabaseConnection, PipelineError> {
        let outputs = &self.config.outputs;
        FileManager::ensure_dir(&outputs.base_dir).map_err(export_error)?;
        Ok(DatabaseConnection::new(outputs.ledger_path()).map_err(LedgerError::from)?)
    }

    /// Discard every trace of `run_key`, including an incompatible schema
    pub async fn force_restart(&self, run_key: &RunKey) -> Result<(), PipelineError> {
        let outputs = &self.config.outputs;
        FileManager::ensure_dir(&outputs.base_dir).map_err(export_error)?;
        let db = DatabaseConnection::new_resetting(outputs.ledger_path()).map_err(LedgerError::from)?;

        RunLedger::force_restart(&db, run_key).await?;
        Ok(())
    }

    /// Ledger snapshot for the inputs' run, if one exists
    pub async fn snapshot(&self, inputs: &[PathBuf]) -> Result<Option<LedgerSnapshot>, PipelineError> {
        let run_key = self.run_key_for(inputs).await?;
        let db = self.open_ledger_db()?;
        match db.stats() {
            Ok(stats) => info!("Ledger {:?}: {}", db.path(), stats),
            Err(e) => debug!("Ledger statistics unavailable: {:#}", e),
        }

        if !RunLedger::is_resumable(&db, &run_key).await? {
            return Ok(None);
        }
        let (ledger, _) = RunLedger::load_or_create(db, run_key).await?;
        Ok(Some(ledger.snapshot().await?))
    }

    // =========================================================================
    // Estimate
    // =========================================================================

    /// Extract, clean and chunk in memory and evaluate the cost gate.
    ///
    /// Nothing is written and the translator is never called.
    pub async fn estimate(&self, inputs: &[PathBuf]) -> Result<EstimateReport, PipelineError> {
        self.config.validate().map_err(config_error)?;
        let (files, run_key) = self.resolve_inputs(inputs).await?;

        let documents = self.extract_documents(&files).await?;
        let documents = self.clean_documents(documents);
        let segments = self.chunk_documents(&documents)?;
        let store = SegmentStore::from_segments(segments)?;

        let estimator = self.estimator();
        let estimate = estimator.estimate(&store.unique_units(), self.translator.as_ref());
        let decision = CostEstimator::check(&estimate, self.config.cost.abort_threshold);

        Ok(EstimateReport {
            run_key: run_key.to_string(),
            documents: documents.len(),
            document_failures: document_failures(&documents),
            segment_count: store.len(),
            estimate,
            decision,
            currency: self.config.cost.currency.clone(),
        })
    }

    // =========================================================================
    // Run
    // =========================================================================

    /// Run or resume the pipeline for `inputs`.
    ///
    /// With `resume == false` an existing ledger entry for the run key is an
    /// error; call `force_restart` first to start over. The configuration is
    /// validated before the ledger is opened, so a rejected setting never
    /// costs a request.
    pub async fn run(&self, inputs: &[PathBuf], resume: bool) -> Result<RunResult, PipelineError> {
        self.config.validate().map_err(config_error)?;
        let (files, run_key) = self.resolve_inputs(inputs).await?;
        let sampler = QaSampler::from_config(&self.config.qa, run_key.seed()).map_err(config_error)?;
        let db = self.open_ledger_db()?;

        if !resume && RunLedger::is_resumable(&db, &run_key).await? {
            return Err(PipelineError::ExistingRun {
                run_key: run_key.to_string(),
            });
        }

        let (ledger, entry) = RunLedger::load_or_create(db, run_key.clone()).await?;
        self.events.emit(&PipelineEvent::RunStarted {
            run_key: run_key.to_string(),
            resumed_from: entry.stage,
            inputs: files.len(),
        });

        let mut result = RunResult::new(&run_key);

        // Extracted
        let documents = if self.skip(&entry, Stage::Extracted) {
            ledger.load_documents().await?
        } else {
            self.started(Stage::Extracted);
            let documents = self.extract_documents(&files).await?;
            ledger.save_documents(documents.clone()).await?;
            self.completed(&ledger, &mut result, Stage::Extracted).await?;
            documents
        };

        // Cleaned
        let documents = if self.skip(&entry, Stage::Cleaned) {
            documents
        } else {
            self.started(Stage::Cleaned);
            let documents = self.clean_documents(documents);
            ledger.save_documents(documents.clone()).await?;
            self.completed(&ledger, &mut result, Stage::Cleaned).await?;
            documents
        };
        result.document_failures = document_failures(&documents);

        // Chunked
        let segments = if self.skip(&entry, Stage::Chunked) {
            ledger.load_segments().await?
        } else {
            self.started(Stage::Chunked);
            let segments = self.chunk_documents(&documents)?;
            let units = SegmentStore::from_segments(segments.clone())?.unique_units();
            ledger.save_segments(segments.clone(), units).await?;
            self.completed(&ledger, &mut result, Stage::Chunked).await?;
            segments
        };
        let store = SegmentStore::from_segments(segments)?;
        result.segment_count = store.len();

        let units = load_units(&ledger).await?;

        // CostChecked
        if !self.skip(&entry, Stage::CostChecked) {
            self.started(Stage::CostChecked);
            let remaining: Vec<CanonicalUnit> = units
                .iter()
                .filter(|u| u.status.needs_translation())
                .cloned()
                .collect();
            let estimate = self.estimator().estimate(&remaining, self.translator.as_ref());
            let decision = CostEstimator::check(&estimate, self.config.cost.abort_threshold);
            result.estimate = Some(estimate);
            self.events.emit(&PipelineEvent::CostChecked { estimate, decision });

            if let CostDecision::Abort {
                projected_cost,
                threshold,
            } = decision
            {
                let reason = format!(
                    "projected cost {:.4} {} exceeds threshold {:.4}",
                    projected_cost, self.config.cost.currency, threshold
                );
                return self.finish_aborted(&ledger, result, reason).await;
            }

            ledger.clear_abort().await?;
            self.completed(&ledger, &mut result, Stage::CostChecked).await?;
        }

        // Translated, re-entered for leftovers of an earlier invocation
        let leftovers = units.iter().filter(|u| u.status.needs_translation()).count();
        let reentered = entry.is_complete(Stage::Translated) && leftovers > 0;
        if reentered {
            info!("Retrying {} units left over from an earlier invocation", leftovers);
        }

        if !entry.is_complete(Stage::Translated) || reentered {
            self.started(Stage::Translated);
            let executor = BatchExecutor::new(
                self.translator.clone(),
                ledger.clone(),
                self.estimator(),
                ExecutorSettings::from_config(&self.config),
                self.events.clone(),
            );
            let report = executor.execute(&units).await?;
            debug!("Execution report: {:?}", report);

            if let Some(abort) = report.cost_abort {
                let reason = format!(
                    "accumulated cost {:.4} {} exceeds threshold {:.4}",
                    abort.accumulated_cost, self.config.cost.currency, abort.threshold
                );
                return self.finish_aborted(&ledger, result, reason).await;
            }

            ledger.clear_abort().await?;
            self.completed(&ledger, &mut result, Stage::Translated).await?;
        } else {
            self.skipped(Stage::Translated);
        }

        let units = load_units(&ledger).await?;

        // QaValidated
        let mut qa_report: Option<QaReport> = None;
        if !entry.is_complete(Stage::QaValidated) || reentered {
            self.started(Stage::QaValidated);
            let report = sampler.run(&units);
            ledger.record_qa(report.sampled, report.passed).await?;
            self.events.emit(&PipelineEvent::QaCompleted {
                sampled: report.sampled,
                passed: report.passed,
            });
            qa_report = Some(report);
            self.completed(&ledger, &mut result, Stage::QaValidated).await?;
        } else {
            self.skipped(Stage::QaValidated);
        }

        // Exported
        if !entry.is_complete(Stage::Exported) || reentered {
            self.started(Stage::Exported);
            // Sampling is deterministic, so a skipped QA stage is recomputed for the side file
            let report = qa_report.take().unwrap_or_else(|| sampler.run(&units));
            let rows = store.expand_available(&units);
            let failed: Vec<FailedUnit> = ledger
                .load_units()
                .await?
                .iter()
                .filter(|u| matches!(u.status, UnitStatus::FailedTransient | UnitStatus::FailedPermanent))
                .map(FailedUnit::from)
                .collect();

            let exporter = DatasetExporter::new(&self.config.outputs);
            let failures = report.failures();
            result.export = Some(exporter.export(&rows, &failures, &failed).map_err(export_error)?);
            result.qa_failures = failures;
            self.completed(&ledger, &mut result, Stage::Exported).await?;
        } else {
            self.skipped(Stage::Exported);
            if let Some(report) = qa_report {
                result.qa_failures = report.failures();
            }
        }

        let final_entry = ledger.entry().await?;
        result.tally(&units);
        result.total_cost = final_entry.accumulated_cost;
        result.record_qa(final_entry.qa_sampled, final_entry.qa_passed);

        let metadata = RunMetadata::new(
            &result,
            self.translator.describe(),
            &self.config.translation.source_language,
            &self.config.translation.target_language,
            self.config.pipeline.chunk_size,
            &self.config.cost.currency,
        );
        DatasetExporter::new(&self.config.outputs)
            .write_metadata(&metadata)
            .map_err(export_error)?;

        self.finished(&result);
        Ok(result)
    }

    async fn finish_aborted(
        &self,
        ledger: &RunLedger,
        mut result: RunResult,
        reason: String,
    ) -> Result<RunResult, PipelineError> {
        warn!("Run {} aborted: {}", ledger.run_key().short(), reason);
        ledger.record_abort(&reason).await?;

        let units = load_units(ledger).await?;
        result.tally(&units);
        result.total_cost = ledger.accumulated_cost().await?;
        result.abort(reason);

        self.finished(&result);
        Ok(result)
    }

    // =========================================================================
    // Stage bodies
    // =========================================================================

    async fn extract_documents(&self, files: &[PathBuf]) -> Result<Vec<DocumentRecord>, PipelineError> {
        let extractor = Extractor::new(&self.config.extraction);
        let files = files.to_vec();

        let documents = tokio::task::spawn_blocking(move || {
            files
                .iter()
                .enumerate()
                .map(|(position, path)| {
                    let source_ref = FileManager::source_ref(path);
                    match extractor.extract(path) {
                        Ok(text) => DocumentRecord {
                            position,
                            source_ref,
                            raw_text: Some(text),
                            cleaned_text: None,
                            error: None,
                        },
                        Err(e) => DocumentRecord {
                            position,
                            source_ref,
                            raw_text: None,
                            cleaned_text: None,
                            error: Some(e.to_string()),
                        },
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| PipelineError::Task(format!("extraction worker: {}", e)))?;

        for document in &documents {
            if let Some(error) = &document.error {
                self.events.emit(&PipelineEvent::DocumentFailed {
                    source_ref: document.source_ref.clone(),
                    error: error.clone(),
                });
            }
        }
        Ok(documents)
    }

    fn clean_documents(&self, documents: Vec<DocumentRecord>) -> Vec<DocumentRecord> {
        let cleaner = TextCleaner::new(&self.config.cleaning);

        documents
            .into_iter()
            .map(|mut document| {
                document.cleaned_text = document.raw_text.as_deref().map(|raw| cleaner.clean(raw));
                document
            })
            .collect()
    }

    /// Chunk every readable document, numbering segments across documents
    fn chunk_documents(&self, documents: &[DocumentRecord]) -> Result<Vec<Segment>, PipelineError> {
        let mut segments = Vec::new();

        for document in documents {
            let Some(text) = document.cleaned_text.as_deref() else {
                continue;
            };
            let next_ordinal = segments.len() as u64;
            segments.extend(chunk_text(
                text,
                self.config.pipeline.chunk_size,
                &document.source_ref,
                next_ordinal,
            )?);
        }

        Ok(segments)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Whether `stage` completed in an earlier invocation; reports the skip
    fn skip(&self, entry: &LedgerEntry, stage: Stage) -> bool {
        let done = entry.is_complete(stage);
        if done {
            self.skipped(stage);
        }
        done
    }

    fn started(&self, stage: Stage) {
        self.events.emit(&PipelineEvent::StageStarted { stage });
    }

    fn skipped(&self, stage: Stage) {
        self.events.emit(&PipelineEvent::StageSkipped { stage });
    }

    async fn completed(&self, ledger: &RunLedger, result: &mut RunResult, stage: Stage) -> Result<(), PipelineError> {
        ledger.mark_stage(stage).await?;
        result.stages_run.push(stage);
        self.events.emit(&PipelineEvent::StageCompleted { stage });
        Ok(())
    }

    fn finished(&self, result: &RunResult) {
        self.events.emit(&PipelineEvent::RunFinished {
            succeeded: result.succeeded_count,
            failed_transient: result.failed_transient_count,
            failed_permanent: result.failed_permanent_count,
            aborted: result.aborted,
        });
    }
}

async fn load_units(ledger: &RunLedger) -> Result<Vec<CanonicalUnit>, LedgerError> {
    Ok(ledger
        .load_units()
        .await?
        .into_iter()
        .map(CanonicalUnit::from)
        .collect())
}

fn document_failures(documents: &[DocumentRecord]) -> Vec<DocumentFailure> {
    documents
        .iter()
        .filter_map(|d| {
            d.error.as_ref().map(|error| DocumentFailure {
                source_ref: d.source_ref.clone(),
                error: error.clone(),
            })
        })
        .collect()
}

fn input_error(error: anyhow::Error) -> PipelineError {
    PipelineError::Input(format!("{:#}", error))
}

fn config_error(error: anyhow::Error) -> PipelineError {
    PipelineError::Config(format!("{:#}", error))
}

fn export_error(error: anyhow::Error) -> PipelineError {
    PipelineError::Export(format!("{:#}", error))
}
