/*!
 * End-to-end pipeline runs against the mock translator
 */

use std::collections::HashSet;

use anyhow::Result;
use nicoforge::errors::{LedgerError, PipelineError};
use nicoforge::ledger::Stage;
use nicoforge::pipeline::PipelineEvent;
use nicoforge::providers::{MockBehavior, MockTranslator};

use crate::common::{TestWorkspace, distinct_text};

/// Ten distinct two-word lines followed by two copies of the first one
fn text_with_repeats() -> String {
    let distinct = distinct_text(10);
    let first = distinct.lines().next().unwrap_or_default().to_string();
    format!("{}\n{}\n{}", distinct, first, first)
}

/// Test that every distinct text is requested exactly once
#[tokio::test]
async fn test_run_withRepeatedSegments_shouldRequestEachTextOnce() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &text_with_repeats())?;
    let translator = MockTranslator::uppercase();
    let (pipeline, events) = workspace.pipeline(workspace.config(), &translator);

    let result = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert_eq!(result.segment_count, 12);
    assert_eq!(result.unit_count, 10);
    assert_eq!(result.succeeded_count, 10);
    assert!(!result.aborted);
    assert_eq!(result.stages_run, Stage::ALL.to_vec());
    assert_eq!(events.completed_stages(), Stage::ALL.to_vec());

    let submitted = translator.submitted_texts();
    assert_eq!(submitted.len(), 10);
    assert_eq!(submitted.iter().collect::<HashSet<_>>().len(), 10);
    // Two units per batch
    assert_eq!(translator.request_count(), 5);
    Ok(())
}

/// Test that the dataset holds every segment in ordinal order, duplicates included
#[tokio::test]
async fn test_run_shouldExportRowsInOrdinalOrder() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &text_with_repeats())?;
    let translator = MockTranslator::uppercase();
    let (pipeline, _) = workspace.pipeline(workspace.config(), &translator);

    let result = pipeline.run(&[workspace.inputs_dir()], true).await?;
    let rows = workspace.dataset_rows()?;

    assert_eq!(result.export.as_ref().map(|e| e.rows), Some(12));
    let ordinals: Vec<u64> = rows.iter().map(|r| r.ordinal).collect();
    assert_eq!(ordinals, (0..12).collect::<Vec<u64>>());

    for row in &rows {
        assert_eq!(row.translated_text, row.source_text.to_uppercase());
    }
    assert!(!rows[0].is_duplicate);
    assert!(rows[10].is_duplicate && rows[11].is_duplicate);
    assert_eq!(rows[10].content_hash, rows[0].content_hash);

    let json = workspace.read_json("dataset.json")?;
    assert_eq!(json.as_array().map(|a| a.len()), Some(12));
    let metadata = workspace.read_json("metadata.json")?;
    assert_eq!(metadata["result"]["succeeded_count"], 10);
    assert_eq!(metadata["provider"]["provider_name"], "mock");
    Ok(())
}

/// Test that segments from several documents are numbered across documents
#[tokio::test]
async fn test_run_withSeveralDocuments_shouldNumberAcrossDocuments() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("a.txt", "alpha beta gamma delta")?;
    workspace.write_input("b.md", "epsilon zeta")?;
    let translator = MockTranslator::uppercase();
    let (pipeline, _) = workspace.pipeline(workspace.config(), &translator);

    pipeline.run(&[workspace.inputs_dir()], true).await?;
    let rows = workspace.dataset_rows()?;

    let summary: Vec<(u64, &str, bool)> = rows
        .iter()
        .map(|r| (r.ordinal, r.source_text.as_str(), r.source_ref.ends_with("b.md")))
        .collect();
    assert_eq!(
        summary,
        vec![(0, "alpha beta", false), (1, "gamma delta", false), (2, "epsilon zeta", true)]
    );
    Ok(())
}

/// Test that an unreadable document is reported without failing the run
#[tokio::test]
async fn test_run_withUnreadableDocument_shouldContinueWithTheRest() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let good = workspace.write_input("good.txt", &distinct_text(3))?;
    let pdf = workspace.write_input("paper.pdf", "%PDF-1.7 binary")?;
    let translator = MockTranslator::uppercase();
    let (pipeline, events) = workspace.pipeline(workspace.config(), &translator);

    let result = pipeline.run(&[good, pdf], true).await?;

    assert_eq!(result.document_failures.len(), 1);
    assert!(result.document_failures[0].source_ref.ends_with("paper.pdf"));
    assert_eq!(result.succeeded_count, 3);
    assert_eq!(
        events.count(|e| matches!(e, PipelineEvent::DocumentFailed { .. })),
        1
    );
    Ok(())
}

/// Test that empty translations are flagged by QA and still exported
#[tokio::test]
async fn test_run_withEmptyTranslations_shouldReportQaFailures() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &distinct_text(6))?;
    let translator = MockTranslator::new(MockBehavior::Empty);
    let (pipeline, _) = workspace.pipeline(workspace.config(), &translator);

    let result = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert_eq!(result.succeeded_count, 6);
    assert_eq!(result.qa_sampled, 6);
    assert_eq!(result.qa_passed, 0);
    assert_eq!(result.qa_pass_rate, 0.0);
    assert_eq!(result.qa_failures.len(), 6);

    let failed = workspace.read_json("qa_failed.json")?;
    let records = failed.as_array().cloned().unwrap_or_default();
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| {
        r["reasons"]
            .as_array()
            .is_some_and(|reasons| reasons.iter().any(|reason| reason == "empty_output"))
    }));

    let snapshot = pipeline.snapshot(&[workspace.inputs_dir()]).await?;
    assert_eq!(snapshot.and_then(|s| s.stage), Some(Stage::Exported));
    Ok(())
}

/// Test that QA selection is identical for the same run key
#[tokio::test]
async fn test_run_afterForceRestart_shouldSampleTheSameUnits() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &distinct_text(10))?;
    let mut config = workspace.config();
    // Uppercased Latin never passes a Devanagari check, so every sample is listed
    config.qa.target_script = "devanagari".to_string();
    config.qa.sample_rate = 0.25;
    config.qa.min_samples = 2;

    let translator = MockTranslator::uppercase();
    let (pipeline, _) = workspace.pipeline(config, &translator);

    let first = pipeline.run(&[workspace.inputs_dir()], true).await?;
    let first_hashes: Vec<String> = first.qa_failures.iter().map(|r| r.content_hash.clone()).collect();

    let run_key = pipeline.run_key_for(&[workspace.inputs_dir()]).await?;
    pipeline.force_restart(&run_key).await?;
    let second = pipeline.run(&[workspace.inputs_dir()], true).await?;
    let second_hashes: Vec<String> = second.qa_failures.iter().map(|r| r.content_hash.clone()).collect();

    assert_eq!(first.qa_sampled, 3);
    assert_eq!(first_hashes.len(), 3);
    assert_eq!(first_hashes, second_hashes);
    Ok(())
}

/// Test that estimating touches neither the ledger nor the provider
#[tokio::test]
async fn test_estimate_shouldWriteNothingAndSendNothing() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &text_with_repeats())?;
    let translator = MockTranslator::uppercase().with_cost_per_word(0.5);
    let mut config = workspace.config();
    config.cost.abort_threshold = Some(5.0);
    let (pipeline, _) = workspace.pipeline(config, &translator);

    let report = pipeline.estimate(&[workspace.inputs_dir()]).await?;

    assert_eq!(report.segment_count, 12);
    assert_eq!(report.estimate.unit_count, 10);
    assert_eq!(report.estimate.word_count, 20);
    assert_eq!(report.estimate.projected_cost, 10.0);
    assert!(!report.decision.is_allowed());
    assert_eq!(translator.request_count(), 0);
    assert!(!workspace.output_dir().exists());
    Ok(())
}

/// Test that disabling resume refuses to touch an existing run
#[tokio::test]
async fn test_run_withoutResume_onExistingRun_shouldFail() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &distinct_text(2))?;
    let translator = MockTranslator::uppercase();
    let (pipeline, _) = workspace.pipeline(workspace.config(), &translator);

    pipeline.run(&[workspace.inputs_dir()], false).await?;
    let second = pipeline.run(&[workspace.inputs_dir()], false).await;
    assert!(matches!(second, Err(PipelineError::ExistingRun { .. })));

    let run_key = pipeline.run_key_for(&[workspace.inputs_dir()]).await?;
    pipeline.force_restart(&run_key).await?;
    let third = pipeline.run(&[workspace.inputs_dir()], false).await?;
    assert_eq!(third.succeeded_count, 2);
    assert_eq!(translator.unit_requests(), 4);
    Ok(())
}

/// Test that a ledger from another schema version is refused until a force restart
#[tokio::test]
async fn test_run_withIncompatibleLedger_shouldRequireForceRestart() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &distinct_text(2))?;
    let translator = MockTranslator::uppercase();
    let (pipeline, _) = workspace.pipeline(workspace.config(), &translator);

    pipeline.run(&[workspace.inputs_dir()], true).await?;
    {
        let conn = rusqlite::Connection::open(workspace.output_dir().join("ledger.db"))?;
        conn.execute("UPDATE schema_version SET version = 99", [])?;
    }

    let refused = pipeline.run(&[workspace.inputs_dir()], true).await;
    assert!(matches!(
        refused,
        Err(PipelineError::Ledger(LedgerError::Incompatible(_)))
    ));

    let run_key = pipeline.run_key_for(&[workspace.inputs_dir()]).await?;
    pipeline.force_restart(&run_key).await?;
    let result = pipeline.run(&[workspace.inputs_dir()], true).await?;
    assert_eq!(result.succeeded_count, 2);
    assert_eq!(result.stages_run, Stage::ALL.to_vec());
    Ok(())
}

/// Test that a rejected QA setting stops the run before anything is paid for
#[tokio::test]
async fn test_run_withUnknownTargetScript_shouldFailBeforeTranslating() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &distinct_text(4))?;
    let translator = MockTranslator::uppercase().with_cost_per_word(1.0);
    let mut config = workspace.config();
    config.qa.target_script = "klingon".to_string();
    let (pipeline, _) = workspace.pipeline(config, &translator);

    let result = pipeline.run(&[workspace.inputs_dir()], true).await;

    match result {
        Err(PipelineError::Config(message)) => assert!(message.contains("klingon"), "message: {}", message),
        other => panic!("expected a configuration error, got {:?}", other.map(|r| r.run_key)),
    }
    assert_eq!(translator.request_count(), 0);
    assert!(!workspace.output_dir().join("ledger.db").exists());
    Ok(())
}

/// Test that batches finishing out of order still export in document order
#[tokio::test]
async fn test_run_withConcurrentUnevenBatches_shouldExportInOrdinalOrder() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &text_with_repeats())?;
    let translator = MockTranslator::new(MockBehavior::Staggered {
        delays_ms: vec![40, 0, 25, 5],
    });
    let mut config = workspace.config();
    config.pipeline.batch_size = 1;
    config.pipeline.concurrency = 4;
    let (pipeline, _) = workspace.pipeline(config, &translator);

    let result = pipeline.run(&[workspace.inputs_dir()], true).await?;
    let rows = workspace.dataset_rows()?;

    assert_eq!(result.succeeded_count, 10);
    assert!(translator.peak_in_flight() <= 4, "peak was {}", translator.peak_in_flight());
    let ordinals: Vec<u64> = rows.iter().map(|r| r.ordinal).collect();
    assert_eq!(ordinals, (0..12).collect::<Vec<u64>>());
    for row in &rows {
        assert_eq!(row.translated_text, row.source_text.to_uppercase());
    }
    Ok(())
}

/// Test that a run without readable inputs is rejected
#[tokio::test]
async fn test_run_withEmptyDirectory_shouldReportNoInputs() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let translator = MockTranslator::uppercase();
    let (pipeline, _) = workspace.pipeline(workspace.config(), &translator);

    let result = pipeline.run(&[workspace.inputs_dir()], true).await;
    assert!(matches!(result, Err(PipelineError::NoInputs)));
    Ok(())
}
