/*!
 * Resumption after failed and interrupted runs
 */

use std::collections::HashSet;

use anyhow::Result;
use nicoforge::ledger::{Stage, UnitStatus};
use nicoforge::pipeline::PipelineEvent;
use nicoforge::providers::{MockBehavior, MockTranslator};

use crate::common::{TestWorkspace, distinct_text};

/// Test that a rerun only submits what the first run did not finish
#[tokio::test]
async fn test_rerun_afterTransientFailures_shouldOnlySubmitLeftovers() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &distinct_text(10))?;
    let mut config = workspace.config();
    config.pipeline.batch_size = 1;
    config.retry.max_attempts = 1;

    let outage = MockTranslator::new(MockBehavior::FailAfter { successes: 4 });
    let (pipeline, _) = workspace.pipeline(config.clone(), &outage);
    let first = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert_eq!(first.succeeded_count, 4);
    assert_eq!(first.failed_transient_count, 6);
    assert!(!first.aborted);
    let translated_first: HashSet<String> = outage.submitted_texts().into_iter().take(4).collect();

    let healthy = MockTranslator::uppercase();
    let (pipeline, events) = workspace.pipeline(config, &healthy);
    let second = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert_eq!(second.succeeded_count, 10);
    assert!(healthy.unit_requests() <= 10 - 4);
    assert!(healthy
        .submitted_texts()
        .iter()
        .all(|text| !translated_first.contains(text)));
    assert_eq!(
        second.stages_run,
        vec![Stage::Translated, Stage::QaValidated, Stage::Exported]
    );
    assert_eq!(
        events.count(|e| matches!(e, PipelineEvent::StageSkipped { .. })),
        4
    );
    assert_eq!(workspace.dataset_rows()?.len(), 10);
    Ok(())
}

/// Test that one flaky unit is retried in isolation and resubmitted alone
#[tokio::test]
async fn test_rerun_withFlakyUnit_shouldResubmitOnlyThatUnit() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let text = distinct_text(10);
    workspace.write_input("corpus.txt", &text)?;
    let flaky_text = text.lines().nth(3).unwrap_or_default().to_string();
    let mut config = workspace.config();
    config.pipeline.batch_size = 1;

    let flaky = MockTranslator::uppercase().with_flaky_texts([flaky_text.clone()]);
    let (pipeline, _) = workspace.pipeline(config.clone(), &flaky);
    let first = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert_eq!(first.succeeded_count, 9);
    assert_eq!(first.failed_transient_count, 1);
    // Nine first-attempt successes plus three attempts for the flaky unit
    assert_eq!(flaky.request_count(), 12);

    let failed_units = workspace.read_json("failed_units.json")?;
    assert_eq!(failed_units[0]["source_text"], flaky_text.as_str());
    assert_eq!(failed_units[0]["status"], "failed_transient");
    assert_eq!(failed_units[0]["attempts"], 3);
    assert_eq!(workspace.dataset_rows()?.len(), 9);

    let healthy = MockTranslator::uppercase();
    let (pipeline, _) = workspace.pipeline(config, &healthy);
    let second = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert_eq!(healthy.submitted_texts(), vec![flaky_text]);
    assert_eq!(second.succeeded_count, 10);
    assert_eq!(workspace.read_json("failed_units.json")?, serde_json::json!([]));
    Ok(())
}

/// Test that a permanently rejected unit is never sent again
#[tokio::test]
async fn test_rerun_withPermanentFailure_shouldNotResubmit() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let text = distinct_text(4);
    workspace.write_input("corpus.txt", &text)?;
    let poisoned_text = text.lines().next().unwrap_or_default().to_string();
    let mut config = workspace.config();
    config.pipeline.batch_size = 1;

    let rejecting = MockTranslator::uppercase().with_poisoned_texts([poisoned_text.clone()]);
    let (pipeline, _) = workspace.pipeline(config.clone(), &rejecting);
    let first = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert_eq!(first.failed_permanent_count, 1);
    assert_eq!(first.failed_permanent.len(), 1);
    assert_eq!(first.succeeded_count, 3);

    let healthy = MockTranslator::uppercase();
    let (pipeline, _) = workspace.pipeline(config, &healthy);
    let second = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert_eq!(healthy.request_count(), 0);
    assert_eq!(second.failed_permanent, first.failed_permanent);
    assert!(second.stages_run.is_empty());
    Ok(())
}

/// Test that a finished run is not redone
#[tokio::test]
async fn test_rerun_afterCompletion_shouldSkipEveryStage() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &distinct_text(5))?;
    let translator = MockTranslator::uppercase().with_cost_per_word(0.25);
    let (pipeline, _) = workspace.pipeline(workspace.config(), &translator);

    let first = pipeline.run(&[workspace.inputs_dir()], true).await?;
    assert_eq!(first.total_cost, 2.5);

    let idle = MockTranslator::uppercase().with_cost_per_word(0.25);
    let (pipeline, events) = workspace.pipeline(workspace.config(), &idle);
    let second = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert_eq!(idle.request_count(), 0);
    assert!(second.stages_run.is_empty());
    assert_eq!(
        events.count(|e| matches!(e, PipelineEvent::StageSkipped { .. })),
        Stage::ALL.len()
    );
    assert_eq!(second.succeeded_count, 5);
    assert_eq!(second.total_cost, first.total_cost);
    assert_eq!(second.qa_sampled, first.qa_sampled);
    Ok(())
}

/// Test that changing the chunk size starts a separate run
#[tokio::test]
async fn test_run_withDifferentChunkSize_shouldUseNewRunKey() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &distinct_text(4))?;
    let translator = MockTranslator::uppercase();

    let (pipeline, _) = workspace.pipeline(workspace.config(), &translator);
    let first = pipeline.run(&[workspace.inputs_dir()], true).await?;

    let mut config = workspace.config();
    config.pipeline.chunk_size = 4;
    let (pipeline, _) = workspace.pipeline(config, &translator);
    let second = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert_ne!(first.run_key, second.run_key);
    assert_eq!(second.unit_count, 2);
    assert_eq!(second.stages_run, Stage::ALL.to_vec());

    let snapshot = pipeline.snapshot(&[workspace.inputs_dir()]).await?;
    let units = snapshot.map(|s| s.units).unwrap_or_default();
    assert!(units.values().all(|status| *status == UnitStatus::Succeeded));
    Ok(())
}
