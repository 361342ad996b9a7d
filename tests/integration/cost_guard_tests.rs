/*!
 * Cost gate and spend threshold behavior
 */

use anyhow::Result;
use nicoforge::cost::CostDecision;
use nicoforge::ledger::{Stage, UnitStatus};
use nicoforge::pipeline::PipelineEvent;
use nicoforge::providers::{MockBehavior, MockTranslator};

use crate::common::{TestWorkspace, distinct_text};

/// Test that an over-budget projection stops the run before any request
#[tokio::test]
async fn test_run_withProjectionOverThreshold_shouldAbortBeforeSpending() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &distinct_text(10))?;
    let translator = MockTranslator::uppercase().with_cost_per_word(7.5);
    let mut config = workspace.config();
    config.cost.abort_threshold = Some(100.0);
    let (pipeline, events) = workspace.pipeline(config, &translator);

    let result = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert!(result.aborted);
    assert!(result.abort_reason.as_deref().is_some_and(|r| r.contains("projected cost")));
    assert_eq!(result.estimate.map(|e| e.projected_cost), Some(150.0));
    assert_eq!(result.pending_count, 10);
    assert_eq!(result.total_cost, 0.0);
    assert_eq!(translator.request_count(), 0);
    assert_eq!(
        events.count(|e| matches!(
            e,
            PipelineEvent::CostChecked {
                decision: CostDecision::Abort { .. },
                ..
            }
        )),
        1
    );
    assert!(!workspace.output_dir().join("dataset.csv").exists());

    let snapshot = pipeline.snapshot(&[workspace.inputs_dir()]).await?;
    let snapshot = snapshot.ok_or_else(|| anyhow::anyhow!("ledger entry missing"))?;
    assert_eq!(snapshot.stage, Some(Stage::Chunked));
    assert!(snapshot.aborted);
    assert!(snapshot.units.values().all(|s| *s == UnitStatus::Pending));
    Ok(())
}

/// Test that raising the threshold lets the same run continue from the gate
#[tokio::test]
async fn test_rerun_withRaisedThreshold_shouldProceedFromGate() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &distinct_text(10))?;
    let translator = MockTranslator::uppercase().with_cost_per_word(7.5);

    let mut config = workspace.config();
    config.cost.abort_threshold = Some(100.0);
    let (pipeline, _) = workspace.pipeline(config.clone(), &translator);
    let aborted = pipeline.run(&[workspace.inputs_dir()], true).await?;
    assert!(aborted.aborted);

    config.cost.abort_threshold = Some(200.0);
    let (pipeline, _) = workspace.pipeline(config, &translator);
    let result = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert_eq!(result.run_key, aborted.run_key);
    assert!(!result.aborted);
    assert_eq!(result.succeeded_count, 10);
    assert_eq!(result.total_cost, 150.0);
    assert_eq!(result.stages_run.first(), Some(&Stage::CostChecked));
    assert_eq!(translator.unit_requests(), 10);

    let snapshot = pipeline.snapshot(&[workspace.inputs_dir()]).await?;
    assert_eq!(snapshot.map(|s| s.aborted), Some(false));
    Ok(())
}

/// Test that accumulated spend past the threshold stops dispatching mid-run
#[tokio::test]
async fn test_run_withSpendReachingThreshold_shouldStopAndResumeLater() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("corpus.txt", &distinct_text(10))?;
    let mut config = workspace.config();
    config.pipeline.batch_size = 1;
    config.retry.max_attempts = 1;

    // First invocation: no threshold, four units succeed at 2.0 each
    let outage = MockTranslator::new(MockBehavior::FailAfter { successes: 4 }).with_cost_per_word(1.0);
    let (pipeline, _) = workspace.pipeline(config.clone(), &outage);
    let first = pipeline.run(&[workspace.inputs_dir()], true).await?;
    assert_eq!(first.succeeded_count, 4);
    assert_eq!(first.total_cost, 8.0);

    // Second invocation: spend may not exceed 12.0, so the third unit trips it
    config.cost.abort_threshold = Some(12.0);
    let capped = MockTranslator::uppercase().with_cost_per_word(1.0);
    let (pipeline, events) = workspace.pipeline(config.clone(), &capped);
    let second = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert!(second.aborted);
    assert!(second.abort_reason.as_deref().is_some_and(|r| r.contains("accumulated cost")));
    assert_eq!(capped.request_count(), 3);
    assert_eq!(second.succeeded_count, 7);
    assert_eq!(second.total_cost, 14.0);
    assert_eq!(
        events.count(|e| matches!(e, PipelineEvent::CostAborted { .. })),
        1
    );

    // Third invocation: threshold lifted, only the three leftovers are sent
    config.cost.abort_threshold = None;
    let unlimited = MockTranslator::uppercase().with_cost_per_word(1.0);
    let (pipeline, _) = workspace.pipeline(config, &unlimited);
    let third = pipeline.run(&[workspace.inputs_dir()], true).await?;

    assert!(!third.aborted);
    assert_eq!(unlimited.unit_requests(), 3);
    assert_eq!(third.succeeded_count, 10);
    assert_eq!(third.total_cost, 20.0);
    assert_eq!(workspace.dataset_rows()?.len(), 10);
    Ok(())
}
