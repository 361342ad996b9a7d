/*!
 * Tests for the run state ledger on disk
 */

use anyhow::Result;
use nicoforge::errors::LedgerError;
use nicoforge::ledger::{
    DatabaseConnection, InputFingerprint, RunKey, RunLedger, RunParameters, Stage, UnitStatus,
    UnitUpdate,
};
use nicoforge::segments::{SegmentStore, chunk_text};

use crate::common::TestWorkspace;

fn run_key(content: &str) -> RunKey {
    RunKey::derive(
        &[InputFingerprint {
            source_ref: "doc.txt".to_string(),
            content_hash: content.to_string(),
        }],
        &RunParameters {
            chunk_size: 2,
            source_language: "en".to_string(),
            target_language: "hi".to_string(),
        },
    )
}

async fn seeded_ledger(db: DatabaseConnection, key: RunKey) -> Result<(RunLedger, Vec<String>)> {
    let segments = chunk_text("alpha beta gamma delta alpha beta", 2, "doc.txt", 0)?;
    let units = SegmentStore::from_segments(segments.clone())?.unique_units();
    let hashes = units.iter().map(|u| u.content_hash.clone()).collect();

    let (ledger, _) = RunLedger::load_or_create(db, key).await?;
    for stage in [Stage::Extracted, Stage::Cleaned] {
        ledger.mark_stage(stage).await?;
    }
    ledger.save_segments(segments, units).await?;
    ledger.mark_stage(Stage::Chunked).await?;
    Ok((ledger, hashes))
}

/// Test that committed state survives closing and reopening the file
#[tokio::test]
async fn test_ledger_afterReopen_shouldKeepCommittedState() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let path = workspace.root().join("ledger.db");
    let key = run_key("v1");

    {
        let (ledger, hashes) = seeded_ledger(DatabaseConnection::new(&path)?, key.clone()).await?;
        ledger.mark_unit(&hashes[0], UnitStatus::Translating, 0.0).await?;
        ledger
            .apply_updates(vec![UnitUpdate::succeeded(&hashes[0], "अल्फा बीटा".to_string(), 2.5)])
            .await?;
    }

    let db = DatabaseConnection::new(&path)?;
    assert!(RunLedger::is_resumable(&db, &key).await?);

    let (ledger, entry) = RunLedger::load_or_create(db, key).await?;
    assert_eq!(entry.stage, Some(Stage::Chunked));
    assert_eq!(entry.accumulated_cost, 2.5);
    assert_eq!(entry.count(UnitStatus::Succeeded), 1);
    assert_eq!(entry.count(UnitStatus::Pending), 1);

    let units = ledger.load_units().await?;
    assert_eq!(units[0].translated_text.as_deref(), Some("अल्फा बीटा"));
    assert_eq!(units[0].attempts, 1);
    assert_eq!(ledger.load_segments().await?.len(), 3);
    Ok(())
}

/// Test that a succeeded unit can never move back
#[tokio::test]
async fn test_applyUpdates_withBackwardsTransition_shouldRejectWholeBatch() -> Result<()> {
    let (ledger, hashes) = seeded_ledger(DatabaseConnection::new_in_memory()?, run_key("v2")).await?;
    ledger.mark_unit(&hashes[0], UnitStatus::Translating, 0.0).await?;
    ledger
        .apply_updates(vec![UnitUpdate::succeeded(&hashes[0], "done".to_string(), 1.0)])
        .await?;

    let result = ledger
        .apply_updates(vec![
            UnitUpdate::status(&hashes[1], UnitStatus::Translating),
            UnitUpdate::status(&hashes[0], UnitStatus::Translating),
        ])
        .await;

    assert!(matches!(result, Err(LedgerError::InvalidTransition { .. })));
    // The first update was rolled back with the second
    let units = ledger.load_units().await?;
    assert_eq!(units[1].status, UnitStatus::Pending);
    assert_eq!(ledger.accumulated_cost().await?, 1.0);
    Ok(())
}

/// Test that stages cannot be skipped
#[tokio::test]
async fn test_markStage_outOfOrder_shouldFail() -> Result<()> {
    let (ledger, _) = RunLedger::load_or_create(DatabaseConnection::new_in_memory()?, run_key("v3")).await?;

    let result = ledger.mark_stage(Stage::Chunked).await;
    assert!(matches!(result, Err(LedgerError::StageOrder { .. })));

    ledger.mark_stage(Stage::Extracted).await?;
    // Completing an earlier stage again is a no-op
    ledger.mark_stage(Stage::Extracted).await?;
    assert_eq!(ledger.entry().await?.stage, Some(Stage::Extracted));
    Ok(())
}

/// Test that a force restart removes only the targeted run
#[tokio::test]
async fn test_forceRestart_shouldClearOnlyThatRun() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let path = workspace.root().join("ledger.db");
    let kept = run_key("kept");
    let dropped = run_key("dropped");

    seeded_ledger(DatabaseConnection::new(&path)?, kept.clone()).await?;
    seeded_ledger(DatabaseConnection::new(&path)?, dropped.clone()).await?;

    let db = DatabaseConnection::new(&path)?;
    RunLedger::force_restart(&db, &dropped).await?;

    assert!(RunLedger::is_resumable(&db, &kept).await?);
    assert!(!RunLedger::is_resumable(&db, &dropped).await?);
    Ok(())
}
