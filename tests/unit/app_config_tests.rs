/*!
 * Tests for application configuration functionality
 */

use anyhow::Result;
use nicoforge::app_config::{Config, LogLevel, PricingMode, TranslationProvider};

use crate::common::TestWorkspace;

/// Test that a missing config file is created with defaults
#[test]
fn test_loadOrCreate_withMissingFile_shouldWriteDefaults() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let path = workspace.root().join("nicoforge.json");

    let config = Config::load_or_create(&path)?;

    assert!(path.exists());
    assert_eq!(config.pipeline.chunk_size, 300);
    assert_eq!(config.translation.provider, TranslationProvider::OpenRouter);
    assert_eq!(config.log_level, LogLevel::Info);

    // Reloading the written file gives the same values
    let reloaded = Config::load_or_create(&path)?;
    assert_eq!(reloaded.pipeline, config.pipeline);
    assert_eq!(reloaded.translation, config.translation);
    Ok(())
}

/// Test that an existing file is read rather than replaced
#[test]
fn test_loadOrCreate_withExistingFile_shouldKeepItsValues() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let path = workspace.root().join("custom.json");
    std::fs::write(
        &path,
        r#"{
            "pipeline": { "chunk_size": 64, "concurrency": 2 },
            "translation": { "provider": "mock", "target_language": "ta" },
            "cost": { "pricing": "per_word", "rate_per_word": 0.25, "abort_threshold": 40.0 },
            "qa": { "target_script": "tamil" },
            "log_level": "debug"
        }"#,
    )?;

    let config = Config::load_or_create(&path)?;

    assert_eq!(config.pipeline.chunk_size, 64);
    assert_eq!(config.pipeline.batch_size, 20);
    assert_eq!(config.pipeline.concurrency, 2);
    assert_eq!(config.translation.provider, TranslationProvider::Mock);
    assert_eq!(config.translation.target_language, "ta");
    assert_eq!(config.cost.pricing, PricingMode::PerWord);
    assert_eq!(config.cost.abort_threshold, Some(40.0));
    assert_eq!(config.log_level, LogLevel::Debug);
    assert!(config.validate().is_ok());
    Ok(())
}

/// Test configuration validation
#[test]
fn test_validate_withVariousConfigs_shouldValidateCorrectly() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let mut config = workspace.config();
    assert!(config.validate().is_ok());

    // Unknown language code
    config.translation.target_language = "not-a-language".to_string();
    assert!(config.validate().is_err());
    config.translation.target_language = "hi".to_string();

    // Zero sizes
    config.pipeline.batch_size = 0;
    assert!(config.validate().is_err());
    config.pipeline.batch_size = 2;

    // Out of range sample rate
    config.qa.sample_rate = 1.5;
    assert!(config.validate().is_err());
    config.qa.sample_rate = 0.01;

    // Unknown script
    config.qa.target_script = "klingon".to_string();
    assert!(config.validate().is_err());
    config.qa.target_script = "deva".to_string();
    assert!(config.validate().is_ok());

    // OpenRouter needs credentials and a valid endpoint
    config.translation.provider = TranslationProvider::OpenRouter;
    assert!(config.validate().is_err());
    config.translation.api_key = "sk-test".to_string();
    assert!(config.validate().is_ok());
    config.translation.endpoint = "not a url".to_string();
    assert!(config.validate().is_err());
    Ok(())
}

/// Test that environment style overrides win over file values
#[test]
fn test_applyOverrides_afterLoading_shouldReplaceFileValues() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let mut config = workspace.config();

    config.apply_overrides(|name| match name {
        "BATCH_SIZE" => Some("7".to_string()),
        "MAX_COST" => Some("12.5".to_string()),
        _ => None,
    })?;

    assert_eq!(config.pipeline.batch_size, 7);
    assert_eq!(config.pipeline.chunk_size, 2);
    assert_eq!(config.cost.abort_threshold, Some(12.5));
    Ok(())
}
