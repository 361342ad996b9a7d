use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::{Path, PathBuf};

/// Application configuration module
/// This module handles loading, environment overrides, validation and
/// saving of the pipeline configuration (`nicoforge.json`).
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Chunking and execution sizes
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Translator selection and provider settings
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Cost estimation and abort threshold
    #[serde(default)]
    pub cost: CostConfig,

    /// Retry policy for transient provider failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// QA sampling and heuristics
    #[serde(default)]
    pub qa: QaConfig,

    /// Text cleaning switches
    #[serde(default)]
    pub cleaning: CleaningConfig,

    /// Input extraction limits
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Output file locations
    #[serde(default)]
    pub outputs: OutputConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation provider type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    // @provider: OpenRouter (OpenAI-compatible chat completions)
    #[default]
    OpenRouter,
    // @provider: Offline mock, uppercases its input
    Mock,
}

impl TranslationProvider {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::OpenRouter => "OpenRouter",
            Self::Mock => "Mock",
        }
    }

    // @returns: Lowercase provider identifier
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::OpenRouter => "openrouter".to_string(),
            Self::Mock => "mock".to_string(),
        }
    }
}

impl std::fmt::Display for TranslationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

impl std::str::FromStr for TranslationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "mock" => Ok(Self::Mock),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Words per segment
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Units per provider batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TranslationConfig {
    #[serde(default)]
    pub provider: TranslationProvider,

    /// Model identifier passed to the provider
    #[serde(default = "default_model")]
    pub model: String,

    /// API key for the service
    #[serde(default = "String::new")]
    pub api_key: String,

    /// Base URL of the chat completions API
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Source language code (ISO)
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Target language code (ISO)
    #[serde(default = "default_target_language")]
    pub target_language: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Pause between requests inside one batch
    #[serde(default)]
    pub request_delay_ms: u64,

    /// Provider pricing used by `estimate_cost`
    #[serde(default = "default_tokens_per_word")]
    pub tokens_per_word: f64,

    #[serde(default = "default_price_per_1k_tokens")]
    pub price_per_1k_tokens: f64,

    /// Custom prompt; `{source}`, `{target}` and `{text}` are substituted
    #[serde(default)]
    pub prompt_template: Option<String>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::default(),
            model: default_model(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            source_language: default_source_language(),
            target_language: default_target_language(),
            temperature: default_temperature(),
            request_delay_ms: 0,
            tokens_per_word: default_tokens_per_word(),
            price_per_1k_tokens: default_price_per_1k_tokens(),
            prompt_template: None,
        }
    }
}

/// Which price model the cost gate uses
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PricingMode {
    /// Ask the translator (`estimate_cost`)
    #[default]
    Provider,
    /// Flat `rate_per_word`
    PerWord,
    /// `tokens_per_word` × `rate_per_1k_tokens`
    PerToken,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CostConfig {
    #[serde(default)]
    pub pricing: PricingMode,

    #[serde(default)]
    pub rate_per_word: f64,

    #[serde(default = "default_tokens_per_word")]
    pub tokens_per_word: f64,

    #[serde(default)]
    pub rate_per_1k_tokens: f64,

    /// Display only
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Maximum allowed spend; no limit when absent
    #[serde(default)]
    pub abort_threshold: Option<f64>,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            pricing: PricingMode::default(),
            rate_per_word: 0.0,
            tokens_per_word: default_tokens_per_word(),
            rate_per_1k_tokens: 0.0,
            currency: default_currency(),
            abort_threshold: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per batch, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Upper bound of the random delay added to each backoff
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QaConfig {
    /// Fraction of succeeded units to validate
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Script the translation is expected to be written in
    #[serde(default = "default_target_script")]
    pub target_script: String,

    #[serde(default = "default_min_script_ratio")]
    pub min_script_ratio: f64,

    #[serde(default = "default_min_length_ratio")]
    pub min_length_ratio: f64,

    #[serde(default = "default_max_length_ratio")]
    pub max_length_ratio: f64,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            min_samples: default_min_samples(),
            target_script: default_target_script(),
            min_script_ratio: default_min_script_ratio(),
            min_length_ratio: default_min_length_ratio(),
            max_length_ratio: default_max_length_ratio(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CleaningConfig {
    #[serde(default = "default_true")]
    pub remove_urls: bool,

    #[serde(default = "default_true")]
    pub remove_emails: bool,

    #[serde(default = "default_true")]
    pub remove_references: bool,

    #[serde(default = "default_true")]
    pub normalize_whitespace: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            remove_urls: true,
            remove_emails: true,
            remove_references: true,
            normalize_whitespace: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExtractionConfig {
    /// Plain-text files above this size are decoded line by line instead of in one read
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

/// Output locations; file names are relative to `base_dir`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    #[serde(default = "default_dataset_csv")]
    pub dataset_csv: String,

    #[serde(default = "default_dataset_json")]
    pub dataset_json: String,

    #[serde(default = "default_qa_failed_json")]
    pub qa_failed_json: String,

    #[serde(default = "default_failed_units_json")]
    pub failed_units_json: String,

    #[serde(default = "default_metadata_json")]
    pub metadata_json: String,

    #[serde(default = "default_ledger_db")]
    pub ledger_db: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            dataset_csv: default_dataset_csv(),
            dataset_json: default_dataset_json(),
            qa_failed_json: default_qa_failed_json(),
            failed_units_json: default_failed_units_json(),
            metadata_json: default_metadata_json(),
            ledger_db: default_ledger_db(),
        }
    }
}

impl OutputConfig {
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.base_dir.join(file_name)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.path(&self.ledger_db)
    }
}

/// Log level
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(anyhow!("Invalid log level: {}", s)),
        }
    }
}

fn default_chunk_size() -> usize {
    300
}

fn default_batch_size() -> usize {
    20
}

fn default_concurrency() -> usize {
    4
}

fn default_model() -> String {
    "google/gemini-2.0-flash-thinking-exp:free".to_string()
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_source_language() -> String {
    "en".to_string()
}

fn default_target_language() -> String {
    "hi".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_tokens_per_word() -> f64 {
    1.5
}

// USD 0.001 per 1k tokens at 83 INR/USD
fn default_price_per_1k_tokens() -> f64 {
    0.083
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_jitter_ms() -> u64 {
    500
}

fn default_sample_rate() -> f64 {
    0.01
}

fn default_min_samples() -> usize {
    50
}

fn default_target_script() -> String {
    "devanagari".to_string()
}

fn default_min_script_ratio() -> f64 {
    0.7
}

fn default_min_length_ratio() -> f64 {
    0.5
}

fn default_max_length_ratio() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_max_file_size_mb() -> u64 {
    100
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_dataset_csv() -> String {
    "dataset.csv".to_string()
}

fn default_dataset_json() -> String {
    "dataset.json".to_string()
}

fn default_qa_failed_json() -> String {
    "qa_failed.json".to_string()
}

fn default_failed_units_json() -> String {
    "failed_units.json".to_string()
}

fn default_metadata_json() -> String {
    "metadata.json".to_string()
}

fn default_ledger_db() -> String {
    "ledger.db".to_string()
}

/// Environment variables that override file values
const ENV_CHUNK_SIZE: &str = "CHUNK_SIZE";
const ENV_BATCH_SIZE: &str = "BATCH_SIZE";
const ENV_CONCURRENCY: &str = "CONCURRENCY";
const ENV_API_KEY: &str = "OPENROUTER_API_KEY";
const ENV_BASE_URL: &str = "OPENROUTER_BASE_URL";
const ENV_MAX_COST: &str = "MAX_COST";

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Load the file at `path`, writing a default one first if it does not exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            debug!("Wrote default configuration to {:?}", path);
            return Ok(config);
        }
        Self::from_file(path)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write config file: {:?}", path))
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_usize = |name: &str, value: String| -> Result<usize> {
            value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer, got '{}'", name, value))
        };

        if let Some(value) = lookup(ENV_CHUNK_SIZE) {
            self.pipeline.chunk_size = parse_usize(ENV_CHUNK_SIZE, value)?;
        }
        if let Some(value) = lookup(ENV_BATCH_SIZE) {
            self.pipeline.batch_size = parse_usize(ENV_BATCH_SIZE, value)?;
        }
        if let Some(value) = lookup(ENV_CONCURRENCY) {
            self.pipeline.concurrency = parse_usize(ENV_CONCURRENCY, value)?;
        }
        if let Some(value) = lookup(ENV_API_KEY) {
            self.translation.api_key = value;
        }
        if let Some(value) = lookup(ENV_BASE_URL) {
            self.translation.endpoint = value;
        }
        if let Some(value) = lookup(ENV_MAX_COST) {
            let threshold: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number, got '{}'", ENV_MAX_COST, value))?;
            self.cost.abort_threshold = Some(threshold);
        }
        Ok(())
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        let _source_name = crate::language_utils::get_language_name(&self.translation.source_language)?;
        let _target_name = crate::language_utils::get_language_name(&self.translation.target_language)?;

        if self.pipeline.chunk_size == 0 {
            return Err(anyhow!("pipeline.chunk_size must be greater than zero"));
        }
        if self.pipeline.batch_size == 0 {
            return Err(anyhow!("pipeline.batch_size must be greater than zero"));
        }
        if self.pipeline.concurrency == 0 {
            return Err(anyhow!("pipeline.concurrency must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff_max_ms < self.retry.backoff_base_ms {
            return Err(anyhow!("retry.backoff_max_ms must not be below retry.backoff_base_ms"));
        }

        if !(0.0..=1.0).contains(&self.qa.sample_rate) {
            return Err(anyhow!("qa.sample_rate must be between 0 and 1"));
        }
        if !(0.0..=1.0).contains(&self.qa.min_script_ratio) {
            return Err(anyhow!("qa.min_script_ratio must be between 0 and 1"));
        }
        if self.qa.min_length_ratio < 0.0 || self.qa.min_length_ratio > self.qa.max_length_ratio {
            return Err(anyhow!("qa length ratio bounds are inconsistent"));
        }
        let _script: crate::qa::TargetScript = self.qa.target_script.parse()?;

        if self.cost.rate_per_word < 0.0 || self.cost.rate_per_1k_tokens < 0.0 {
            return Err(anyhow!("cost rates must not be negative"));
        }
        if let Some(threshold) = self.cost.abort_threshold {
            if threshold < 0.0 {
                return Err(anyhow!("cost.abort_threshold must not be negative"));
            }
        }

        if self.translation.provider == TranslationProvider::OpenRouter {
            url::Url::parse(&self.translation.endpoint).with_context(|| {
                format!("translation.endpoint is not a valid URL: {}", self.translation.endpoint)
            })?;
            if self.translation.api_key.is_empty() {
                return Err(anyhow!("Translation API key is required for OpenRouter provider"));
            }
        }

        Ok(())
    }
}
