// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use indicatif::{ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use nicoforge::app_config::{Config, LogLevel, TranslationProvider};
use nicoforge::errors::AppError;
use nicoforge::pipeline::{EventSink, LogEventSink, Pipeline, PipelineEvent};
use nicoforge::providers::TranslatorBackend;

/// CLI Wrapper for TranslationProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliTranslationProvider {
    OpenRouter,
    Mock,
}

impl From<CliTranslationProvider> for TranslationProvider {
    fn from(cli_provider: CliTranslationProvider) -> Self {
        match cli_provider {
            CliTranslationProvider::OpenRouter => TranslationProvider::OpenRouter,
            CliTranslationProvider::Mock => TranslationProvider::Mock,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => LogLevel::Error,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Trace => LogLevel::Trace,
        }
    }
}

/// Options shared by every subcommand that works on a set of sources
#[derive(Args, Debug)]
struct SourceArgs {
    /// Input documents or directories
    #[arg(value_name = "SOURCES", required = true)]
    sources: Vec<PathBuf>,

    /// Configuration file path
    #[arg(short, long, default_value = "nicoforge.json")]
    config: PathBuf,

    /// Translation provider to use
    #[arg(short, long, value_enum)]
    provider: Option<CliTranslationProvider>,

    /// Model identifier to use for translation
    #[arg(short, long)]
    model: Option<String>,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the dataset, resuming an interrupted run when possible
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Discard the ledger for these inputs and start over
        #[arg(long)]
        force_restart: bool,

        /// Fail instead of resuming when a ledger already exists
        #[arg(long, conflicts_with = "force_restart")]
        no_resume: bool,
    },

    /// Print the projected cost without writing anything or calling the provider
    Estimate {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Print the ledger snapshot for these inputs
    Status {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Discard the ledger for these inputs
    Reset {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Generate shell completions for nicoforge
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// nicoforge - resumable bilingual dataset builder
///
/// Extracts, cleans and chunks documents, translates each distinct text once
/// and exports a parallel dataset with QA side files.
#[derive(Parser, Debug)]
#[command(name = "nicoforge")]
#[command(version)]
#[command(about = "Resumable, cost-guarded bilingual dataset builder")]
#[command(long_about = "nicoforge turns source documents into a parallel source/target dataset.

EXAMPLES:
    nicoforge run corpus/                        # Build or resume the dataset for a directory
    nicoforge run --no-resume a.txt b.docx       # Refuse to resume an existing run
    nicoforge run --force-restart corpus/        # Throw away previous progress
    nicoforge run -p mock corpus/                # Offline dry run with the mock translator
    nicoforge estimate corpus/                   # Projected cost, nothing written
    nicoforge status corpus/                     # Ledger snapshot as JSON
    nicoforge reset corpus/                      # Discard the ledger for these inputs
    nicoforge completions bash > nicoforge.bash  # Generate bash completions

CONFIGURATION:
    Configuration is stored in nicoforge.json by default. You can specify a
    different file with --config. If the file doesn't exist, a default one
    will be created automatically. CHUNK_SIZE, BATCH_SIZE, CONCURRENCY,
    OPENROUTER_API_KEY, OPENROUTER_BASE_URL and MAX_COST override the file.

SUPPORTED INPUTS:
    .txt, .md, .pdf, .docx")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Emoji for log level
    fn get_emoji_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "❌",
            Level::Warn => "🚧",
            Level::Info => "",
            Level::Debug => "🔍",
            Level::Trace => "📋",
        }
    }

    // @returns: ANSI color for log level
    fn get_color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // The global max level is raised or lowered after config loading
        metadata.level() <= self.level.max(log::max_level())
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let level = record.level();

            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "{}{} {} {}\x1B[0m",
                Self::get_color_for_level(level),
                now,
                Self::get_emoji_for_level(level),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

// @struct: Progress bar over translation batches, logging everything else
struct ProgressEventSink {
    bar: Mutex<Option<ProgressBar>>,
    log: LogEventSink,
}

impl ProgressEventSink {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
            log: LogEventSink,
        }
    }

    fn start(&self, batches: usize) {
        let bar = ProgressBar::new(batches as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({percent}%) {msg} {eta}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("█▓▒░"));
        *self.bar.lock() = Some(bar);
    }

    fn finish(&self) {
        if let Some(bar) = self.bar.lock().take() {
            bar.finish_and_clear();
        }
    }
}

impl EventSink for ProgressEventSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::TranslationPlanned { batches, .. } => self.start(*batches),
            PipelineEvent::BatchFinished { accumulated_cost, .. } => {
                if let Some(bar) = self.bar.lock().as_ref() {
                    bar.set_message(format!("cost {:.4}", accumulated_cost));
                    bar.inc(1);
                }
            }
            PipelineEvent::CostAborted { .. }
            | PipelineEvent::QaCompleted { .. }
            | PipelineEvent::RunFinished { .. } => self.finish(),
            _ => {}
        }

        match self.bar.lock().as_ref() {
            Some(bar) => bar.suspend(|| self.log.emit(event)),
            None => self.log.emit(event),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger once with info level by default
    // We'll update the level after loading the config if needed
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "nicoforge", &mut std::io::stdout());
            Ok(())
        }
        Commands::Run {
            source,
            force_restart,
            no_resume,
        } => run_pipeline(source, force_restart, no_resume).await,
        Commands::Estimate { source } => {
            let pipeline = build_pipeline(&source, Arc::new(LogEventSink))?;
            let report = pipeline.estimate(&source.sources).await.map_err(AppError::from)?;
            if !report.decision.is_allowed() {
                warn!(
                    "Projected cost {:.4} {} exceeds the configured threshold",
                    report.estimate.projected_cost, report.currency
                );
            }
            print_json(&report)
        }
        Commands::Status { source } => {
            let pipeline = build_pipeline(&source, Arc::new(LogEventSink))?;
            match pipeline.snapshot(&source.sources).await.map_err(AppError::from)? {
                Some(snapshot) => print_json(&snapshot),
                None => {
                    info!("No ledger exists for these inputs");
                    Ok(())
                }
            }
        }
        Commands::Reset { source } => {
            let pipeline = build_pipeline(&source, Arc::new(LogEventSink))?;
            let run_key = pipeline.run_key_for(&source.sources).await.map_err(AppError::from)?;
            pipeline.force_restart(&run_key).await.map_err(AppError::from)?;
            info!("Discarded ledger for run {}", run_key);
            Ok(())
        }
    }
}

async fn run_pipeline(source: SourceArgs, force_restart: bool, no_resume: bool) -> Result<()> {
    let pipeline = build_pipeline(&source, Arc::new(ProgressEventSink::new()))?;

    if force_restart {
        let run_key = pipeline.run_key_for(&source.sources).await.map_err(AppError::from)?;
        pipeline.force_restart(&run_key).await.map_err(AppError::from)?;
        info!("Discarded previous progress for run {}", run_key);
    }

    let result = pipeline
        .run(&source.sources, !no_resume)
        .await
        .map_err(AppError::from)?;

    if let Some(reason) = &result.abort_reason {
        warn!("Run aborted: {}. Raise the threshold and run again to continue.", reason);
    }
    print_json(&result)
}

// @returns: Pipeline built from the effective configuration
fn build_pipeline(source: &SourceArgs, events: Arc<dyn EventSink>) -> Result<Pipeline> {
    let config = load_config(source)?;
    let backend = TranslatorBackend::from_config(&config.translation)
        .map_err(|e| AppError::Config(format!("{:#}", e)))?;

    Ok(Pipeline::new(config, Arc::new(backend), events))
}

// @returns: File config with environment and CLI overrides applied, validated
fn load_config(source: &SourceArgs) -> Result<Config> {
    // If log level is set via command line, apply it immediately
    if let Some(level) = &source.log_level {
        log::set_max_level(LogLevel::from(level.clone()).to_level_filter());
    }

    if !source.config.exists() {
        warn!("Config file not found at {:?}, creating default config.", source.config);
    }
    let mut config = Config::load_or_create(&source.config)
        .with_context(|| format!("Failed to load configuration from {:?}", source.config))?;
    config.apply_env_overrides()?;

    if let Some(provider) = &source.provider {
        config.translation.provider = provider.clone().into();
    }
    if let Some(model) = &source.model {
        config.translation.model = model.clone();
    }
    if let Some(level) = &source.log_level {
        config.log_level = level.clone().into();
    }

    config
        .validate()
        .map_err(|e| AppError::Config(format!("{:#}", e)))?;

    // If log level was not set via command line, update it from config now
    if source.log_level.is_none() {
        log::set_max_level(config.log_level.to_level_filter());
    }

    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to render output as JSON")?;
    println!("{}", json);
    Ok(())
}
