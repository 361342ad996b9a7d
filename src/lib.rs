/*!
 * # nicoforge - resumable bilingual dataset builder
 *
 * A Rust library that turns a pile of source documents into a parallel
 * source/target dataset using a machine translation provider, without ever
 * paying twice for the same text.
 *
 * ## Features
 *
 * - Extract text from `.txt`, `.md`, `.pdf` and `.docx` documents
 * - Clean and chunk text into fixed-size word segments
 * - Translate each distinct text once, no matter how often it repeats
 * - Abort before spending when the projected cost exceeds a threshold
 * - Resume interrupted runs from a durable SQLite ledger
 * - Sample translations for quality with reproducible selection
 * - Export CSV and JSON datasets
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `extraction`, `cleaning`: Input documents to normalized text
 * - `segments`: Chunking, deduplication and ordered reconstruction
 * - `cost`: Cost estimation and the pre-spend gate
 * - `ledger`: Durable run state keyed by a deterministic run key
 * - `providers`: The `Translator` capability and its variants:
 *   - `providers::openrouter`: OpenRouter chat completions client
 *   - `providers::mock`: Offline translator with scriptable failures
 * - `translation`: Batch execution with retry and backoff
 * - `qa`: Quality sampling
 * - `pipeline`: Stage state machine, events and run results
 * - `export`: Dataset writers
 * - `file_utils`: File system operations
 * - `language_utils`: ISO language code utilities
 * - `errors`: Custom error types for the application
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod cleaning;
pub mod cost;
pub mod errors;
pub mod export;
pub mod extraction;
pub mod file_utils;
pub mod language_utils;
pub mod ledger;
pub mod pipeline;
pub mod providers;
pub mod qa;
pub mod segments;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use cost::{CostDecision, CostEstimate, CostEstimator};
pub use errors::{AppError, LedgerError, PipelineError, ProviderError};
pub use ledger::{RunKey, Stage, UnitStatus};
pub use pipeline::{EventSink, LogEventSink, Pipeline, PipelineEvent, RunResult};
pub use providers::{Translator, TranslatorBackend};
pub use segments::{CanonicalUnit, Segment, SegmentStore};
