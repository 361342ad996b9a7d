/*!
 * Error types for the nicoforge pipeline.
 *
 * Each layer of the pipeline owns a thiserror enum. Provider errors carry
 * their own retry classification so the batch executor never has to inspect
 * HTTP details, and `AppError` wraps everything for the binary.
 */

use std::path::PathBuf;

use thiserror::Error;

/// How the batch executor must treat a failed provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying with backoff
    Transient,
    /// Retrying cannot help; route the unit aside
    Permanent,
}

/// Errors that can occur when talking to a translation provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The request did not complete within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The provider asked us to slow down
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// The provider failed on its side (5xx)
    #[error("Server error: {status_code} - {message}")]
    ServerError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Credentials were missing or rejected
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The provider rejected the request itself (4xx other than auth/rate limit)
    #[error("Invalid request: {status_code} - {message}")]
    InvalidRequest {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// The response could not be understood, was empty, or had the wrong shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Classify this error for the retry loop
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_)
            | Self::RateLimited(_)
            | Self::ServerError { .. }
            | Self::ConnectionError(_) => FailureKind::Transient,
            Self::AuthenticationError(_)
            | Self::InvalidRequest { .. }
            | Self::MalformedResponse(_) => FailureKind::Permanent,
        }
    }

    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Map an HTTP status code and body to the matching error variant
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            401 | 403 => Self::AuthenticationError(message),
            429 => Self::RateLimited(message),
            500..=599 => Self::ServerError {
                status_code,
                message,
            },
            _ => Self::InvalidRequest {
                status_code,
                message,
            },
        }
    }
}

/// Errors raised while turning an input file into raw text
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// The file extension is not one we can read
    #[error("Unsupported format '{extension}' for {path:?}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// The file exists but its contents cannot be decoded
    #[error("Corrupt document {path:?}: {reason}")]
    CorruptDocument { path: PathBuf, reason: String },

    /// The file could not be read
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from chunking and dataset reconstruction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SegmentError {
    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("Ordinal {0} was already assigned in this run")]
    DuplicateOrdinal(u64),

    /// A segment references a unit that has not been translated successfully
    #[error("Segment {ordinal} has no successful translation for unit {content_hash}")]
    MissingTranslation { ordinal: u64, content_hash: String },
}

/// Errors from the run state ledger
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Stored state cannot be trusted by this binary; only a force restart clears it
    #[error("Ledger is incompatible: {0}. Run a force restart to discard it")]
    Incompatible(String),

    /// A unit status change that would move a unit backwards
    #[error("Illegal status transition for unit {content_hash}: {from} -> {to}")]
    InvalidTransition {
        content_hash: String,
        from: String,
        to: String,
    },

    /// A stage completion out of pipeline order
    #[error("Stage {to} cannot follow {from}")]
    StageOrder { from: String, to: String },

    /// The underlying database failed
    #[error("Ledger storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for LedgerError {
    fn from(error: anyhow::Error) -> Self {
        // Incompatibility raised deep inside a database closure must survive the trip
        match error.downcast::<LedgerError>() {
            Ok(ledger_error) => ledger_error,
            Err(other) => Self::Storage(format!("{:#}", other)),
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

/// Errors that terminate a pipeline invocation
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Segment(#[from] SegmentError),

    /// Resuming was disabled but paid-for state already exists for this run key
    #[error("A resumable run already exists for run key {run_key}; resume it or force a restart")]
    ExistingRun { run_key: String },

    #[error("No input documents found")]
    NoInputs,

    #[error("Failed to read inputs: {0}")]
    Input(String),

    /// The configuration was rejected before any work started
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A blocking worker task did not complete
    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Failed to write outputs: {0}")]
    Export(String),
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Configuration was rejected during validation
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(format!("{:#}", error))
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
