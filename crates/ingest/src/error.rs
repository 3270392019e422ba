//! Ingest engine error type.
//!
//! [`IngestError`] covers everything that can go wrong inside the engine.
//! `From<IngestError> for EmeraldError` lets callers propagate with `?`.

use emerald_core::error::{ConfigError, EmeraldError, PipelineError, StorageError};

/// Ingest domain error
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Log file missing or not accessible; retried with backoff
    #[error("log file unavailable: {path}: {reason}")]
    FileUnavailable {
        path: String,
        reason: String,
    },

    /// Opening the log file took longer than `open_timeout_ms`
    #[error("timed out opening {path} after {timeout_ms}ms")]
    OpenTimeout { path: String, timeout_ms: u64 },

    /// Reading an opened log file failed
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// Cursor persistence failed
    #[error("cursor store error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {field}: {reason}")]
    Config { field: String, reason: String },

    /// Admin command for a server with no worker
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// Worker task ended before answering
    #[error("worker for server {0} is not running")]
    WorkerStopped(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Classifier pattern failed to compile
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl IngestError {
    /// File-level errors that abort one poll and trigger backoff.
    pub fn is_transient_file(&self) -> bool {
        matches!(
            self,
            Self::FileUnavailable { .. } | Self::OpenTimeout { .. } | Self::Read { .. }
        )
    }
}

impl From<IngestError> for EmeraldError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Storage(e) => EmeraldError::Storage(e),
            IngestError::Config { field, reason } => {
                EmeraldError::Config(ConfigError::InvalidValue { field, reason })
            }
            IngestError::UnknownServer(id) => {
                EmeraldError::Pipeline(PipelineError::UnknownServer(id))
            }
            IngestError::WorkerStopped(_) => EmeraldError::Pipeline(PipelineError::NotRunning),
            IngestError::Channel(reason) => {
                EmeraldError::Pipeline(PipelineError::ChannelSend(reason))
            }
            IngestError::Io(e) => EmeraldError::Io(e),
            other => EmeraldError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
