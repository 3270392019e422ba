//! CLI error type and process exit codes.

use emerald_core::error::EmeraldError;
use emerald_ingest::IngestError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Command(String),

    /// Replay finished but the counters are invalid (`--strict`)
    #[error("replay invalid: {0}")]
    ReplayInvalid(String),

    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Core(#[from] EmeraldError),

    #[error("{0}")]
    Ingest(#[from] IngestError),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::ReplayInvalid(_) => 4,
            Self::Io(_) => 10,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Core(_) | Self::Ingest(_) => 1,
        }
    }
}
