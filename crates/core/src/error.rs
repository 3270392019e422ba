//! Error types shared by every Emerald crate.
//!
//! [`EmeraldError`] is the top-level error. Domain crates define their own
//! error enums and provide a `From` conversion into it so that `?` works
//! across crate boundaries.

/// Emerald top-level error type
#[derive(Debug, thiserror::Error)]
pub enum EmeraldError {
    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline lifecycle or channel error
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Log line parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Cursor persistence error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file does not exist
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// Config file could not be parsed
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// A config value is out of range or malformed
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Pipeline lifecycle and channel errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Sending on a channel failed
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// Receiving from a channel failed
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// Pipeline could not be initialized
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// `start()` called on a running pipeline
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// Operation requires a running pipeline
    #[error("pipeline is not running")]
    NotRunning,

    /// No worker is registered for the server id
    #[error("unknown server: {0}")]
    UnknownServer(String),
}

/// Log line parse errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// A recognised line is missing a required field
    #[error("missing field '{field}' in {category} line")]
    MissingField { category: String, field: String },

    /// A field value could not be interpreted
    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// Line exceeds the configured maximum length
    #[error("line too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// Cursor store errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading the persisted state failed
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// Writing the persisted state failed
    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    /// Persisted state exists but cannot be decoded
    #[error("corrupt state in {path}: {reason}")]
    Corrupt { path: String, reason: String },
}
