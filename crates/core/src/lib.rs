//! Shared building blocks for the Emerald workspace.
//!
//! - [`config`]: `emerald.toml` loading and validation
//! - [`error`]: the [`EmeraldError`] hierarchy
//! - [`event`]: events and counter snapshots published by the ingest engine
//! - [`pipeline`]: the [`Pipeline`] lifecycle trait and [`HealthStatus`]
//! - [`types`]: identifiers, lifecycle states and file fingerprints
//! - [`metrics`]: metric names

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod types;

// errors
pub use error::{ConfigError, EmeraldError, ParseError, PipelineError, StorageError};

// config
pub use config::{EmeraldConfig, IngestConfig, MetricsConfig, ServerConfig};

// events
pub use event::{CounterSnapshot, Event, EventMetadata, LogEvent, ServerEvent};

// pipeline trait
pub use pipeline::{HealthStatus, Pipeline};

// domain types
pub use types::{
    FileFingerprint, LifecycleCounters, LifecycleState, PlayerId, ServerId, WorldEventKind,
};
