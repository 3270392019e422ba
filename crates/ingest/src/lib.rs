//! Emerald ingest engine: tails game-server logs, classifies each line and
//! tracks player lifecycle and world-event counters per server.
//!
//! # Modules
//!
//! - [`classifier`]: raw line to event, suppressed marker or unclassified
//! - [`tracker`]: per-player lifecycle state machine and the jq/j2/d1/d2 counters
//! - [`dedup`]: world-event deduplication and tallies
//! - [`state`]: per-server state and counter snapshots
//! - [`tailer`]: rotation detection and bounded reads of new lines
//! - [`cursor`]: committed cursor persistence
//! - [`sink`]: event and snapshot channels to consumers
//! - [`supervisor`]: one worker per server (Pipeline trait implementation)
//! - [`replay`]: offline classification of a whole file
//! - [`config`]: engine settings derived from `[ingest]`
//! - [`error`]: domain error type
//!
//! # Architecture
//!
//! ```text
//!             ┌──────────── worker (one per server) ────────────┐
//! log file -> │ LogTailer -> LineClassifier -> ServerState      │ -> EventSink -> consumers
//!             │                                  │              │
//!             │                              CursorStore        │
//!             └─────────────────────────────────────────────────┘
//! ```

pub mod classifier;
pub mod config;
pub mod cursor;
pub mod dedup;
pub mod error;
pub mod replay;
pub mod sink;
pub mod state;
pub mod supervisor;
pub mod tailer;
pub mod tracker;
mod worker;

// supervisor
pub use supervisor::{IngestionSupervisor, IngestionSupervisorBuilder};

// config
pub use config::{InvariantPolicy, ServerSpec, SupervisorConfig, SupervisorConfigBuilder};

// errors
pub use error::IngestError;

// classification
pub use classifier::{Classification, LineClassifier, SuppressReason};

// state
pub use dedup::WorldEventDeduper;
pub use state::ServerState;
pub use tracker::PlayerLifecycleTracker;

// persistence
pub use cursor::{CursorRecord, CursorStore, JsonCursorStore, MemoryCursorStore};

// channels
pub use sink::{EventSink, EventStream};

// replay
pub use replay::{ReplayReport, replay_file};
