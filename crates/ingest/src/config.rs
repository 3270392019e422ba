//! Ingest engine settings.
//!
//! [`SupervisorConfig`] is derived from the core
//! [`IngestConfig`](emerald_core::config::IngestConfig) section, turning the
//! stringly-typed file values into the types the engine works with.
//!
//! # Example
//! ```ignore
//! use emerald_core::config::EmeraldConfig;
//! use emerald_ingest::config::SupervisorConfig;
//!
//! let core_config = EmeraldConfig::default();
//! let config = SupervisorConfig::from_core(&core_config.ingest)?;
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use emerald_core::config::{INVARIANT_POLICY_CLAMP, INVARIANT_POLICY_FLAG};
use emerald_core::types::ServerId;

use crate::error::IngestError;

/// What to do when PC or QC would go negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvariantPolicy {
    /// Report the raw negative value and log at `error`
    Flag,
    /// Report zero and log at `warn`
    Clamp,
}

impl Default for InvariantPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Flag
        } else {
            Self::Clamp
        }
    }
}

impl std::str::FromStr for InvariantPolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            INVARIANT_POLICY_FLAG => Ok(Self::Flag),
            INVARIANT_POLICY_CLAMP => Ok(Self::Clamp),
            other => Err(IngestError::Config {
                field: "invariant_policy".to_owned(),
                reason: format!("unknown policy '{other}'"),
            }),
        }
    }
}

/// One tailed server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub id: ServerId,
    pub log_path: PathBuf,
}

impl ServerSpec {
    pub fn new(id: impl Into<String>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            id: ServerId::new(id),
            log_path: log_path.into(),
        }
    }
}

/// Settings for the supervisor and every worker it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub servers: Vec<ServerSpec>,
    pub poll_interval_ms: u64,
    pub cursor_store_path: PathBuf,
    pub event_channel_capacity: usize,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub open_timeout_ms: u64,
    pub max_read_bytes: usize,
    pub max_line_length: usize,
    pub mission_min_level: u8,
    pub invariant_policy: InvariantPolicy,
    pub session_retention_secs: u64,
    pub replay_on_start: bool,
    pub degraded_after_failures: u32,
    pub sink_send_warn_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            poll_interval_ms: 1_000,
            cursor_store_path: PathBuf::from("/var/lib/emerald/cursors.json"),
            event_channel_capacity: 1_024,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            open_timeout_ms: 5_000,
            max_read_bytes: 4 * 1024 * 1024,
            max_line_length: 64 * 1024,
            mission_min_level: 3,
            invariant_policy: InvariantPolicy::default(),
            session_retention_secs: 3_600,
            replay_on_start: false,
            degraded_after_failures: 5,
            sink_send_warn_ms: 5_000,
        }
    }
}

impl SupervisorConfig {
    /// Builds the engine settings from the `[ingest]` section.
    pub fn from_core(core: &emerald_core::config::IngestConfig) -> Result<Self, IngestError> {
        let config = Self {
            servers: core
                .servers
                .iter()
                .map(|s| ServerSpec::new(s.id.clone(), s.log_path.clone()))
                .collect(),
            poll_interval_ms: core.poll_interval_ms,
            cursor_store_path: PathBuf::from(&core.cursor_store_path),
            event_channel_capacity: core.event_channel_capacity,
            backoff_initial_ms: core.backoff_initial_ms,
            backoff_max_ms: core.backoff_max_ms,
            open_timeout_ms: core.open_timeout_ms,
            max_read_bytes: core.max_read_bytes,
            max_line_length: core.max_line_length,
            mission_min_level: core.mission_min_level,
            invariant_policy: core.invariant_policy.parse()?,
            session_retention_secs: core.session_retention_secs,
            replay_on_start: core.replay_on_start,
            degraded_after_failures: core.degraded_after_failures,
            sink_send_warn_ms: core.sink_send_warn_ms,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }

    pub fn sink_send_warn(&self) -> Duration {
        Duration::from_millis(self.sink_send_warn_ms)
    }

    /// Delay before retry number `failures` (1-based), doubling up to the cap.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(32);
        let delay = self
            .backoff_initial_ms
            .saturating_mul(1u64 << shift)
            .min(self.backoff_max_ms);
        Duration::from_millis(delay)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(&server.id) {
                return Err(IngestError::Config {
                    field: "servers".to_owned(),
                    reason: format!("duplicate server id '{}'", server.id),
                });
            }
            if server.log_path.as_os_str().is_empty() {
                return Err(IngestError::Config {
                    field: "servers.log_path".to_owned(),
                    reason: format!("server '{}' has an empty log path", server.id),
                });
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(IngestError::Config {
                field: "poll_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.event_channel_capacity == 0 {
            return Err(IngestError::Config {
                field: "event_channel_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.backoff_initial_ms == 0 || self.backoff_max_ms < self.backoff_initial_ms {
            return Err(IngestError::Config {
                field: "backoff_max_ms".to_owned(),
                reason: "backoff must satisfy 0 < initial <= max".to_owned(),
            });
        }

        if self.max_line_length == 0 || self.max_read_bytes < self.max_line_length {
            return Err(IngestError::Config {
                field: "max_read_bytes".to_owned(),
                reason: format!(
                    "must be >= max_line_length ({}) and max_line_length must be > 0",
                    self.max_line_length
                ),
            });
        }

        if self.degraded_after_failures == 0 {
            return Err(IngestError::Config {
                field: "degraded_after_failures".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(())
    }
}

/// Builder for [`SupervisorConfig`].
#[derive(Default)]
pub struct SupervisorConfigBuilder {
    config: SupervisorConfig,
}

impl SupervisorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one server to tail.
    pub fn server(mut self, id: impl Into<String>, log_path: impl Into<PathBuf>) -> Self {
        self.config.servers.push(ServerSpec::new(id, log_path));
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn cursor_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cursor_store_path = path.into();
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    pub fn backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.backoff_initial_ms = initial;
        self.config.backoff_max_ms = max;
        self
    }

    pub fn max_read_bytes(mut self, bytes: usize) -> Self {
        self.config.max_read_bytes = bytes;
        self
    }

    pub fn max_line_length(mut self, len: usize) -> Self {
        self.config.max_line_length = len;
        self
    }

    pub fn mission_min_level(mut self, level: u8) -> Self {
        self.config.mission_min_level = level;
        self
    }

    pub fn invariant_policy(mut self, policy: InvariantPolicy) -> Self {
        self.config.invariant_policy = policy;
        self
    }

    pub fn session_retention_secs(mut self, secs: u64) -> Self {
        self.config.session_retention_secs = secs;
        self
    }

    pub fn replay_on_start(mut self, replay: bool) -> Self {
        self.config.replay_on_start = replay;
        self
    }

    pub fn degraded_after_failures(mut self, failures: u32) -> Self {
        self.config.degraded_after_failures = failures;
        self
    }

    pub fn sink_send_warn_ms(mut self, ms: u64) -> Self {
        self.config.sink_send_warn_ms = ms;
        self
    }

    /// Validates and returns the config.
    pub fn build(self) -> Result<SupervisorConfig, IngestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
