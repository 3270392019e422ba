//! Configuration -- `emerald.toml` parsing and runtime settings.
//!
//! [`EmeraldConfig`] is the top-level structure. Each crate reads only its
//! own section.
//!
//! # Load order
//! 1. CLI arguments (highest)
//! 2. Environment variables (`EMERALD_INGEST_POLL_INTERVAL_MS=500`)
//! 3. Config file (`emerald.toml`)
//! 4. Defaults (`Default` impls)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), emerald_core::error::EmeraldError> {
//! use emerald_core::config::EmeraldConfig;
//!
//! let config = EmeraldConfig::load("emerald.toml").await?;
//!
//! let config = EmeraldConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, EmeraldError};

/// Invariant policy that reports negative counts as-is.
pub const INVARIANT_POLICY_FLAG: &str = "flag";
/// Invariant policy that clamps negative counts to zero.
pub const INVARIANT_POLICY_CLAMP: &str = "clamp";

/// Emerald configuration, the root of `emerald.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmeraldConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    /// Log ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Prometheus exporter settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl EmeraldConfig {
    /// Loads the file, applies environment overrides and validates the result.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, EmeraldError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads the file without environment overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, EmeraldError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EmeraldError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                EmeraldError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML string. Missing sections and fields take defaults.
    pub fn parse(toml_str: &str) -> Result<Self, EmeraldError> {
        toml::from_str(toml_str).map_err(|e| {
            EmeraldError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Applies `EMERALD_{SECTION}_{FIELD}` environment overrides.
    ///
    /// `EMERALD_INGEST_SERVERS` replaces the whole server list and takes
    /// comma-separated `id=path` pairs.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "EMERALD_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "EMERALD_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "EMERALD_GENERAL_DATA_DIR");
        override_string(&mut self.general.pid_file, "EMERALD_GENERAL_PID_FILE");

        // Ingest
        override_bool(&mut self.ingest.enabled, "EMERALD_INGEST_ENABLED");
        override_servers(&mut self.ingest.servers, "EMERALD_INGEST_SERVERS");
        override_u64(
            &mut self.ingest.poll_interval_ms,
            "EMERALD_INGEST_POLL_INTERVAL_MS",
        );
        override_string(
            &mut self.ingest.cursor_store_path,
            "EMERALD_INGEST_CURSOR_STORE_PATH",
        );
        override_usize(
            &mut self.ingest.event_channel_capacity,
            "EMERALD_INGEST_EVENT_CHANNEL_CAPACITY",
        );
        override_u64(
            &mut self.ingest.backoff_initial_ms,
            "EMERALD_INGEST_BACKOFF_INITIAL_MS",
        );
        override_u64(
            &mut self.ingest.backoff_max_ms,
            "EMERALD_INGEST_BACKOFF_MAX_MS",
        );
        override_u64(
            &mut self.ingest.open_timeout_ms,
            "EMERALD_INGEST_OPEN_TIMEOUT_MS",
        );
        override_usize(
            &mut self.ingest.max_read_bytes,
            "EMERALD_INGEST_MAX_READ_BYTES",
        );
        override_usize(
            &mut self.ingest.max_line_length,
            "EMERALD_INGEST_MAX_LINE_LENGTH",
        );
        override_u8(
            &mut self.ingest.mission_min_level,
            "EMERALD_INGEST_MISSION_MIN_LEVEL",
        );
        override_string(
            &mut self.ingest.invariant_policy,
            "EMERALD_INGEST_INVARIANT_POLICY",
        );
        override_u64(
            &mut self.ingest.session_retention_secs,
            "EMERALD_INGEST_SESSION_RETENTION_SECS",
        );
        override_bool(
            &mut self.ingest.replay_on_start,
            "EMERALD_INGEST_REPLAY_ON_START",
        );
        override_u32(
            &mut self.ingest.degraded_after_failures,
            "EMERALD_INGEST_DEGRADED_AFTER_FAILURES",
        );
        override_u64(
            &mut self.ingest.sink_send_warn_ms,
            "EMERALD_INGEST_SINK_SEND_WARN_MS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "EMERALD_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "EMERALD_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "EMERALD_METRICS_PORT");
        override_string(&mut self.metrics.endpoint, "EMERALD_METRICS_ENDPOINT");
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), EmeraldError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.ingest.enabled {
            self.ingest.validate()?;
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0".to_owned()));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> EmeraldError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// trace, debug, info, warn, error
    pub log_level: String,
    /// json, pretty
    pub log_format: String,
    pub data_dir: String,
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/emerald".to_owned(),
            pid_file: "/var/run/emerald.pid".to_owned(),
        }
    }
}

/// One tailed game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable server id; keys the cursor store and every published event
    pub id: String,
    /// Path of the server's append-only log
    pub log_path: String,
}

/// `[ingest]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub enabled: bool,
    /// `[[ingest.servers]]` entries
    pub servers: Vec<ServerConfig>,
    /// Poll interval per server (milliseconds)
    pub poll_interval_ms: u64,
    /// JSON file holding committed cursors
    pub cursor_store_path: String,
    /// Capacity of each server's event channel
    pub event_channel_capacity: usize,
    /// First retry delay after a file error (milliseconds)
    pub backoff_initial_ms: u64,
    /// Upper bound of the retry delay (milliseconds)
    pub backoff_max_ms: u64,
    /// Timeout for opening a log file (milliseconds)
    pub open_timeout_ms: u64,
    /// Maximum bytes read in one poll
    pub max_read_bytes: usize,
    /// Lines longer than this are skipped and counted as unclassified
    pub max_line_length: usize,
    /// Missions below this level are suppressed
    pub mission_min_level: u8,
    /// `flag` or `clamp`
    pub invariant_policy: String,
    /// How long a disconnected session is kept before it is retired (seconds)
    pub session_retention_secs: u64,
    /// Replay the file from offset 0 at startup instead of resuming
    pub replay_on_start: bool,
    /// Consecutive failures before a worker reports `Degraded`
    pub degraded_after_failures: u32,
    /// Interval between warnings while the event channel is full (milliseconds)
    pub sink_send_warn_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            servers: Vec::new(),
            poll_interval_ms: 1_000,
            cursor_store_path: "/var/lib/emerald/cursors.json".to_owned(),
            event_channel_capacity: 1_024,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            open_timeout_ms: 5_000,
            max_read_bytes: 4 * 1024 * 1024, // 4MB
            max_line_length: 64 * 1024,      // 64KB
            mission_min_level: 3,
            invariant_policy: default_invariant_policy().to_owned(),
            session_retention_secs: 3_600,
            replay_on_start: false,
            degraded_after_failures: 5,
            sink_send_warn_ms: 5_000,
        }
    }
}

/// `flag` in debug builds, `clamp` in release builds.
pub fn default_invariant_policy() -> &'static str {
    if cfg!(debug_assertions) {
        INVARIANT_POLICY_FLAG
    } else {
        INVARIANT_POLICY_CLAMP
    }
}

impl IngestConfig {
    fn validate(&self) -> Result<(), EmeraldError> {
        let mut seen = HashSet::new();
        for (idx, server) in self.servers.iter().enumerate() {
            if server.id.trim().is_empty() {
                return Err(invalid(
                    &format!("ingest.servers[{idx}].id"),
                    "must not be empty".to_owned(),
                ));
            }
            if server.log_path.trim().is_empty() {
                return Err(invalid(
                    &format!("ingest.servers[{idx}].log_path"),
                    "must not be empty".to_owned(),
                ));
            }
            if !seen.insert(server.id.as_str()) {
                return Err(invalid(
                    &format!("ingest.servers[{idx}].id"),
                    format!("duplicate server id '{}'", server.id),
                ));
            }
        }

        let positive: [(&str, u64); 6] = [
            ("ingest.poll_interval_ms", self.poll_interval_ms),
            ("ingest.backoff_initial_ms", self.backoff_initial_ms),
            ("ingest.open_timeout_ms", self.open_timeout_ms),
            ("ingest.sink_send_warn_ms", self.sink_send_warn_ms),
            ("ingest.event_channel_capacity", self.event_channel_capacity as u64),
            ("ingest.max_line_length", self.max_line_length as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0".to_owned()));
            }
        }

        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(invalid(
                "ingest.backoff_max_ms",
                format!(
                    "must be >= backoff_initial_ms ({})",
                    self.backoff_initial_ms
                ),
            ));
        }

        if self.max_read_bytes < self.max_line_length {
            return Err(invalid(
                "ingest.max_read_bytes",
                format!("must be >= max_line_length ({})", self.max_line_length),
            ));
        }

        if self.degraded_after_failures == 0 {
            return Err(invalid(
                "ingest.degraded_after_failures",
                "must be greater than 0".to_owned(),
            ));
        }

        let valid_policies = [INVARIANT_POLICY_FLAG, INVARIANT_POLICY_CLAMP];
        if !valid_policies.contains(&self.invariant_policy.as_str()) {
            return Err(invalid(
                "ingest.invariant_policy",
                format!("must be one of: {}", valid_policies.join(", ")),
            ));
        }

        if self.cursor_store_path.trim().is_empty() {
            return Err(invalid(
                "ingest.cursor_store_path",
                "must not be empty".to_owned(),
            ));
        }

        Ok(())
    }
}

/// `[metrics]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
    /// Only `/metrics` is served
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9_184,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- env override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_u8(target: &mut u8, env_key: &str) {
    override_parsed(target, env_key, "u8");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

/// `id=path,id=path`; any malformed pair leaves the list untouched.
fn override_servers(target: &mut Vec<ServerConfig>, env_key: &str) {
    let Ok(val) = std::env::var(env_key) else {
        return;
    };

    let mut servers = Vec::new();
    for pair in val.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match pair.split_once('=') {
            Some((id, path)) if !id.trim().is_empty() && !path.trim().is_empty() => {
                servers.push(ServerConfig {
                    id: id.trim().to_owned(),
                    log_path: path.trim().to_owned(),
                });
            }
            _ => {
                warn!(
                    env_key,
                    entry = pair,
                    "expected id=path in server list, ignoring env var"
                );
                return;
            }
        }
    }
    *target = servers;
}
