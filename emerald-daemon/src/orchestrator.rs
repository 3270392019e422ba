//! Daemon orchestration -- assembly, consumer wiring and lifecycle.
//!
//! The [`Orchestrator`] builds the ingestion supervisor from `emerald.toml`,
//! attaches one consumer task per server stream, and runs until a shutdown
//! signal arrives.
//!
//! # Shutdown Order (producers first)
//!
//! 1. Ingestion supervisor (workers flush cursors and stop emitting)
//! 2. Stream consumers (drain what is left in their channels)
//! 3. Background tasks (uptime updater)

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use emerald_core::config::EmeraldConfig;
use emerald_core::event::{CounterSnapshot, ServerEvent};
use emerald_core::pipeline::Pipeline;
use emerald_ingest::{EventStream, IngestionSupervisor, IngestionSupervisorBuilder, SupervisorConfig};

use crate::health::{DaemonHealth, ServerHealth, aggregate_status, log_health};
use crate::metrics_server;

/// Interval between health checks in the main loop.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: EmeraldConfig,
    /// `None` when `[ingest] enabled = false`
    supervisor: Option<IngestionSupervisor>,
    /// Consumer sides, handed to logger tasks on `run`
    streams: Vec<EventStream>,
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration (file plus environment overrides) and build.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = EmeraldConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// # Errors
    ///
    /// - Configuration validation fails
    /// - The metrics recorder cannot be installed
    /// - The supervisor cannot be built (e.g. a classifier pattern fails)
    pub async fn build_from_config(config: EmeraldConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let (shutdown_tx, _) = broadcast::channel(16);

        let (supervisor, streams) = if config.ingest.enabled {
            tracing::info!(
                servers = config.ingest.servers.len(),
                "initializing ingestion supervisor"
            );
            let supervisor_config = SupervisorConfig::from_core(&config.ingest)
                .map_err(|e| anyhow::anyhow!("invalid ingest config: {}", e))?;
            let (supervisor, streams) = IngestionSupervisorBuilder::new()
                .config(supervisor_config)
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build ingestion supervisor: {}", e))?;
            (Some(supervisor), streams)
        } else {
            tracing::warn!("ingest disabled, daemon will idle until shutdown");
            (None, Vec::new())
        };

        tracing::info!(streams = streams.len(), "orchestrator initialized");

        if config.metrics.enabled {
            record_daemon_metrics(streams.len());
        }

        Ok(Self {
            config,
            supervisor,
            streams,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start ingestion and block until `SIGTERM` or `SIGINT`.
    ///
    /// `SIGUSR1` logs the current counters of every server without stopping.
    pub async fn run(&mut self) -> Result<()> {
        let shutdown = wait_for_shutdown_signal()?;
        self.run_until(shutdown).await.map(|_| ())
    }

    /// Start ingestion and block until `shutdown` resolves.
    ///
    /// Returns the number of events consumed across all servers.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<u64>
    where
        F: Future<Output = &'static str>,
    {
        let pid_file = (!self.config.general.pid_file.is_empty())
            .then(|| self.config.general.pid_file.clone());
        if let Some(path) = &pid_file {
            write_pid_file(Path::new(path))?;
        }

        if let Some(supervisor) = self.supervisor.as_mut() {
            if let Err(e) = supervisor.start().await {
                tracing::error!(error = %e, "ingestion supervisor failed to start");
                if let Some(path) = &pid_file {
                    remove_pid_file(Path::new(path));
                }
                return Err(e.into());
            }
        }

        let loggers: Vec<JoinHandle<u64>> = self
            .streams
            .drain(..)
            .map(|stream| spawn_stream_logger(stream, self.shutdown_tx.subscribe()))
            .collect();

        let uptime_updater = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown_tx.subscribe()));

        tracing::info!("entering main loop");
        let signal = self.main_loop(shutdown).await?;
        tracing::info!(signal = signal, "shutdown signal received");

        self.shutdown().await?;

        tracing::info!("broadcasting shutdown signal to all tasks");
        let _ = self.shutdown_tx.send(());

        let mut consumed = 0u64;
        for logger in loggers {
            match logger.await {
                Ok(count) => consumed += count,
                Err(e) => tracing::error!(error = %e, "stream logger task failed"),
            }
        }
        if let Some(task) = uptime_updater {
            let _ = task.await;
        }

        if let Some(path) = &pid_file {
            remove_pid_file(Path::new(path));
        }

        tracing::info!(events = consumed, "orchestrator stopped");
        Ok(consumed)
    }

    async fn main_loop<F>(&self, shutdown: F) -> Result<&'static str>
    where
        F: Future<Output = &'static str>,
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigusr1 = signal(SignalKind::user_defined1())
            .map_err(|e| anyhow::anyhow!("failed to install SIGUSR1 handler: {}", e))?;

        let mut health_interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        let mut last_status = None;

        loop {
            tokio::select! {
                signal = &mut shutdown => return Ok(signal),
                _ = sigusr1.recv() => self.log_status().await,
                _ = health_interval.tick() => {
                    let health = self.health().await;
                    if last_status.as_ref() != Some(&health.status) {
                        log_health(&health);
                        last_status = Some(health.status);
                    }
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        match self.supervisor.as_mut() {
            Some(supervisor) if supervisor.state_name() == "running" => {
                tracing::info!("stopping ingestion supervisor");
                supervisor.stop().await.map_err(Into::into)
            }
            _ => Ok(()),
        }
    }

    /// Logs the counters of every configured server.
    async fn log_status(&self) {
        let Some(supervisor) = self.supervisor.as_ref() else {
            tracing::info!("status requested, ingest disabled");
            return;
        };
        for server_id in supervisor.server_ids() {
            match supervisor.snapshot(&server_id).await {
                Ok(snapshot) => log_snapshot_info(&snapshot),
                Err(e) => tracing::warn!(server = %server_id, error = %e, "snapshot unavailable"),
            }
        }
        match serde_json::to_string(&self.health().await) {
            Ok(json) => tracing::info!(health = %json, "status requested"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize health report"),
        }
    }

    /// Current aggregated health.
    pub async fn health(&self) -> DaemonHealth {
        let (ingest, servers) = match self.supervisor.as_ref() {
            Some(supervisor) => {
                let servers: Vec<ServerHealth> = supervisor
                    .server_health()
                    .into_iter()
                    .map(|(server_id, status)| ServerHealth {
                        server_id: server_id.to_string(),
                        status,
                    })
                    .collect();
                (supervisor.state_name().to_owned(), servers)
            }
            None => ("disabled".to_owned(), Vec::new()),
        };

        let uptime_secs = self.start_time.elapsed().as_secs();
        if self.config.metrics.enabled {
            use emerald_core::metrics as m;
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth {
            status: aggregate_status(&servers),
            uptime_secs,
            ingest,
            servers,
        }
    }

    /// The supervisor, when ingest is enabled.
    pub fn supervisor(&self) -> Option<&IngestionSupervisor> {
        self.supervisor.as_ref()
    }

    pub fn config(&self) -> &EmeraldConfig {
        &self.config
    }
}

/// Resolves with the name of the first shutdown signal received.
///
/// Handlers are installed before returning so an early signal is not lost.
fn wait_for_shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - `create_new(true)` fails if the file exists, so two daemons cannot share it
/// - the created file must be a regular file
/// - parent directory 0o700, file 0o600
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Logs a warning but never fails.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Spawns the consumer of one server's stream.
///
/// Events are logged at `info`, snapshot changes at `debug`. On shutdown the
/// events still buffered in the channel are drained before the task exits.
/// The task returns the number of events it consumed.
fn spawn_stream_logger(
    mut stream: EventStream,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut consumed = 0u64;
        let mut snapshots_open = true;

        loop {
            tokio::select! {
                event = stream.events.recv() => match event {
                    Some(event) => {
                        log_event(&event);
                        consumed += 1;
                    }
                    None => {
                        tracing::debug!(server = %stream.server_id, "event channel closed");
                        break;
                    }
                },
                changed = stream.snapshots.changed(), if snapshots_open => match changed {
                    Ok(()) => {
                        let snapshot = stream.snapshots.borrow_and_update().clone();
                        tracing::debug!(
                            server = %snapshot.server_id,
                            player_count = snapshot.player_count,
                            queue_count = snapshot.queue_count,
                            cursor = snapshot.cursor,
                            "counters updated"
                        );
                    }
                    Err(_) => snapshots_open = false,
                },
                _ = shutdown_rx.recv() => {
                    while let Ok(event) = stream.events.try_recv() {
                        log_event(&event);
                        consumed += 1;
                    }
                    break;
                }
            }
        }

        tracing::debug!(server = %stream.server_id, events = consumed, "stream logger stopped");
        consumed
    })
}

fn log_event(event: &ServerEvent) {
    tracing::info!(
        server = %event.server_id,
        kind = event.event.label(),
        event = %event.event,
        offset = event.offset,
        trace_id = %event.metadata.trace_id,
        "event"
    );
}

fn log_snapshot_info(snapshot: &CounterSnapshot) {
    tracing::info!(
        server = %snapshot.server_id,
        player_count = snapshot.player_count,
        queue_count = snapshot.queue_count,
        jq = snapshot.counters.jq,
        j2 = snapshot.counters.j2,
        d1 = snapshot.counters.d1,
        d2 = snapshot.counters.d2,
        airdrops = snapshot.airdrop_count,
        heli_crashes = snapshot.heli_crash_count,
        traders = snapshot.trader_count,
        missions = snapshot.mission_total(),
        lines = snapshot.lines_processed,
        violations = snapshot.invariant_violations,
        cursor = snapshot.cursor,
        "server status"
    );
}

/// Build info and number of configured servers. Called once at build time.
fn record_daemon_metrics(server_count: usize) {
    use emerald_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_SERVERS_CONFIGURED).set(server_count as f64);

    tracing::debug!(
        server_count = server_count,
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}

/// Refreshes the uptime gauge every 10 seconds.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    use emerald_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use emerald_core::event::LogEvent;
    use emerald_core::types::{PlayerId, ServerId};
    use emerald_ingest::EventSink;

    #[test]
    fn write_pid_file_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("run").join("emerald.pid");

        write_pid_file(&pid_file).expect("should create parent and write");

        let content = fs::read_to_string(&pid_file).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn write_pid_file_fails_if_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("emerald.pid");
        fs::write(&pid_file, "12345").unwrap();

        let err = write_pid_file(&pid_file).unwrap_err().to_string();
        assert!(err.contains("already exists"), "got: {err}");
        assert!(err.contains("12345"), "got: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn write_pid_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("emerald.pid");
        write_pid_file(&pid_file).unwrap();

        let mode = fs::metadata(&pid_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn remove_pid_file_handles_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        remove_pid_file(&dir.path().join("missing.pid"));
    }

    fn event(server: &ServerId, id: &str) -> ServerEvent {
        ServerEvent::new(
            server.clone(),
            LogEvent::Join {
                player_id: PlayerId::new(id),
            },
            0,
            "trace",
        )
    }

    #[tokio::test]
    async fn stream_logger_drains_buffered_events_on_shutdown() {
        let server = ServerId::new("eu-1");
        let (sink, stream) = EventSink::channel(server.clone(), 16, Duration::from_secs(5));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        for id in ["aa", "bb", "cc"] {
            assert!(sink.send(event(&server, id)).await);
        }
        let task = spawn_stream_logger(stream, shutdown_rx);
        let _ = shutdown_tx.send(());

        let consumed = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("logger should stop")
            .unwrap();
        assert_eq!(consumed, 3);
    }

    #[tokio::test]
    async fn stream_logger_stops_on_shutdown_when_idle() {
        let server = ServerId::new("eu-1");
        let (_sink, stream) = EventSink::channel(server, 16, Duration::from_secs(5));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = spawn_stream_logger(stream, shutdown_rx);
        let _ = shutdown_tx.send(());

        let consumed = tokio::time::timeout(Duration::from_millis(200), task)
            .await
            .expect("logger should stop")
            .unwrap();
        assert_eq!(consumed, 0);
    }
}
