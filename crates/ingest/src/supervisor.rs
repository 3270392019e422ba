//! Ingestion supervisor -- one worker task per configured server.
//!
//! [`IngestionSupervisor`] implements the core
//! [`Pipeline`](emerald_core::pipeline::Pipeline) trait so the daemon drives
//! it with the same start/stop/health lifecycle as any other module. Admin
//! operations are forwarded to the owning worker and executed between its
//! polls.
//!
//! # Example
//! ```ignore
//! use emerald_ingest::{IngestionSupervisorBuilder, SupervisorConfig};
//!
//! let (mut supervisor, streams) = IngestionSupervisorBuilder::new()
//!     .config(SupervisorConfig::from_core(&core_config.ingest)?)
//!     .build()?;
//!
//! supervisor.start().await?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use emerald_core::error::{EmeraldError, PipelineError};
use emerald_core::event::CounterSnapshot;
use emerald_core::pipeline::{HealthStatus, Pipeline};
use emerald_core::types::ServerId;

use crate::classifier::LineClassifier;
use crate::config::SupervisorConfig;
use crate::cursor::{CursorStore, JsonCursorStore};
use crate::error::IngestError;
use crate::sink::{EventSink, EventStream};
use crate::state::ServerState;
use crate::tailer::LogTailer;
use crate::worker::{AdminCommand, ServerWorker};

const COMMAND_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorState {
    Initialized,
    Running,
    Stopped,
}

struct WorkerHandle {
    commands: mpsc::Sender<AdminCommand>,
    health: watch::Receiver<HealthStatus>,
    task: JoinHandle<EventSink>,
}

pub struct IngestionSupervisor {
    config: Arc<SupervisorConfig>,
    state: SupervisorState,
    classifier: Arc<LineClassifier>,
    store: Arc<dyn CursorStore>,
    /// Sinks of servers without a running worker
    idle_sinks: HashMap<ServerId, EventSink>,
    workers: BTreeMap<ServerId, WorkerHandle>,
    cancel: CancellationToken,
}

impl IngestionSupervisor {
    pub fn state_name(&self) -> &str {
        match self.state {
            SupervisorState::Initialized => "initialized",
            SupervisorState::Running => "running",
            SupervisorState::Stopped => "stopped",
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Configured server ids in config order.
    pub fn server_ids(&self) -> Vec<ServerId> {
        self.config.servers.iter().map(|s| s.id.clone()).collect()
    }

    /// Health of every running worker.
    pub fn server_health(&self) -> Vec<(ServerId, HealthStatus)> {
        self.workers
            .iter()
            .map(|(id, handle)| (id.clone(), worker_health(id, handle)))
            .collect()
    }

    /// Skips to the end of the server's log and zeroes its state.
    pub async fn reset(&self, server_id: &ServerId) -> Result<CounterSnapshot, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(server_id, AdminCommand::Reset { reply })
            .await?;
        rx.await
            .map_err(|_| IngestError::WorkerStopped(server_id.to_string()))?
    }

    /// Zeroes the server's state and replays its log from the start.
    pub async fn rebuild(&self, server_id: &ServerId) -> Result<CounterSnapshot, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(server_id, AdminCommand::Rebuild { reply })
            .await?;
        rx.await
            .map_err(|_| IngestError::WorkerStopped(server_id.to_string()))?
    }

    /// Current counters of one server.
    ///
    /// While stopped, the last snapshot published before shutdown is returned.
    pub async fn snapshot(&self, server_id: &ServerId) -> Result<CounterSnapshot, IngestError> {
        if let Some(sink) = self.idle_sinks.get(server_id) {
            return Ok(sink.latest_snapshot());
        }
        let (reply, rx) = oneshot::channel();
        self.send_command(server_id, AdminCommand::Snapshot { reply })
            .await?;
        rx.await
            .map_err(|_| IngestError::WorkerStopped(server_id.to_string()))
    }

    async fn send_command(
        &self,
        server_id: &ServerId,
        command: AdminCommand,
    ) -> Result<(), IngestError> {
        if !self.config.servers.iter().any(|s| &s.id == server_id) {
            return Err(IngestError::UnknownServer(server_id.to_string()));
        }
        let handle = self
            .workers
            .get(server_id)
            .ok_or_else(|| IngestError::WorkerStopped(server_id.to_string()))?;
        handle
            .commands
            .send(command)
            .await
            .map_err(|_| IngestError::WorkerStopped(server_id.to_string()))
    }

    fn spawn_worker(
        &self,
        server_id: ServerId,
        log_path: &std::path::Path,
        sink: EventSink,
    ) -> WorkerHandle {
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (health_tx, health) = watch::channel(HealthStatus::Healthy);

        let tailer = LogTailer::new(
            log_path,
            Arc::clone(&self.classifier),
            self.config.open_timeout(),
            self.config.max_read_bytes,
            self.config.max_line_length,
        );
        let state = ServerState::new(server_id, self.config.invariant_policy);
        let worker = ServerWorker::new(
            Arc::clone(&self.config),
            tailer,
            state,
            sink,
            Arc::clone(&self.store),
            command_rx,
            health_tx,
        );

        let task = tokio::spawn(worker.run(self.cancel.clone()));
        WorkerHandle {
            commands,
            health,
            task,
        }
    }
}

fn worker_health(server_id: &ServerId, handle: &WorkerHandle) -> HealthStatus {
    if handle.task.is_finished() {
        return HealthStatus::Unhealthy(format!("worker for {server_id} exited"));
    }
    handle.health.borrow().clone()
}

impl Pipeline for IngestionSupervisor {
    async fn start(&mut self) -> Result<(), EmeraldError> {
        if self.state == SupervisorState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        tracing::info!(servers = self.config.servers.len(), "starting ingestion supervisor");
        if self.config.servers.is_empty() {
            tracing::warn!("no servers configured, nothing to ingest");
        }

        self.cancel = CancellationToken::new();
        let servers = self.config.servers.clone();
        for spec in servers {
            let sink = self.idle_sinks.remove(&spec.id).ok_or_else(|| {
                PipelineError::InitFailed(format!(
                    "event sink for server {} is gone (was its worker lost?)",
                    spec.id
                ))
            })?;
            let handle = self.spawn_worker(spec.id.clone(), &spec.log_path, sink);
            self.workers.insert(spec.id, handle);
        }

        self.state = SupervisorState::Running;
        tracing::info!("ingestion supervisor started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EmeraldError> {
        if self.state != SupervisorState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping ingestion supervisor");
        self.cancel.cancel();

        let workers = std::mem::take(&mut self.workers);
        for (server_id, handle) in workers {
            match handle.task.await {
                Ok(sink) => {
                    self.idle_sinks.insert(server_id, sink);
                }
                Err(e) => {
                    tracing::error!(server = %server_id, error = %e, "worker task failed");
                }
            }
        }

        self.state = SupervisorState::Stopped;
        tracing::info!("ingestion supervisor stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            SupervisorState::Running => {
                let mut degraded = Vec::new();
                let mut unhealthy = Vec::new();
                for (server_id, handle) in &self.workers {
                    match worker_health(server_id, handle) {
                        HealthStatus::Healthy => {}
                        HealthStatus::Degraded(reason) => {
                            degraded.push(format!("{server_id}: {reason}"));
                        }
                        HealthStatus::Unhealthy(reason) => {
                            unhealthy.push(format!("{server_id}: {reason}"));
                        }
                    }
                }

                if !unhealthy.is_empty() {
                    unhealthy.extend(degraded);
                    HealthStatus::Unhealthy(unhealthy.join("; "))
                } else if !degraded.is_empty() {
                    HealthStatus::Degraded(degraded.join("; "))
                } else {
                    HealthStatus::Healthy
                }
            }
            SupervisorState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            SupervisorState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// Builds an [`IngestionSupervisor`] and the event streams of its servers.
pub struct IngestionSupervisorBuilder {
    config: SupervisorConfig,
    store: Option<Arc<dyn CursorStore>>,
}

impl IngestionSupervisorBuilder {
    pub fn new() -> Self {
        Self {
            config: SupervisorConfig::default(),
            store: None,
        }
    }

    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `store` instead of a [`JsonCursorStore`] at `cursor_store_path`.
    pub fn cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Returns the supervisor and one [`EventStream`] per server, in config order.
    pub fn build(self) -> Result<(IngestionSupervisor, Vec<EventStream>), IngestError> {
        self.config.validate()?;

        let classifier = Arc::new(LineClassifier::new(self.config.mission_min_level)?);
        let store = self.store.unwrap_or_else(|| {
            Arc::new(JsonCursorStore::new(&self.config.cursor_store_path)) as Arc<dyn CursorStore>
        });

        let mut idle_sinks = HashMap::with_capacity(self.config.servers.len());
        let mut streams = Vec::with_capacity(self.config.servers.len());
        for spec in &self.config.servers {
            let (sink, stream) = EventSink::channel(
                spec.id.clone(),
                self.config.event_channel_capacity,
                self.config.sink_send_warn(),
            );
            idle_sinks.insert(spec.id.clone(), sink);
            streams.push(stream);
        }

        let supervisor = IngestionSupervisor {
            config: Arc::new(self.config),
            state: SupervisorState::Initialized,
            classifier,
            store,
            idle_sinks,
            workers: BTreeMap::new(),
            cancel: CancellationToken::new(),
        };
        Ok((supervisor, streams))
    }
}

impl Default for IngestionSupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use crate::config::SupervisorConfigBuilder;
    use crate::cursor::MemoryCursorStore;

    fn config(path: &Path) -> SupervisorConfig {
        SupervisorConfigBuilder::new()
            .server("eu-1", path)
            .poll_interval_ms(10)
            .backoff_ms(10, 20)
            .degraded_after_failures(2)
            .build()
            .unwrap()
    }

    fn build(path: &Path) -> (IngestionSupervisor, Vec<EventStream>) {
        IngestionSupervisorBuilder::new()
            .config(config(path))
            .cursor_store(Arc::new(MemoryCursorStore::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_returns_one_stream_per_server() {
        let config = SupervisorConfigBuilder::new()
            .server("eu-1", "/tmp/a.log")
            .server("us-1", "/tmp/b.log")
            .build()
            .unwrap();
        let (supervisor, streams) = IngestionSupervisorBuilder::new()
            .config(config)
            .cursor_store(Arc::new(MemoryCursorStore::new()))
            .build()
            .unwrap();
        assert_eq!(supervisor.state_name(), "initialized");
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[1].server_id.as_str(), "us-1");
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let mut config = SupervisorConfig::default();
        config.poll_interval_ms = 0;
        let result = IngestionSupervisorBuilder::new().config(config).build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn lifecycle_and_double_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Deadside.log");
        std::fs::write(&path, "").unwrap();
        let (mut supervisor, _streams) = build(&path);

        assert!(supervisor.health_check().await.is_unhealthy());
        assert!(supervisor.stop().await.is_err());

        supervisor.start().await.unwrap();
        assert_eq!(supervisor.state_name(), "running");
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(
            err,
            EmeraldError::Pipeline(PipelineError::AlreadyRunning)
        ));

        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state_name(), "stopped");
        assert!(supervisor.health_check().await.is_unhealthy());
    }

    #[tokio::test]
    async fn unknown_server_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut supervisor, _streams) = build(&dir.path().join("Deadside.log"));
        supervisor.start().await.unwrap();

        let err = supervisor
            .snapshot(&ServerId::new("nowhere"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownServer(_)));
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_degrades_health() {
        let dir = tempfile::tempdir().unwrap();
        let (mut supervisor, _streams) = build(&dir.path().join("absent.log"));
        supervisor.start().await.unwrap();

        let mut status = HealthStatus::Healthy;
        for _ in 0..100 {
            status = supervisor.health_check().await;
            if status.is_degraded() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(status.is_degraded(), "got {status}");
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn restart_reuses_event_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Deadside.log");
        std::fs::write(&path, "LogSFPS: AirDrop id=d1 status=Flying\n").unwrap();
        let (mut supervisor, mut streams) = build(&path);

        supervisor.start().await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), streams[0].events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.event.label(), "airdrop");
        supervisor.stop().await.unwrap();

        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"LogSFPS: Trader id=t1 status=Initial\n"))
            .unwrap();

        supervisor.start().await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), streams[0].events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.event.label(), "trader");
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_while_stopped_returns_last_published() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Deadside.log");
        std::fs::write(&path, "LogSFPS: HeliCrash id=c1 status=Initial\n").unwrap();
        let (mut supervisor, mut streams) = build(&path);

        supervisor.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), streams[0].events.recv())
            .await
            .unwrap()
            .unwrap();
        supervisor.stop().await.unwrap();

        let snapshot = supervisor.snapshot(&ServerId::new("eu-1")).await.unwrap();
        assert_eq!(snapshot.heli_crash_count, 1);
    }
}
