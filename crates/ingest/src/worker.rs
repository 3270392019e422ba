//! Per-server worker task.
//!
//! A [`ServerWorker`] owns everything belonging to one server: its
//! [`ServerState`], its [`LogTailer`] and the producer side of its
//! [`EventSink`]. It polls on a timer, executes admin commands between
//! polls and observes cancellation only between cycles, so a running
//! cycle always ends with its cursor committed.
//!
//! ```text
//! cancel ─┐
//! admin ──┼─> select ─> cycle: poll -> commit -> snapshot -> retire
//! timer ──┘
//! ```

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use emerald_core::event::CounterSnapshot;
use emerald_core::metrics as m;
use emerald_core::pipeline::HealthStatus;
use emerald_core::types::FileFingerprint;

use crate::config::SupervisorConfig;
use crate::cursor::{CursorRecord, CursorStore};
use crate::error::IngestError;
use crate::sink::EventSink;
use crate::state::ServerState;
use crate::tailer::LogTailer;

/// Operator commands, executed by the worker between polls.
#[derive(Debug)]
pub enum AdminCommand {
    /// Skip to the current end of file and zero all state
    Reset {
        reply: oneshot::Sender<Result<CounterSnapshot, IngestError>>,
    },
    /// Zero all state and replay the file from offset 0
    Rebuild {
        reply: oneshot::Sender<Result<CounterSnapshot, IngestError>>,
    },
    /// Current counters
    Snapshot { reply: oneshot::Sender<CounterSnapshot> },
}

pub(crate) struct ServerWorker {
    config: Arc<SupervisorConfig>,
    tailer: LogTailer,
    state: ServerState,
    sink: EventSink,
    store: Arc<dyn CursorStore>,
    commands: mpsc::Receiver<AdminCommand>,
    health: watch::Sender<HealthStatus>,
    file_failures: u32,
    store_failures: u32,
    /// Last `{cursor, fingerprint}` the store accepted
    committed: Option<(u64, FileFingerprint)>,
}

impl ServerWorker {
    pub(crate) fn new(
        config: Arc<SupervisorConfig>,
        tailer: LogTailer,
        state: ServerState,
        sink: EventSink,
        store: Arc<dyn CursorStore>,
        commands: mpsc::Receiver<AdminCommand>,
        health: watch::Sender<HealthStatus>,
    ) -> Self {
        Self {
            config,
            tailer,
            state,
            sink,
            store,
            commands,
            health,
            file_failures: 0,
            store_failures: 0,
            committed: None,
        }
    }

    /// Runs until `cancel` fires or the command channel closes.
    /// Returns the sink so a later start reuses the consumer's channels.
    pub(crate) async fn run(mut self, cancel: CancellationToken) -> EventSink {
        let server = self.state.server_id().to_string();
        tracing::info!(server = %server, path = %self.tailer.path().display(), "worker started");

        self.restore().await;
        self.sink.publish_snapshot(self.state.snapshot());

        let mut next_poll = tokio::time::Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(server = %server, "worker received shutdown signal");
                    break;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            if self.handle_command(command).await {
                                next_poll = tokio::time::Instant::now();
                            }
                        }
                        None => {
                            tracing::info!(server = %server, "command channel closed, stopping worker");
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(next_poll) => {
                    let delay = self.cycle().await;
                    next_poll = tokio::time::Instant::now() + delay;
                }
            }
        }

        self.flush().await;
        tracing::info!(server = %server, cursor = self.state.cursor, "worker stopped");
        self.sink
    }

    /// Loads the committed cursor, if any.
    async fn restore(&mut self) {
        let server_id = self.state.server_id().clone();
        match self.store.load(&server_id).await {
            Ok(Some(record)) if self.config.replay_on_start => {
                tracing::info!(
                    server = %server_id,
                    committed = record.cursor,
                    "replay_on_start set, ignoring committed cursor"
                );
            }
            Ok(Some(record)) => {
                tracing::info!(server = %server_id, cursor = record.cursor, "resuming from committed cursor");
                self.state.cursor = record.cursor;
                self.state.fingerprint = Some(record.fingerprint);
                self.committed = Some((record.cursor, record.fingerprint));
            }
            Ok(None) => {
                tracing::debug!(server = %server_id, "no committed cursor, reading from start");
            }
            Err(e) => {
                tracing::warn!(
                    server = %server_id,
                    error = %e,
                    "failed to load committed cursor, reading from start"
                );
            }
        }
    }

    /// One poll cycle. Returns the delay before the next one.
    async fn cycle(&mut self) -> std::time::Duration {
        let server = self.state.server_id().to_string();
        let started = Instant::now();
        let result = self.tailer.poll(&mut self.state, &self.sink).await;
        metrics::histogram!(m::INGEST_POLL_DURATION_SECONDS, m::LABEL_SERVER => server.clone())
            .record(started.elapsed().as_secs_f64());

        // progress made before an error is still committed
        self.commit().await;
        self.publish();

        let retired = self
            .state
            .retire_sessions(Utc::now(), self.config.session_retention());
        if retired > 0 {
            tracing::debug!(server = %server, retired, "retired idle sessions");
        }

        match result {
            Ok(report) => {
                if self.file_failures > 0 {
                    tracing::info!(
                        server = %server,
                        failures = self.file_failures,
                        "log file available again"
                    );
                    self.file_failures = 0;
                }
                if report.lines > 0 {
                    tracing::debug!(
                        server = %server,
                        lines = report.lines,
                        emitted = report.emitted,
                        bytes = report.bytes,
                        cursor = self.state.cursor,
                        "poll complete"
                    );
                }
                self.update_health();
                // keep reading while a bounded read left bytes behind
                let behind = self
                    .state
                    .fingerprint
                    .is_some_and(|fp| fp.size > self.state.cursor && report.bytes > 0);
                if behind {
                    std::time::Duration::ZERO
                } else {
                    self.config.poll_interval()
                }
            }
            Err(e) => {
                self.file_failures = self.file_failures.saturating_add(1);
                metrics::counter!(m::INGEST_FILE_ERRORS_TOTAL, m::LABEL_SERVER => server.clone())
                    .increment(1);
                let backoff = self.config.backoff_for(self.file_failures);
                if e.is_transient_file() {
                    tracing::warn!(
                        server = %server,
                        error = %e,
                        failures = self.file_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "log file not available, backing off"
                    );
                } else {
                    tracing::error!(server = %server, error = %e, "poll failed");
                }
                self.update_health();
                backoff
            }
        }
    }

    /// Commits the cursor if it moved since the last successful commit.
    async fn commit(&mut self) {
        let Some(fingerprint) = self.state.fingerprint else {
            return;
        };
        let current = (self.state.cursor, fingerprint);
        if self.committed == Some(current) {
            return;
        }

        let record = CursorRecord {
            server_id: self.state.server_id().clone(),
            cursor: current.0,
            fingerprint,
        };
        match self.store.commit(record).await {
            Ok(()) => {
                if self.store_failures > 0 {
                    tracing::info!(server = %self.state.server_id(), "cursor store writable again");
                }
                self.store_failures = 0;
                self.committed = Some(current);
            }
            Err(e) => {
                self.store_failures = self.store_failures.saturating_add(1);
                metrics::counter!(
                    m::INGEST_CURSOR_WRITE_FAILURES_TOTAL,
                    m::LABEL_SERVER => self.state.server_id().to_string()
                )
                .increment(1);
                tracing::warn!(
                    server = %self.state.server_id(),
                    error = %e,
                    failures = self.store_failures,
                    "cursor commit failed, will retry on next commit"
                );
            }
        }
    }

    /// Publishes the snapshot and gauges.
    fn publish(&self) {
        let snapshot = self.state.snapshot();
        let server = self.state.server_id().to_string();
        metrics::gauge!(m::INGEST_PLAYER_COUNT, m::LABEL_SERVER => server.clone())
            .set(snapshot.player_count as f64);
        metrics::gauge!(m::INGEST_QUEUE_COUNT, m::LABEL_SERVER => server.clone())
            .set(snapshot.queue_count as f64);
        metrics::gauge!(m::INGEST_CURSOR_BYTES, m::LABEL_SERVER => server)
            .set(snapshot.cursor as f64);
        self.sink.publish_snapshot(snapshot);
    }

    fn update_health(&self) {
        let threshold = self.config.degraded_after_failures;
        let status = if self.file_failures >= threshold {
            HealthStatus::Degraded(format!(
                "log file unavailable for {} consecutive polls",
                self.file_failures
            ))
        } else if self.store_failures >= threshold {
            HealthStatus::Degraded(format!(
                "cursor commit failed {} times in a row",
                self.store_failures
            ))
        } else {
            HealthStatus::Healthy
        };

        self.health.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                tracing::info!(server = %self.state.server_id(), health = %status, "worker health changed");
                *current = status;
                true
            }
        });
    }

    /// Executes one admin command. Returns `true` when a poll should follow immediately.
    async fn handle_command(&mut self, command: AdminCommand) -> bool {
        match command {
            AdminCommand::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
                false
            }
            AdminCommand::Reset { reply } => {
                let result = self.reset().await;
                let _ = reply.send(result);
                false
            }
            AdminCommand::Rebuild { reply } => {
                let result = self.rebuild().await;
                let _ = reply.send(result);
                true
            }
        }
    }

    async fn reset(&mut self) -> Result<CounterSnapshot, IngestError> {
        let fingerprint = self.tailer.skip_to_end().await?;
        tracing::info!(
            server = %self.state.server_id(),
            previous_cursor = self.state.cursor,
            cursor = fingerprint.size,
            "resetting state, skipping to end of file"
        );
        self.state.clear();
        self.state.cursor = fingerprint.size;
        self.state.fingerprint = Some(fingerprint);
        self.commit().await;
        self.publish();
        Ok(self.state.snapshot())
    }

    async fn rebuild(&mut self) -> Result<CounterSnapshot, IngestError> {
        let fingerprint = self.tailer.fingerprint().await?;
        tracing::info!(
            server = %self.state.server_id(),
            previous_cursor = self.state.cursor,
            "rebuilding state from start of file"
        );
        self.state.clear();
        self.state.cursor = 0;
        self.state.fingerprint = Some(fingerprint);
        self.tailer.reposition();
        self.commit().await;
        self.publish();
        Ok(self.state.snapshot())
    }

    /// Final commit on shutdown.
    async fn flush(&mut self) {
        self.commit().await;
        self.publish();
    }
}
