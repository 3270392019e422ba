//! Event sink -- the hand-off from a worker to its consumers.
//!
//! Discrete events go through a bounded `mpsc` channel: the worker waits
//! when it is full, so nothing is lost while a consumer is alive. Counter
//! snapshots go through a `watch` channel where only the latest value is
//! kept.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use emerald_core::event::{CounterSnapshot, ServerEvent};
use emerald_core::types::ServerId;

/// Producer side, owned by one worker.
#[derive(Debug)]
pub struct EventSink {
    server_id: ServerId,
    events: mpsc::Sender<ServerEvent>,
    snapshots: watch::Sender<CounterSnapshot>,
    warn_every: Duration,
    closed_logged: AtomicBool,
}

/// Consumer side for one server.
#[derive(Debug)]
pub struct EventStream {
    pub server_id: ServerId,
    /// Accepted events in file order
    pub events: mpsc::Receiver<ServerEvent>,
    /// Latest counters; intermediate values may be skipped
    pub snapshots: watch::Receiver<CounterSnapshot>,
}

impl EventSink {
    /// Creates a connected sink/stream pair.
    pub fn channel(
        server_id: ServerId,
        capacity: usize,
        warn_every: Duration,
    ) -> (EventSink, EventStream) {
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(CounterSnapshot::empty(server_id.clone()));
        (
            EventSink {
                server_id: server_id.clone(),
                events: event_tx,
                snapshots: snapshot_tx,
                warn_every,
                closed_logged: AtomicBool::new(false),
            },
            EventStream {
                server_id,
                events: event_rx,
                snapshots: snapshot_rx,
            },
        )
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Sends one event, waiting while the channel is full.
    ///
    /// Returns `false` only when the consumer is gone and the event was dropped.
    pub async fn send(&self, event: ServerEvent) -> bool {
        let send = self.events.send(event);
        tokio::pin!(send);

        let mut waited = Duration::ZERO;
        loop {
            tokio::select! {
                result = &mut send => {
                    return match result {
                        Ok(()) => true,
                        Err(mpsc::error::SendError(dropped)) => {
                            self.log_closed(&dropped);
                            false
                        }
                    };
                }
                _ = tokio::time::sleep(self.warn_every) => {
                    waited += self.warn_every;
                    tracing::warn!(
                        server = %self.server_id,
                        waited_ms = waited.as_millis() as u64,
                        "event channel full, waiting for consumer"
                    );
                }
            }
        }
    }

    fn log_closed(&self, dropped: &ServerEvent) {
        if !self.closed_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                server = %self.server_id,
                event = %dropped.event,
                "event consumer closed, dropping events"
            );
        } else {
            tracing::debug!(server = %self.server_id, event = %dropped.event, "event dropped");
        }
    }

    /// Publishes a snapshot if it differs from the last one.
    /// Returns `true` if a new value was published.
    pub fn publish_snapshot(&self, snapshot: CounterSnapshot) -> bool {
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        })
    }

    /// Last published snapshot.
    pub fn latest_snapshot(&self) -> CounterSnapshot {
        self.snapshots.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emerald_core::event::LogEvent;
    use emerald_core::types::PlayerId;

    fn event(id: &str) -> ServerEvent {
        ServerEvent::new(
            ServerId::new("eu-1"),
            LogEvent::Join {
                player_id: PlayerId::new(id),
            },
            0,
            "trace",
        )
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, mut stream) =
            EventSink::channel(ServerId::new("eu-1"), 8, Duration::from_secs(1));
        assert!(sink.send(event("a")).await);
        assert!(sink.send(event("b")).await);

        let first = stream.events.recv().await.unwrap();
        let second = stream.events.recv().await.unwrap();
        assert_eq!(first.event.player_id().unwrap().as_str(), "a");
        assert_eq!(second.event.player_id().unwrap().as_str(), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_applies_backpressure() {
        let (sink, mut stream) =
            EventSink::channel(ServerId::new("eu-1"), 1, Duration::from_millis(10));
        assert!(sink.send(event("a")).await);

        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let a = stream.events.recv().await.unwrap();
            let b = stream.events.recv().await.unwrap();
            (a, b)
        });

        // blocks until the consumer drains "a"
        assert!(sink.send(event("b")).await);
        let (a, b) = consumer.await.unwrap();
        assert_eq!(a.event.player_id().unwrap().as_str(), "a");
        assert_eq!(b.event.player_id().unwrap().as_str(), "b");
    }

    #[tokio::test]
    async fn closed_consumer_drops_events() {
        let (sink, stream) = EventSink::channel(ServerId::new("eu-1"), 4, Duration::from_secs(1));
        drop(stream);
        assert!(!sink.send(event("a")).await);
        assert!(!sink.send(event("b")).await);
    }

    #[tokio::test]
    async fn snapshots_coalesce() {
        let (sink, stream) = EventSink::channel(ServerId::new("eu-1"), 4, Duration::from_secs(1));
        let mut snap = CounterSnapshot::empty(ServerId::new("eu-1"));

        // unchanged value is not republished
        assert!(!sink.publish_snapshot(snap.clone()));

        for pc in 1..=3 {
            snap.player_count = pc;
            assert!(sink.publish_snapshot(snap.clone()));
        }
        assert_eq!(stream.snapshots.borrow().player_count, 3);
        assert_eq!(sink.latest_snapshot().player_count, 3);
    }
}
