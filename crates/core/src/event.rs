//! Events -- what the ingest engine publishes to its collaborators.
//!
//! A classified log line becomes a [`LogEvent`]. Once it has been accepted
//! by the lifecycle tracker or the world-event deduper it is wrapped in a
//! [`ServerEvent`] and pushed to the sink. Counter changes are published
//! separately as [`CounterSnapshot`]s, where only the latest value matters.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::types::{LifecycleCounters, LifecycleState, PlayerId, ServerId, WorldEventKind};

// --- module names ---

/// Ingest engine module name
pub const MODULE_INGEST: &str = "ingest";

// --- event types ---

/// Player lifecycle event type
pub const EVENT_TYPE_PLAYER: &str = "player";
/// World / mission event type
pub const EVENT_TYPE_WORLD: &str = "world";

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// When the event was produced
    pub timestamp: SystemTime,
    /// Module that produced the event
    pub source_module: String,
    /// Trace id linking events from the same poll batch
    pub trace_id: String,
}

impl EventMetadata {
    /// Creates metadata that joins an existing trace.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// Creates metadata with a fresh UUID v4 trace id.
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self::new(source_module, uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] source={} trace={}",
            unix_timestamp_str(self.timestamp),
            self.source_module,
            self.trace_id,
        )
    }
}

/// Common interface of published events.
pub trait Event: Send + Sync + 'static {
    /// Unique event id (UUID v4)
    fn event_id(&self) -> &str;

    fn metadata(&self) -> &EventMetadata;

    /// Event type name used for logging and routing
    fn event_type(&self) -> &str;
}

/// Typed outcome of classifying one log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    /// Player entered the join queue
    Queue {
        player_id: PlayerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Player finished joining
    Join { player_id: PlayerId },
    /// Player connection closed
    Disconnect { player_id: PlayerId },
    /// Airdrop in flight
    Airdrop { event_id: String },
    /// Helicopter crash site spawned
    HeliCrash { event_id: String },
    /// Trader spawned
    Trader { event_id: String },
    /// Mission became ready
    Mission { mission_id: String, level: u8 },
}

impl LogEvent {
    /// Player id for lifecycle events.
    pub fn player_id(&self) -> Option<&PlayerId> {
        match self {
            Self::Queue { player_id, .. }
            | Self::Join { player_id }
            | Self::Disconnect { player_id } => Some(player_id),
            _ => None,
        }
    }

    /// World-event identity for airdrop, heli crash, trader and mission events.
    pub fn world_key(&self) -> Option<(WorldEventKind, &str)> {
        match self {
            Self::Airdrop { event_id } => Some((WorldEventKind::Airdrop, event_id)),
            Self::HeliCrash { event_id } => Some((WorldEventKind::HeliCrash, event_id)),
            Self::Trader { event_id } => Some((WorldEventKind::Trader, event_id)),
            Self::Mission { mission_id, .. } => Some((WorldEventKind::Mission, mission_id)),
            _ => None,
        }
    }

    pub fn is_player_event(&self) -> bool {
        self.player_id().is_some()
    }

    /// Short label, also used as a metrics label value.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Queue { .. } => "queue",
            Self::Join { .. } => "join",
            Self::Disconnect { .. } => "disconnect",
            Self::Airdrop { .. } => "airdrop",
            Self::HeliCrash { .. } => "heli_crash",
            Self::Trader { .. } => "trader",
            Self::Mission { .. } => "mission",
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue { player_id, .. }
            | Self::Join { player_id }
            | Self::Disconnect { player_id } => write!(f, "{} player={}", self.label(), player_id),
            Self::Mission { mission_id, level } => {
                write!(f, "mission id={mission_id} level={level}")
            }
            Self::Airdrop { event_id } | Self::HeliCrash { event_id } | Self::Trader { event_id } => {
                write!(f, "{} id={}", self.label(), event_id)
            }
        }
    }
}

/// An accepted event, tagged with the server it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEvent {
    /// Unique event id
    pub id: String,
    pub metadata: EventMetadata,
    pub server_id: ServerId,
    pub event: LogEvent,
    /// Byte offset of the line in the log file
    pub offset: u64,
}

impl ServerEvent {
    pub fn new(server_id: ServerId, event: LogEvent, offset: u64, trace_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(MODULE_INGEST, trace_id),
            server_id,
            event,
            offset,
        }
    }
}

impl Event for ServerEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &str {
        if self.event.is_player_event() {
            EVENT_TYPE_PLAYER
        } else {
            EVENT_TYPE_WORLD
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServerEvent[{}] server={} {} offset={}",
            &self.id[..8.min(self.id.len())],
            self.server_id,
            self.event,
            self.offset,
        )
    }
}

/// Derived counters for one server at one point in time.
///
/// `player_count` and `queue_count` are already resolved against the
/// invariant policy: under `clamp` they are never negative, under `flag`
/// they carry the raw value so the defect stays visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub server_id: ServerId,
    /// PC = j2 - d1
    pub player_count: i64,
    /// QC = jq - j2 - d2
    pub queue_count: i64,
    pub counters: LifecycleCounters,
    pub airdrop_count: u64,
    pub heli_crash_count: u64,
    pub trader_count: u64,
    /// Emitted missions per level
    pub mission_counts: BTreeMap<u8, u64>,
    /// Tracked sessions per lifecycle state
    pub sessions: BTreeMap<String, u64>,
    pub lines_processed: u64,
    pub unclassified_count: u64,
    pub suppressed_count: u64,
    pub invariant_violations: u64,
    /// Committed byte offset in the current file
    pub cursor: u64,
}

impl CounterSnapshot {
    /// All-zero snapshot for a server that has not processed anything.
    pub fn empty(server_id: ServerId) -> Self {
        Self {
            server_id,
            player_count: 0,
            queue_count: 0,
            counters: LifecycleCounters::default(),
            airdrop_count: 0,
            heli_crash_count: 0,
            trader_count: 0,
            mission_counts: BTreeMap::new(),
            sessions: BTreeMap::new(),
            lines_processed: 0,
            unclassified_count: 0,
            suppressed_count: 0,
            invariant_violations: 0,
            cursor: 0,
        }
    }

    /// Total emitted missions across levels.
    pub fn mission_total(&self) -> u64 {
        self.mission_counts.values().sum()
    }

    /// Number of tracked sessions in `state`.
    pub fn sessions_in(&self, state: LifecycleState) -> u64 {
        self.sessions.get(&state.to_string()).copied().unwrap_or(0)
    }
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server={} PC={} QC={} jq={} j2={} d1={} d2={}",
            self.server_id,
            self.player_count,
            self.queue_count,
            self.counters.jq,
            self.counters.j2,
            self.counters.d1,
            self.counters.d2,
        )
    }
}

fn unix_timestamp_str(time: SystemTime) -> String {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => format!("{}", duration.as_secs()),
        Err(_) => "unknown".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_metadata_new_preserves_trace_id() {
        let meta = EventMetadata::new("ingest", "trace-abc-123");
        assert_eq!(meta.source_module, "ingest");
        assert_eq!(meta.trace_id, "trace-abc-123");
        assert!(meta.timestamp <= SystemTime::now());
    }

    #[test]
    fn event_metadata_with_new_trace_generates_uuid() {
        let meta = EventMetadata::with_new_trace("ingest");
        assert_eq!(meta.trace_id.len(), 36);
        assert_eq!(meta.trace_id.chars().filter(|c| *c == '-').count(), 4);
    }

    #[test]
    fn player_events_expose_player_id() {
        let event = LogEvent::Join {
            player_id: PlayerId::new("abc"),
        };
        assert_eq!(event.player_id().map(PlayerId::as_str), Some("abc"));
        assert!(event.world_key().is_none());
        assert!(event.is_player_event());
    }

    #[test]
    fn world_events_expose_identity() {
        let event = LogEvent::Mission {
            mission_id: "GA_Military_02_mis1".to_owned(),
            level: 4,
        };
        assert_eq!(
            event.world_key(),
            Some((WorldEventKind::Mission, "GA_Military_02_mis1"))
        );
        assert!(!event.is_player_event());
    }

    #[test]
    fn server_event_type_follows_payload() {
        let player = ServerEvent::new(
            ServerId::new("eu-1"),
            LogEvent::Disconnect {
                player_id: PlayerId::new("p1"),
            },
            120,
            "trace",
        );
        assert_eq!(player.event_type(), EVENT_TYPE_PLAYER);

        let world = ServerEvent::new(
            ServerId::new("eu-1"),
            LogEvent::Airdrop {
                event_id: "drop-7".to_owned(),
            },
            240,
            "trace",
        );
        assert_eq!(world.event_type(), EVENT_TYPE_WORLD);
        assert!(world.to_string().contains("airdrop id=drop-7"));
    }

    #[test]
    fn log_event_serializes_with_kind_tag() {
        let event = LogEvent::HeliCrash {
            event_id: "crash-1".to_owned(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "heli_crash");
        assert_eq!(json["event_id"], "crash-1");
    }

    #[test]
    fn empty_snapshot_is_zeroed() {
        let snapshot = CounterSnapshot::empty(ServerId::new("na-2"));
        assert_eq!(snapshot.player_count, 0);
        assert_eq!(snapshot.mission_total(), 0);
        assert_eq!(snapshot.sessions_in(LifecycleState::Joined), 0);
        assert!(snapshot.to_string().contains("PC=0 QC=0"));
    }

    #[test]
    fn events_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<ServerEvent>();
        assert_send_sync::<CounterSnapshot>();
    }
}
