//! Player lifecycle state machine.
//!
//! ```text
//! Absent -> Queued -> Joined -> Disconnected
//! ```
//!
//! Every queue, join and disconnect is applied to the session of its
//! player and may bump one of the four lifecycle counters. PC and QC are
//! derived from the counters only, never from the session map.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};

use emerald_core::event::LogEvent;
use emerald_core::types::{LifecycleCounters, LifecycleState, PlayerId};

/// One player's session on one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSession {
    pub player_id: PlayerId,
    pub state: LifecycleState,
    /// Wall-clock time of the last applied event
    pub last_event_at: DateTime<Utc>,
    /// Display name from the join request, if any
    pub name: Option<String>,
}

/// Effect of one lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub player_id: PlayerId,
    /// `None` when the player had no session
    pub from: Option<LifecycleState>,
    pub to: LifecycleState,
    /// `true` when a counter was incremented
    pub counted: bool,
}

/// Per-server session map and counters.
#[derive(Debug, Default)]
pub struct PlayerLifecycleTracker {
    sessions: HashMap<PlayerId, PlayerSession>,
    counters: LifecycleCounters,
}

impl PlayerLifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a player event. Returns `None` for world events.
    pub fn apply(&mut self, event: &LogEvent, now: DateTime<Utc>) -> Option<Transition> {
        match event {
            LogEvent::Queue { player_id, name } => Some(self.queue(player_id, name.as_deref(), now)),
            LogEvent::Join { player_id } => Some(self.join(player_id, now)),
            LogEvent::Disconnect { player_id } => Some(self.disconnect(player_id, now)),
            _ => None,
        }
    }

    fn queue(&mut self, player_id: &PlayerId, name: Option<&str>, now: DateTime<Utc>) -> Transition {
        let from = self.sessions.get(player_id).map(|s| s.state);

        if let Some(state @ (LifecycleState::Queued | LifecycleState::Joined)) = from {
            // duplicate request for a live session
            if let Some(session) = self.sessions.get_mut(player_id) {
                session.last_event_at = now;
                if session.name.is_none() {
                    session.name = name.map(str::to_owned);
                }
            }
            return Transition {
                player_id: player_id.clone(),
                from,
                to: state,
                counted: false,
            };
        }

        self.counters.jq += 1;
        self.sessions.insert(
            player_id.clone(),
            PlayerSession {
                player_id: player_id.clone(),
                state: LifecycleState::Queued,
                last_event_at: now,
                name: name.map(str::to_owned),
            },
        );
        Transition {
            player_id: player_id.clone(),
            from,
            to: LifecycleState::Queued,
            counted: true,
        }
    }

    fn join(&mut self, player_id: &PlayerId, now: DateTime<Utc>) -> Transition {
        self.counters.j2 += 1;
        let from = self.set_state(player_id, LifecycleState::Joined, now);
        Transition {
            player_id: player_id.clone(),
            from,
            to: LifecycleState::Joined,
            counted: true,
        }
    }

    fn disconnect(&mut self, player_id: &PlayerId, now: DateTime<Utc>) -> Transition {
        let from = self.set_state(player_id, LifecycleState::Disconnected, now);
        if from == Some(LifecycleState::Joined) {
            self.counters.d1 += 1;
        } else {
            self.counters.d2 += 1;
        }
        Transition {
            player_id: player_id.clone(),
            from,
            to: LifecycleState::Disconnected,
            counted: true,
        }
    }

    /// Moves the session to `state`, creating it if needed. Returns the old state.
    fn set_state(
        &mut self,
        player_id: &PlayerId,
        state: LifecycleState,
        now: DateTime<Utc>,
    ) -> Option<LifecycleState> {
        match self.sessions.get_mut(player_id) {
            Some(session) => {
                let from = session.state;
                session.state = state;
                session.last_event_at = now;
                Some(from)
            }
            None => {
                self.sessions.insert(
                    player_id.clone(),
                    PlayerSession {
                        player_id: player_id.clone(),
                        state,
                        last_event_at: now,
                        name: None,
                    },
                );
                None
            }
        }
    }

    pub fn counters(&self) -> LifecycleCounters {
        self.counters
    }

    pub fn session(&self, player_id: &PlayerId) -> Option<&PlayerSession> {
        self.sessions.get(player_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of sessions per lifecycle state, keyed by state name.
    pub fn sessions_by_state(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for session in self.sessions.values() {
            *counts.entry(session.state.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Drops disconnected sessions idle for at least `retention`.
    /// Returns how many were removed. Counters are untouched.
    pub fn retire_disconnected(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            session.state != LifecycleState::Disconnected || now - session.last_event_at < retention
        });
        before - self.sessions.len()
    }

    /// Clears sessions and counters.
    pub fn reset(&mut self) {
        self.sessions.clear();
        self.counters = LifecycleCounters::default();
    }
}
