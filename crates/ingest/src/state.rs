//! Per-server ingestion state.
//!
//! [`ServerState`] is owned by exactly one worker. It combines the
//! lifecycle tracker, the world-event deduper, the read position and the
//! diagnostic counters, and resolves PC/QC against the invariant policy
//! when a [`CounterSnapshot`] is taken.

use chrono::{DateTime, Utc};

use emerald_core::event::{CounterSnapshot, LogEvent};
use emerald_core::metrics as m;
use emerald_core::types::{FileFingerprint, LifecycleCounters, ServerId};

use crate::classifier::Classification;
use crate::config::InvariantPolicy;
use crate::dedup::{DedupOutcome, WorldEventDeduper};
use crate::tracker::PlayerLifecycleTracker;

#[derive(Debug)]
pub struct ServerState {
    server_id: ServerId,
    policy: InvariantPolicy,
    /// Bytes consumed in the current file
    pub cursor: u64,
    /// Fingerprint observed at the last successful poll
    pub fingerprint: Option<FileFingerprint>,
    tracker: PlayerLifecycleTracker,
    deduper: WorldEventDeduper,
    lines_processed: u64,
    unclassified_count: u64,
    suppressed_count: u64,
    invariant_violations: u64,
    /// Set while PC or QC is negative
    violating: bool,
}

impl ServerState {
    pub fn new(server_id: ServerId, policy: InvariantPolicy) -> Self {
        Self {
            server_id,
            policy,
            cursor: 0,
            fingerprint: None,
            tracker: PlayerLifecycleTracker::new(),
            deduper: WorldEventDeduper::new(),
            lines_processed: 0,
            unclassified_count: 0,
            suppressed_count: 0,
            invariant_violations: 0,
            violating: false,
        }
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Applies one classified line. Returns the event to publish, if any.
    pub fn apply(&mut self, classification: Classification, now: DateTime<Utc>) -> Option<LogEvent> {
        self.lines_processed += 1;

        match classification {
            Classification::Unclassified => {
                self.unclassified_count += 1;
                None
            }
            Classification::Suppressed(reason) => {
                self.suppressed_count += 1;
                tracing::trace!(server = %self.server_id, %reason, "line suppressed");
                None
            }
            Classification::Event(event) => {
                if let Some(transition) = self.tracker.apply(&event, now) {
                    if !transition.counted {
                        tracing::debug!(
                            server = %self.server_id,
                            player = %transition.player_id,
                            "duplicate queue request ignored"
                        );
                        return None;
                    }
                    self.check_invariant();
                    return Some(event);
                }

                match self.deduper.observe(&event) {
                    DedupOutcome::New => Some(event),
                    DedupOutcome::Duplicate => {
                        metrics::counter!(
                            m::INGEST_DUPLICATES_TOTAL,
                            m::LABEL_SERVER => self.server_id.to_string()
                        )
                        .increment(1);
                        None
                    }
                    DedupOutcome::NotWorldEvent => None,
                }
            }
        }
    }

    /// Counts a line that was skipped without classification (too long).
    pub fn note_oversized_line(&mut self) {
        self.lines_processed += 1;
        self.unclassified_count += 1;
    }

    /// Counts a violation once per entry into a negative PC or QC.
    fn check_invariant(&mut self) {
        let counters = self.tracker.counters();
        if counters.holds_invariant() {
            self.violating = false;
            return;
        }
        if self.violating {
            return;
        }

        self.violating = true;
        self.invariant_violations += 1;
        metrics::counter!(
            m::INGEST_INVARIANT_VIOLATIONS_TOTAL,
            m::LABEL_SERVER => self.server_id.to_string()
        )
        .increment(1);

        let pc = counters.raw_player_count();
        let qc = counters.raw_queue_count();
        match self.policy {
            InvariantPolicy::Flag => tracing::error!(
                server = %self.server_id,
                pc,
                qc,
                jq = counters.jq,
                j2 = counters.j2,
                d1 = counters.d1,
                d2 = counters.d2,
                "negative player or queue count"
            ),
            InvariantPolicy::Clamp => tracing::warn!(
                server = %self.server_id,
                pc,
                qc,
                "negative player or queue count, clamping to zero"
            ),
        }
    }

    pub fn counters(&self) -> LifecycleCounters {
        self.tracker.counters()
    }

    pub fn tracker(&self) -> &PlayerLifecycleTracker {
        &self.tracker
    }

    pub fn deduper(&self) -> &WorldEventDeduper {
        &self.deduper
    }

    /// PC after applying the invariant policy.
    pub fn player_count(&self) -> i64 {
        self.resolve(self.counters().raw_player_count())
    }

    /// QC after applying the invariant policy.
    pub fn queue_count(&self) -> i64 {
        self.resolve(self.counters().raw_queue_count())
    }

    fn resolve(&self, raw: i64) -> i64 {
        match self.policy {
            InvariantPolicy::Flag => raw,
            InvariantPolicy::Clamp => raw.max(0),
        }
    }

    pub fn lines_processed(&self) -> u64 {
        self.lines_processed
    }

    pub fn unclassified_count(&self) -> u64 {
        self.unclassified_count
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed_count
    }

    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations
    }

    /// Retires idle disconnected sessions.
    pub fn retire_sessions(&mut self, now: DateTime<Utc>, retention: std::time::Duration) -> usize {
        self.tracker.retire_disconnected(now, retention)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            server_id: self.server_id.clone(),
            player_count: self.player_count(),
            queue_count: self.queue_count(),
            counters: self.counters(),
            airdrop_count: self.deduper.airdrop_count(),
            heli_crash_count: self.deduper.heli_crash_count(),
            trader_count: self.deduper.trader_count(),
            mission_counts: self.deduper.mission_counts().clone(),
            sessions: self.tracker.sessions_by_state(),
            lines_processed: self.lines_processed,
            unclassified_count: self.unclassified_count,
            suppressed_count: self.suppressed_count,
            invariant_violations: self.invariant_violations,
            cursor: self.cursor,
        }
    }

    /// Zeroes counters, sessions, the dedup set and diagnostics.
    /// Cursor and fingerprint are left to the caller.
    pub fn clear(&mut self) {
        self.tracker.reset();
        self.deduper.reset();
        self.lines_processed = 0;
        self.unclassified_count = 0;
        self.suppressed_count = 0;
        self.invariant_violations = 0;
        self.violating = false;
    }
}
