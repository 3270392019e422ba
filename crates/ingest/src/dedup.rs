//! World-event deduplication and tallies.
//!
//! The game repeats world lines (an airdrop logs `status=Flying` more than
//! once). Identity is `(kind, id)`; the first sighting is emitted and
//! tallied, later ones are dropped. The seen-set lives for one file
//! lifetime and is cleared on rotation or reset.

use std::collections::{BTreeMap, HashSet};

use emerald_core::event::LogEvent;
use emerald_core::types::WorldEventKind;

/// Outcome of offering an event to the deduper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First sighting; emit it
    New,
    /// Already emitted in this file lifetime
    Duplicate,
    /// Not a world event
    NotWorldEvent,
}

#[derive(Debug, Default)]
pub struct WorldEventDeduper {
    seen: HashSet<(WorldEventKind, String)>,
    airdrop_count: u64,
    heli_crash_count: u64,
    trader_count: u64,
    mission_counts: BTreeMap<u8, u64>,
    duplicates: u64,
}

impl WorldEventDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &LogEvent) -> DedupOutcome {
        let Some((kind, id)) = event.world_key() else {
            return DedupOutcome::NotWorldEvent;
        };

        if !self.seen.insert((kind, id.to_owned())) {
            self.duplicates += 1;
            tracing::debug!(kind = %kind, id, "duplicate world event discarded");
            return DedupOutcome::Duplicate;
        }

        match event {
            LogEvent::Mission { level, .. } => {
                *self.mission_counts.entry(*level).or_insert(0) += 1;
            }
            _ => match kind {
                WorldEventKind::Airdrop => self.airdrop_count += 1,
                WorldEventKind::HeliCrash => self.heli_crash_count += 1,
                WorldEventKind::Trader => self.trader_count += 1,
                WorldEventKind::Mission => {}
            },
        }
        DedupOutcome::New
    }

    pub fn airdrop_count(&self) -> u64 {
        self.airdrop_count
    }

    pub fn heli_crash_count(&self) -> u64 {
        self.heli_crash_count
    }

    pub fn trader_count(&self) -> u64 {
        self.trader_count
    }

    /// Emitted missions per level.
    pub fn mission_counts(&self) -> &BTreeMap<u8, u64> {
        &self.mission_counts
    }

    /// Duplicates discarded since the last reset.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
