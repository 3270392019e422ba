//! Line classification -- raw log line to exactly one [`Classification`].
//!
//! [`LineClassifier`] is pure: the same line always yields the same
//! result, and nothing outside the returned value changes. Patterns are
//! compiled once at construction.
//!
//! # Precedence
//! 1. player lifecycle lines ([`player`])
//! 2. suppressed markers (construction saves, encounter resets)
//! 3. world and mission lines ([`world`])
//!
//! # Example
//! ```ignore
//! use emerald_ingest::classifier::{Classification, LineClassifier};
//!
//! let classifier = LineClassifier::new(3)?;
//! let line = "LogSFPS: AirDrop id=drop-7 status=Flying";
//! assert!(matches!(classifier.classify(line), Classification::Event(_)));
//! ```

pub mod player;
pub mod world;

use std::fmt;

use regex::Regex;

use emerald_core::event::LogEvent;
use emerald_core::types::WorldEventKind;

use crate::error::IngestError;

use self::player::PlayerPatterns;
use self::world::WorldPatterns;

/// Why a recognised line produces no event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressReason {
    /// Periodic construction save
    ConstructionSave,
    /// Encounter reset
    EncounterReset,
    /// World event whose status does not qualify (e.g. airdrop `Dropped`)
    WorldStatus { kind: WorldEventKind, status: String },
    /// Mission not in the `Ready` state
    MissionNotReady { state: String },
    /// Ready mission below the configured level
    MissionBelowLevel { level: u8 },
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConstructionSave => write!(f, "construction save"),
            Self::EncounterReset => write!(f, "encounter reset"),
            Self::WorldStatus { kind, status } => write!(f, "{kind} status {status}"),
            Self::MissionNotReady { state } => write!(f, "mission state {state}"),
            Self::MissionBelowLevel { level } => write!(f, "mission level {level}"),
        }
    }
}

/// Result of classifying one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Event(LogEvent),
    Suppressed(SuppressReason),
    /// No pattern matched, or a recognised line lacked a required field
    Unclassified,
}

impl Classification {
    /// Outcome label used for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Suppressed(_) => "suppressed",
            Self::Unclassified => "unclassified",
        }
    }
}

/// Classifies Deadside server log lines.
pub struct LineClassifier {
    /// `[2025.05.17-02.01.30:123][ 42]` engine prefix
    prefix: Regex,
    player: PlayerPatterns,
    world: WorldPatterns,
    mission_min_level: u8,
}

impl LineClassifier {
    /// Compiles all patterns. Missions below `mission_min_level` are suppressed.
    pub fn new(mission_min_level: u8) -> Result<Self, IngestError> {
        Ok(Self {
            prefix: Regex::new(
                r"^\[\d{4}\.\d{2}\.\d{2}-\d{2}\.\d{2}\.\d{2}:\d{3}\]\[\s*\d+\]",
            )?,
            player: PlayerPatterns::new()?,
            world: WorldPatterns::new()?,
            mission_min_level,
        })
    }

    pub fn mission_min_level(&self) -> u8 {
        self.mission_min_level
    }

    /// Classifies one line (without its terminator).
    pub fn classify(&self, line: &str) -> Classification {
        let body = self.strip_prefix(line);

        if let Some(classification) = self.player.classify(body) {
            return classification;
        }

        if let Some(reason) = self.world.suppressed_marker(body) {
            return Classification::Suppressed(reason);
        }

        self.world
            .classify(body, self.mission_min_level)
            .unwrap_or(Classification::Unclassified)
    }

    fn strip_prefix<'a>(&self, line: &'a str) -> &'a str {
        match self.prefix.find(line) {
            Some(m) => line[m.end()..].trim_start(),
            None => line.trim_start(),
        }
    }
}

impl fmt::Debug for LineClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineClassifier")
            .field("mission_min_level", &self.mission_min_level)
            .finish_non_exhaustive()
    }
}
