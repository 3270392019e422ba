//! Domain types shared between the ingest engine, the daemon and the CLI.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a game server, as configured in `[[ingest.servers]]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Stable player identifier (EOS id without the leading `|`, lower-cased).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Normalizes the raw id: strips a leading `|` and lower-cases it.
    pub fn new(raw: &str) -> Self {
        Self(raw.trim_start_matches('|').to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a tracked player session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Queued,
    Joined,
    Disconnected,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Joined => write!(f, "joined"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Category of a deduplicated world event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldEventKind {
    Airdrop,
    HeliCrash,
    Trader,
    Mission,
}

impl fmt::Display for WorldEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Airdrop => write!(f, "airdrop"),
            Self::HeliCrash => write!(f, "heli_crash"),
            Self::Trader => write!(f, "trader"),
            Self::Mission => write!(f, "mission"),
        }
    }
}

/// Cheap identity of a log file, used to tell appends from replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// File size in bytes at the last check
    pub size: u64,
    /// Modification time at the last check
    pub mtime: DateTime<Utc>,
    /// Inode number on Unix; `None` where unavailable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<u64>,
}

impl FileFingerprint {
    /// Returns `true` if `current` cannot be the same file as `self`
    /// continued by appends, given `cursor` bytes already consumed.
    ///
    /// A file is considered replaced when it shrank (below the cursor or
    /// below its last observed size), when its modification time went
    /// backwards, or when both fingerprints carry a file id and the ids
    /// differ.
    pub fn is_rotated(&self, current: &FileFingerprint, cursor: u64) -> bool {
        if current.size < cursor || current.size < self.size {
            return true;
        }
        if current.mtime < self.mtime {
            return true;
        }
        matches!((self.file_id, current.file_id), (Some(a), Some(b)) if a != b)
    }
}

/// The four lifecycle counters for one file lifetime.
///
/// `jq` queued, `j2` joined, `d1` disconnected after join,
/// `d2` disconnected before join. PC and QC are derived, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleCounters {
    pub jq: u64,
    pub j2: u64,
    pub d1: u64,
    pub d2: u64,
}

impl LifecycleCounters {
    /// Raw player count `j2 - d1`; negative means an ordering bug upstream.
    pub fn raw_player_count(&self) -> i64 {
        to_i64(self.j2) - to_i64(self.d1)
    }

    /// Raw queue count `jq - j2 - d2`.
    pub fn raw_queue_count(&self) -> i64 {
        to_i64(self.jq) - to_i64(self.j2) - to_i64(self.d2)
    }

    /// `true` when both derived counts are non-negative.
    pub fn holds_invariant(&self) -> bool {
        self.raw_player_count() >= 0 && self.raw_queue_count() >= 0
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
