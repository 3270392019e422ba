//! Offline replay of a complete log file.
//!
//! Runs every line of a file through the same classifier and state as a
//! live worker, without a cursor store or event channel, and reports the
//! resulting counters. Used to validate the classifier against real logs.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use emerald_core::event::CounterSnapshot;
use emerald_core::types::ServerId;

use crate::classifier::LineClassifier;
use crate::config::InvariantPolicy;
use crate::error::IngestError;
use crate::state::ServerState;
use crate::tailer::strip_cr;

/// Result of replaying one file.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub path: String,
    /// Bytes read
    pub bytes: u64,
    /// Events that would have been published
    pub events: u64,
    /// Raw PC/QC were never negative at the end of the file
    pub valid: bool,
    pub snapshot: CounterSnapshot,
}

/// Classifies `path` from start to end. A final line without a terminator is included.
pub async fn replay_file(
    path: &Path,
    classifier: &LineClassifier,
    policy: InvariantPolicy,
    max_line_length: usize,
) -> Result<ReplayReport, IngestError> {
    let path_str = path.display().to_string();
    let file = File::open(path)
        .await
        .map_err(|e| IngestError::FileUnavailable {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;

    let server_id = ServerId::new(
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "replay".to_owned()),
    );
    let mut state = ServerState::new(server_id, policy);
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut events = 0u64;
    let now = Utc::now();

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| IngestError::Read {
                path: path_str.clone(),
                reason: e.to_string(),
            })?;
        if n == 0 {
            break;
        }
        state.cursor += n as u64;

        let raw = strip_cr(buf.strip_suffix(b"\n").unwrap_or(&buf));
        if raw.len() > max_line_length {
            state.note_oversized_line();
            continue;
        }

        let line = String::from_utf8_lossy(raw);
        if let Some(event) = state.apply(classifier.classify(&line), now) {
            tracing::trace!(event = %event, "replayed event");
            events += 1;
        }
    }

    let snapshot = state.snapshot();
    let valid = snapshot.counters.holds_invariant() && snapshot.invariant_violations == 0;
    tracing::debug!(path = %path_str, events, valid, "replay complete");

    Ok(ReplayReport {
        path: path_str,
        bytes: state.cursor,
        events,
        valid,
        snapshot,
    })
}
