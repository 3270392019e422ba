//! Log tailing -- one poll step over a server's append-only log.
//!
//! Each poll fingerprints the file, decides between "grown" and
//! "replaced", reads `[cursor, EOF)` in bounded chunks and feeds every
//! complete line through the classifier and the server state in file
//! order. The cursor only moves past fully applied lines, so a partial
//! trailing line is read again on the next poll.
//!
//! # Rotation
//! - the file is smaller than the cursor or than its last observed size
//! - the modification time went backwards
//! - the inode changed (Unix, when both sides know it)

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use emerald_core::event::ServerEvent;
use emerald_core::metrics as m;
use emerald_core::types::FileFingerprint;

use crate::classifier::LineClassifier;
use crate::error::IngestError;
use crate::sink::EventSink;
use crate::state::ServerState;

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// The file was replaced and state was reset before reading
    pub rotated: bool,
    /// Complete lines consumed
    pub lines: u64,
    /// Events published
    pub emitted: u64,
    /// Bytes the cursor advanced
    pub bytes: u64,
}

/// Tails one server's log.
pub struct LogTailer {
    path: PathBuf,
    classifier: Arc<LineClassifier>,
    open_timeout: Duration,
    max_read_bytes: usize,
    max_line_length: usize,
    /// Inside a line whose start was not applied (oversized, or cut by a
    /// reset) and whose end has not been read yet
    skipping_line: bool,
}

impl LogTailer {
    pub fn new(
        path: impl Into<PathBuf>,
        classifier: Arc<LineClassifier>,
        open_timeout: Duration,
        max_read_bytes: usize,
        max_line_length: usize,
    ) -> Self {
        Self {
            path: path.into(),
            classifier,
            open_timeout,
            max_read_bytes,
            max_line_length,
            skipping_line: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forgets any partially skipped line. Used when the cursor is moved externally.
    pub fn reposition(&mut self) {
        self.skipping_line = false;
    }

    async fn open(&self) -> Result<File, IngestError> {
        match tokio::time::timeout(self.open_timeout, File::open(&self.path)).await {
            Ok(Ok(file)) => Ok(file),
            Ok(Err(e)) => Err(IngestError::FileUnavailable {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(IngestError::OpenTimeout {
                path: self.path.display().to_string(),
                timeout_ms: self.open_timeout.as_millis() as u64,
            }),
        }
    }

    async fn fingerprint_of(&self, file: &File) -> Result<FileFingerprint, IngestError> {
        let metadata = file.metadata().await.map_err(|e| IngestError::Read {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(fingerprint_from_metadata(&metadata))
    }

    /// Opens the file and returns its current fingerprint.
    pub async fn fingerprint(&self) -> Result<FileFingerprint, IngestError> {
        let file = self.open().await?;
        self.fingerprint_of(&file).await
    }

    /// Fingerprints the file for a cursor placed at EOF.
    ///
    /// When the file ends inside an unterminated line, the rest of that
    /// line is skipped once its terminator arrives.
    pub async fn skip_to_end(&mut self) -> Result<FileFingerprint, IngestError> {
        let mut file = self.open().await?;
        let current = self.fingerprint_of(&file).await?;
        self.skipping_line = false;
        if current.size == 0 {
            return Ok(current);
        }

        file.seek(SeekFrom::Start(current.size - 1))
            .await
            .map_err(|e| self.read_error(e))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)
            .await
            .map_err(|e| self.read_error(e))?;
        self.skipping_line = last[0] != b'\n';
        Ok(current)
    }

    /// Runs one poll step against `state`, publishing accepted events to `sink`.
    ///
    /// On error the cursor stays at the last fully applied line.
    pub async fn poll(
        &mut self,
        state: &mut ServerState,
        sink: &EventSink,
    ) -> Result<PollReport, IngestError> {
        let mut file = self.open().await?;
        let current = self.fingerprint_of(&file).await?;
        let mut report = PollReport::default();
        let server = state.server_id().to_string();

        let rotated = match &state.fingerprint {
            Some(previous) => previous.is_rotated(&current, state.cursor),
            None => current.size < state.cursor,
        };
        if rotated {
            tracing::info!(
                server = %server,
                path = %self.path.display(),
                previous_cursor = state.cursor,
                size = current.size,
                "log rotation detected, resetting state"
            );
            metrics::counter!(m::INGEST_ROTATIONS_TOTAL, m::LABEL_SERVER => server.clone())
                .increment(1);
            state.clear();
            state.cursor = 0;
            self.skipping_line = false;
            report.rotated = true;
        }
        state.fingerprint = Some(current);

        if current.size <= state.cursor {
            return Ok(report);
        }

        let start = state.cursor;
        let available = current.size - start;
        let to_read = available.min(self.max_read_bytes as u64);

        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| self.read_error(e))?;
        let mut buf = Vec::with_capacity(to_read as usize);
        (&mut file)
            .take(to_read)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| self.read_error(e))?;

        let trace_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut line_start = 0usize;

        while let Some(pos) = buf[line_start..].iter().position(|&b| b == b'\n') {
            let line_end = line_start + pos;
            let raw = strip_cr(&buf[line_start..line_end]);
            let offset = start + line_start as u64;

            if self.skipping_line {
                // tail of a line whose start was not applied
                self.skipping_line = false;
            } else if raw.len() > self.max_line_length {
                self.note_oversized(state, &server, offset, raw.len());
            } else {
                let line = String::from_utf8_lossy(raw);
                let classification = self.classifier.classify(&line);
                metrics::counter!(
                    m::INGEST_LINES_TOTAL,
                    m::LABEL_SERVER => server.clone(),
                    m::LABEL_OUTCOME => classification.outcome()
                )
                .increment(1);

                if let Some(event) = state.apply(classification, now) {
                    let label = event.label();
                    tracing::debug!(server = %server, offset, event = %event, "event accepted");
                    let server_event =
                        ServerEvent::new(state.server_id().clone(), event, offset, &trace_id);
                    if sink.send(server_event).await {
                        metrics::counter!(
                            m::INGEST_EVENTS_EMITTED_TOTAL,
                            m::LABEL_SERVER => server.clone(),
                            m::LABEL_KIND => label
                        )
                        .increment(1);
                        report.emitted += 1;
                    }
                }
            }

            line_start = line_end + 1;
            state.cursor = start + line_start as u64;
            report.lines += 1;
        }

        // held-back partial line; skip it only once it is known to be oversized
        let partial = buf.len() - line_start;
        let chunk_full_without_newline = line_start == 0 && partial > 0 && to_read < available;
        if partial > self.max_line_length
            || chunk_full_without_newline
            || (self.skipping_line && partial > 0)
        {
            if !self.skipping_line {
                self.note_oversized(state, &server, start + line_start as u64, partial);
                self.skipping_line = true;
            }
            state.cursor = start + buf.len() as u64;
        }

        report.bytes = state.cursor - start;
        Ok(report)
    }

    fn note_oversized(&self, state: &mut ServerState, server: &str, offset: u64, len: usize) {
        tracing::debug!(
            server,
            offset,
            len,
            max = self.max_line_length,
            "oversized line skipped"
        );
        metrics::counter!(
            m::INGEST_LINES_TOTAL,
            m::LABEL_SERVER => server.to_owned(),
            m::LABEL_OUTCOME => "unclassified"
        )
        .increment(1);
        state.note_oversized_line();
    }

    fn read_error(&self, e: std::io::Error) -> IngestError {
        IngestError::Read {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

/// Fingerprint of a file from its metadata. A missing mtime reads as the epoch.
pub fn fingerprint_from_metadata(metadata: &std::fs::Metadata) -> FileFingerprint {
    let mtime = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    FileFingerprint {
        size: metadata.len(),
        mtime,
        file_id: file_id(metadata),
    }
}

/// Drops one trailing `\r`.
pub(crate) fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(unix)]
fn file_id(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_id(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}
