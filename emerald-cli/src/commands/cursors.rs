//! `emerald cursors` command handler

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use emerald_core::config::EmeraldConfig;
use emerald_core::error::EmeraldError;
use emerald_core::types::ServerId;
use emerald_ingest::tailer::fingerprint_from_metadata;
use emerald_ingest::{CursorRecord, CursorStore, JsonCursorStore};

use crate::cli::{CursorsAction, CursorsArgs};
use crate::commands::load_config_or_default;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `cursors` command.
pub async fn execute(
    args: CursorsArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = load_config_or_default(config_path).await?;
    let store = JsonCursorStore::new(&config.ingest.cursor_store_path);

    match args.action {
        CursorsAction::List => {
            let report = build_cursor_list(&config, &store).await?;
            writer.render(&report)
        }
        CursorsAction::Reset { server, all } => {
            let report = reset_cursors(&store, server, all).await?;
            writer.render(&report)
        }
    }
}

/// Joins committed cursors with the configured servers and their current log files.
pub async fn build_cursor_list(
    config: &EmeraldConfig,
    store: &dyn CursorStore,
) -> Result<CursorListReport, CliError> {
    let records = store.list().await.map_err(EmeraldError::from)?;
    let mut committed: BTreeMap<String, CursorRecord> = records
        .into_iter()
        .map(|record| (record.server_id.to_string(), record))
        .collect();

    let mut rows = Vec::new();
    for server in &config.ingest.servers {
        let record = committed.remove(&server.id);
        rows.push(cursor_row(&server.id, Some(&server.log_path), record).await);
    }
    // committed cursors of servers no longer in the config
    for (id, record) in committed {
        rows.push(cursor_row(&id, None, Some(record)).await);
    }

    Ok(CursorListReport {
        store: config.ingest.cursor_store_path.clone(),
        cursors: rows,
    })
}

async fn cursor_row(id: &str, log_path: Option<&str>, record: Option<CursorRecord>) -> CursorRow {
    let current = match log_path {
        Some(path) => match tokio::fs::metadata(path).await {
            Ok(metadata) => Some(fingerprint_from_metadata(&metadata)),
            Err(e) => {
                warn!(server = id, path, error = %e, "log file not readable");
                None
            }
        },
        None => None,
    };

    let (pending_bytes, rotated) = match (&record, &current) {
        (Some(record), Some(current)) => {
            let rotated = record.fingerprint.is_rotated(current, record.cursor);
            let pending = if rotated {
                current.size
            } else {
                current.size.saturating_sub(record.cursor)
            };
            (Some(pending), Some(rotated))
        }
        (None, Some(current)) => (Some(current.size), None),
        _ => (None, None),
    };

    CursorRow {
        server_id: id.to_owned(),
        configured: log_path.is_some(),
        log_path: log_path.map(str::to_owned),
        cursor: record.as_ref().map(|r| r.cursor),
        committed_at_mtime: record.as_ref().map(|r| r.fingerprint.mtime.to_rfc3339()),
        log_size: current.map(|c| c.size),
        pending_bytes,
        rotated,
    }
}

/// Deletes the cursor of one server, or of every server with `all`.
pub async fn reset_cursors(
    store: &dyn CursorStore,
    server: Option<String>,
    all: bool,
) -> Result<CursorResetReport, CliError> {
    let targets: Vec<ServerId> = if all {
        store
            .list()
            .await
            .map_err(EmeraldError::from)?
            .into_iter()
            .map(|record| record.server_id)
            .collect()
    } else {
        let server = server
            .ok_or_else(|| CliError::Command("a server id or --all is required".to_owned()))?;
        vec![ServerId::new(server)]
    };

    let mut removed = Vec::new();
    let mut missing = Vec::new();
    for server_id in targets {
        if store.remove(&server_id).await.map_err(EmeraldError::from)? {
            info!(server = %server_id, "cursor removed");
            removed.push(server_id.to_string());
        } else {
            missing.push(server_id.to_string());
        }
    }

    Ok(CursorResetReport { removed, missing })
}

#[derive(Serialize)]
pub struct CursorListReport {
    pub store: String,
    pub cursors: Vec<CursorRow>,
}

/// One server's committed position against its log file.
#[derive(Serialize)]
pub struct CursorRow {
    pub server_id: String,
    /// Listed in `[[ingest.servers]]`
    pub configured: bool,
    pub log_path: Option<String>,
    /// Committed byte offset; `None` if never committed
    pub cursor: Option<u64>,
    /// mtime of the file when the cursor was committed
    pub committed_at_mtime: Option<String>,
    pub log_size: Option<u64>,
    /// Bytes the next start will read
    pub pending_bytes: Option<u64>,
    /// The log was replaced since the commit
    pub rotated: Option<bool>,
}

impl Render for CursorListReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Cursors (store: {})", self.store.bold())?;
        if self.cursors.is_empty() {
            writeln!(w, "  no servers configured and no cursors committed")?;
            return Ok(());
        }

        writeln!(
            w,
            "  {:<16} {:>12} {:>12} {:>12}  {}",
            "SERVER", "CURSOR", "LOG SIZE", "PENDING", "STATUS"
        )?;
        for row in &self.cursors {
            let dash = || "-".to_owned();
            let status = match (row.configured, row.rotated, row.cursor) {
                (false, _, _) => "not configured".yellow(),
                (true, Some(true), _) => "rotated".yellow(),
                (true, _, None) => "never committed".normal(),
                (true, None, Some(_)) => "log missing".red(),
                (true, Some(false), Some(_)) => "ok".green(),
            };
            writeln!(
                w,
                "  {:<16} {:>12} {:>12} {:>12}  {}",
                row.server_id,
                row.cursor.map_or_else(dash, |v| v.to_string()),
                row.log_size.map_or_else(dash, |v| v.to_string()),
                row.pending_bytes.map_or_else(dash, |v| v.to_string()),
                status
            )?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct CursorResetReport {
    pub removed: Vec<String>,
    /// Requested servers that had no cursor
    pub missing: Vec<String>,
}

impl Render for CursorResetReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        for id in &self.removed {
            writeln!(w, "{} cursor for {}", "removed".green(), id.bold())?;
        }
        for id in &self.missing {
            writeln!(w, "{} cursor for {}", "no".yellow(), id.bold())?;
        }
        if self.removed.is_empty() && self.missing.is_empty() {
            writeln!(w, "no cursors committed")?;
        }
        Ok(())
    }
}
