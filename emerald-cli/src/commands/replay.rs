//! `emerald replay` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use emerald_core::types::LifecycleState;
use emerald_ingest::{InvariantPolicy, LineClassifier, ReplayReport, replay_file};

use crate::cli::ReplayArgs;
use crate::commands::load_config_or_default;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `replay` command.
///
/// Settings not given on the command line come from `[ingest]`.
pub async fn execute(
    args: ReplayArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = load_config_or_default(config_path).await?;

    let policy: InvariantPolicy = args
        .policy
        .as_deref()
        .unwrap_or(&config.ingest.invariant_policy)
        .parse()?;
    let mission_min_level = args
        .mission_min_level
        .unwrap_or(config.ingest.mission_min_level);

    info!(path = %args.log.display(), ?policy, mission_min_level, "replaying log");

    let classifier = LineClassifier::new(mission_min_level)?;
    let report = replay_file(
        &args.log,
        &classifier,
        policy,
        config.ingest.max_line_length,
    )
    .await?;

    let output = ReplayOutput {
        policy,
        mission_min_level,
        report,
    };
    writer.render(&output)?;

    if args.strict && !output.report.valid {
        return Err(CliError::ReplayInvalid(format!(
            "{}: PC={} QC={} violations={}",
            output.report.path,
            output.report.snapshot.counters.raw_player_count(),
            output.report.snapshot.counters.raw_queue_count(),
            output.report.snapshot.invariant_violations,
        )));
    }
    Ok(())
}

/// Replay result together with the settings it was produced with.
#[derive(Serialize)]
pub struct ReplayOutput {
    pub policy: InvariantPolicy,
    pub mission_min_level: u8,
    #[serde(flatten)]
    pub report: ReplayReport,
}

impl Render for ReplayOutput {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let report = &self.report;
        let snapshot = &report.snapshot;
        let counters = &snapshot.counters;

        writeln!(w, "Replay: {} ({} bytes)", report.path.bold(), report.bytes)?;
        writeln!(
            w,
            "  Lines:     {} processed, {} unclassified, {} suppressed",
            snapshot.lines_processed, snapshot.unclassified_count, snapshot.suppressed_count
        )?;
        writeln!(w, "  Events:    {}", report.events)?;
        writeln!(
            w,
            "  Players:   PC={} QC={}",
            snapshot.player_count.to_string().bold(),
            snapshot.queue_count.to_string().bold()
        )?;
        writeln!(
            w,
            "  Counters:  jq={} j2={} d1={} d2={}",
            counters.jq, counters.j2, counters.d1, counters.d2
        )?;
        writeln!(
            w,
            "  Sessions:  {} queued, {} joined, {} disconnected",
            snapshot.sessions_in(LifecycleState::Queued),
            snapshot.sessions_in(LifecycleState::Joined),
            snapshot.sessions_in(LifecycleState::Disconnected)
        )?;
        writeln!(
            w,
            "  World:     {} airdrops, {} heli crashes, {} traders, {} missions",
            snapshot.airdrop_count,
            snapshot.heli_crash_count,
            snapshot.trader_count,
            snapshot.mission_total()
        )?;
        for (level, count) in &snapshot.mission_counts {
            writeln!(w, "    level {level}: {count}")?;
        }

        if report.valid {
            writeln!(w, "  Result:    {}", "VALID".green().bold())?;
        } else {
            writeln!(
                w,
                "  Result:    {} (raw PC={} QC={}, {} violations, policy {:?})",
                "INVALID".red().bold(),
                counters.raw_player_count(),
                counters.raw_queue_count(),
                snapshot.invariant_violations,
                self.policy
            )?;
        }
        Ok(())
    }
}
