//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Emerald -- game-server log ingestion tooling.
///
/// Use `emerald <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "emerald", version, about, long_about = None)]
pub struct Cli {
    /// Path to the emerald.toml configuration file.
    #[arg(short, long, default_value = "emerald.toml", global = true)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify a whole log file offline and report its counters.
    Replay(ReplayArgs),

    /// Inspect or delete committed cursors.
    Cursors(CursorsArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- replay ----

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Log file to replay.
    pub log: PathBuf,

    /// Invariant policy (flag, clamp). Defaults to `[ingest] invariant_policy`.
    #[arg(long)]
    pub policy: Option<String>,

    /// Minimum mission level. Defaults to `[ingest] mission_min_level`.
    #[arg(long)]
    pub mission_min_level: Option<u8>,

    /// Exit with an error when the counters end up invalid.
    #[arg(long)]
    pub strict: bool,
}

// ---- cursors ----

#[derive(Args, Debug)]
pub struct CursorsArgs {
    #[command(subcommand)]
    pub action: CursorsAction,
}

#[derive(Subcommand, Debug)]
pub enum CursorsAction {
    /// List committed cursors and compare them with the current log files.
    List,
    /// Delete committed cursors so the next start reads from the beginning.
    ///
    /// Stop the daemon first; a running worker rewrites its cursor on the next commit.
    Reset {
        /// Server id to reset.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        server: Option<String>,

        /// Reset every server.
        #[arg(long)]
        all: bool,
    },
}

// ---- config ----

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only one section (general, ingest, metrics).
        #[arg(long)]
        section: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_replay_with_overrides() {
        let cli = Cli::try_parse_from([
            "emerald",
            "replay",
            "Deadside.log",
            "--policy",
            "flag",
            "--mission-min-level",
            "4",
            "--strict",
        ])
        .expect("should parse");
        match cli.command {
            Commands::Replay(args) => {
                assert_eq!(args.log, PathBuf::from("Deadside.log"));
                assert_eq!(args.policy.as_deref(), Some("flag"));
                assert_eq!(args.mission_min_level, Some(4));
                assert!(args.strict);
            }
            other => panic!("expected Replay, got {other:?}"),
        }
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "emerald", "cursors", "list", "--output", "json", "-c", "/etc/emerald.toml",
        ])
        .expect("should parse");
        assert!(matches!(cli.output, OutputFormat::Json));
        assert_eq!(cli.config, PathBuf::from("/etc/emerald.toml"));
    }

    #[test]
    fn cursors_reset_needs_server_or_all() {
        assert!(Cli::try_parse_from(["emerald", "cursors", "reset"]).is_err());
        assert!(Cli::try_parse_from(["emerald", "cursors", "reset", "eu-1", "--all"]).is_err());

        let cli = Cli::try_parse_from(["emerald", "cursors", "reset", "--all"]).expect("parse");
        match cli.command {
            Commands::Cursors(CursorsArgs {
                action: CursorsAction::Reset { server, all },
            }) => {
                assert!(server.is_none());
                assert!(all);
            }
            other => panic!("expected cursors reset, got {other:?}"),
        }
    }

    #[test]
    fn parse_config_show_section() {
        let cli = Cli::try_parse_from(["emerald", "config", "show", "--section", "ingest"])
            .expect("should parse");
        match cli.command {
            Commands::Config(ConfigArgs {
                action: ConfigAction::Show { section },
            }) => assert_eq!(section.as_deref(), Some("ingest")),
            other => panic!("expected config show, got {other:?}"),
        }
    }
}
