//! Command-line arguments for emerald-daemon.

use std::path::PathBuf;

use clap::Parser;

/// Emerald log ingestion daemon.
///
/// Tails every configured game-server log, tracks player lifecycle and
/// world-event counters, and publishes events and snapshots.
#[derive(Parser, Debug)]
#[command(name = "emerald-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to emerald.toml configuration file.
    #[arg(short, long, default_value = "/etc/emerald/emerald.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path. An empty value disables the PID file.
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut emerald_core::EmeraldConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file.clone_from(pid_file);
        }
    }
}
