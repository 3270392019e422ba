//! `emerald` command-line tool.
//!
//! - `replay`: classify a whole log offline and check the counters
//! - `cursors`: list or delete committed cursors
//! - `config`: validate or show `emerald.toml`

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

use cli::{Cli, Commands};
use error::CliError;
use output::OutputWriter;

/// Dispatches a parsed command line.
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    match cli.command {
        Commands::Replay(args) => commands::replay::execute(args, &cli.config, &writer).await,
        Commands::Cursors(args) => commands::cursors::execute(args, &cli.config, &writer).await,
        Commands::Config(args) => commands::config::execute(args, &cli.config, &writer).await,
    }
}
