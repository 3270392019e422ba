//! Command handlers -- one module per subcommand

pub mod config;
pub mod cursors;
pub mod replay;

use std::path::Path;

use emerald_core::config::EmeraldConfig;

use crate::error::CliError;

/// Loads the config file, or the defaults (plus environment overrides) when it does not exist.
///
/// `replay` and `cursors` work without a config file; `config` commands do not.
pub(crate) async fn load_config_or_default(path: &Path) -> Result<EmeraldConfig, CliError> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(EmeraldConfig::load(path).await?);
    }

    tracing::debug!(path = %path.display(), "config file not found, using defaults");
    let mut config = EmeraldConfig::default();
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
