//! Logging initialization for emerald-daemon.
//!
//! Configures `tracing-subscriber` from the `[general]` section. `RUST_LOG`
//! takes precedence over `log_level` when set. JSON output flattens event
//! fields so per-server fields (`server`, `cursor`, `pc`, `qc`) sit at the
//! top level of each line.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use emerald_core::config::GeneralConfig;

/// Targets capped at `warn` unless `RUST_LOG` says otherwise.
/// The metrics listener's HTTP stack logs every scrape at debug.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "metrics_exporter_prometheus"];

/// Initialize the global tracing subscriber.
///
/// Must be called once, before any tracing macros are used.
///
/// # Formats
///
/// * `"json"` - JSON lines, event fields flattened (production default)
/// * `"pretty"` - human-readable multi-line output
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_for_level(&config.log_level)?,
    };

    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize JSON tracing subscriber: {}", e)
                })?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize pretty tracing subscriber: {}", e)
                })?;
        }
        _ => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                config.log_format
            ));
        }
    }

    Ok(())
}

/// Builds the filter for `general.log_level` with the quiet targets capped.
fn filter_for_level(level: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(level)
        .with_context(|| format!("invalid general.log_level '{level}'"))?;
    for target in QUIET_TARGETS {
        let directive: Directive = format!("{target}=warn")
            .parse()
            .with_context(|| format!("invalid directive for target '{target}'"))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}
