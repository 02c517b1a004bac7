//! Logging bootstrap.
//!
//! Diagnostics go to stderr through `tracing`; user-facing output is the
//! job of [`crate::console::Console`].

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

/// Environment variables consulted for a filter directive, in order.
const ENV_FILTER_VARS: [&str; 2] = ["TANKOBON_LOG", "RUST_LOG"];

/// Picks the filter directive: environment first, then the configured level.
fn directive(config: &LoggingConfig) -> String {
    ENV_FILTER_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .filter(|directive| !directive.trim().is_empty())
        .unwrap_or_else(|| config.level.clone())
}

/// Installs the global subscriber.
///
/// Returns `false` when a subscriber was already installed; the first
/// call wins.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let env_filter = EnvFilter::try_new(directive(config))
        .with_context(|| format!("Invalid log filter '{}'", config.level))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    Ok(tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok())
}
