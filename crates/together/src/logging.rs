//! Logging system setup.
//!
//! `RUST_LOG` takes precedence over the configured level so that a single
//! module can be traced without editing the configuration file.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Builds the filter for the configured level unless `RUST_LOG` is set.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global tracing subscriber.
///
/// Fails if a subscriber was already installed.
pub fn setup_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = build_filter(&settings.level);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if settings.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_ids(true),
            )
            .try_init()
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;

    tracing::info!("🔧 Logging initialized with level: {}", settings.level);
    Ok(())
}
