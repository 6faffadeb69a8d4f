//! Tracing setup.
//!
//! The subscriber is installed once with a reloadable filter so the level
//! from `jobboard.toml` can be applied after the config has been read.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Directives for a level: our crate at `level`, chatty dependencies capped.
fn directives(level: &str) -> String {
    format!("{level},deadpool=warn,redis=warn,hyper=warn")
}

/// Install the global subscriber at `info`.
///
/// `RUST_LOG` replaces the filter entirely when set. Safe to call twice.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives("info")));

    let (filter, handle) = reload::Layer::new(filter);
    if FILTER_HANDLE.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Apply the configured level. A no-op when `RUST_LOG` is set or tracing was
/// never initialised.
pub fn apply_logging_level(logging: &LoggingConfig) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    let level = logging.level.to_ascii_lowercase();
    match handle.modify(|filter| *filter = EnvFilter::new(directives(&level))) {
        Ok(()) => tracing::debug!(level = %level, "log level applied"),
        Err(e) => tracing::warn!(error = %e, "failed to apply log level"),
    }
}
