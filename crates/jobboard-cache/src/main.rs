use std::{env, sync::Arc};

use jobboard_cache::CacheManager;
use jobboard_cache::config::loader::load_config;
use jobboard_cache::{metrics, observability, server};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From JOBBOARD_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (jobboard.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (JOBBOARD_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    observability::init_tracing();

    let (config_path, source) = resolve_config_path();

    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );

    observability::apply_logging_level(&cfg.logging);
    metrics::init_metrics();

    let cache = Arc::new(CacheManager::connect(cfg.cache.clone()).await);
    tracing::info!(
        redis_connected = cache.is_remote_connected(),
        "Cache manager ready"
    );

    if let Err(err) = server::serve(&cfg, Arc::clone(&cache)).await {
        eprintln!("Server error: {err}");
    }

    // Bound the final flush so a hung Redis cannot block exit
    if tokio::time::timeout(cfg.shutdown_timeout(), cache.close())
        .await
        .is_err()
    {
        tracing::warn!("Cache shutdown timed out");
    }
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: JOBBOARD_CONFIG
/// 3. Default: jobboard.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("JOBBOARD_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    ("jobboard.toml".to_string(), ConfigSource::Default)
}
