use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Two-tier cache configuration
    #[serde(default)]
    pub cache: CacheSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.cache.validate()
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.server.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Grace period for in-flight requests on shutdown
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Cache manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// TTL for writes that don't specify one, in seconds
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Shared remote tier
    #[serde(default)]
    pub redis: RedisSettings,

    /// Process-local tier
    #[serde(default)]
    pub memory: MemorySettings,

    /// Edge caching header profiles
    #[serde(default)]
    pub cdn: CdnSettings,
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            redis: RedisSettings::default(),
            memory: MemorySettings::default(),
            cdn: CdnSettings::default(),
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_ttl_secs == 0 {
            return Err("cache.default_ttl_secs must be > 0".into());
        }
        if self.memory.ttl_secs == 0 {
            return Err("cache.memory.ttl_secs must be > 0".into());
        }
        if self.redis.command_timeout_ms == 0 {
            return Err("cache.redis.command_timeout_ms must be > 0".into());
        }
        if self.redis.pool_size == 0 {
            return Err("cache.redis.pool_size must be > 0".into());
        }
        // Redis URL is not checked here; an unusable URL degrades to
        // memory-only at connect time.
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Redis configuration for the shared tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Enable Redis (gracefully degrades without it)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Global prefix prepended to every remote key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Additional connection attempts at startup after the first one fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base reconnect delay in milliseconds, doubled after each failed attempt
    #[serde(default = "default_retry_delay_on_failover_ms")]
    pub retry_delay_on_failover_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Wait for a reconnect (up to the command timeout) instead of failing
    /// fast while disconnected
    #[serde(default)]
    pub enable_offline_queue: bool,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    true
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "jobboard:".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_on_failover_ms() -> u64 {
    100
}

fn default_max_retry_delay_ms() -> u64 {
    5000
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_command_timeout_ms() -> u64 {
    1000
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            max_retries: default_max_retries(),
            retry_delay_on_failover_ms: default_retry_delay_on_failover_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            enable_offline_queue: false,
            pool_size: default_redis_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl RedisSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_on_failover_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms.max(self.retry_delay_on_failover_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Local (L1) tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Upper bound for local entry lifetime in seconds
    #[serde(default = "default_memory_ttl_secs")]
    pub ttl_secs: u64,

    /// Expired-entry sweep interval in seconds (0 disables the sweeper)
    #[serde(default = "default_check_period_secs")]
    pub check_period_secs: u64,

    /// Maximum number of local entries (0 = unbounded)
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
}

fn default_memory_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_check_period_secs() -> u64 {
    60
}

fn default_max_keys() -> usize {
    10000
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_memory_ttl_secs(),
            check_period_secs: default_check_period_secs(),
            max_keys: default_max_keys(),
        }
    }
}

impl MemorySettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn check_period(&self) -> Option<Duration> {
        (self.check_period_secs > 0).then(|| Duration::from_secs(self.check_period_secs))
    }
}

/// CDN header profile configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnSettings {
    /// Emit edge-specific headers (CDN-Cache-Control, Surrogate-Control)
    #[serde(default = "default_cdn_enabled")]
    pub enabled: bool,

    /// Default lifetime for the `api` and `stale` profiles
    #[serde(default = "default_cdn_max_age_secs")]
    pub max_age_secs: u64,

    #[serde(default = "default_stale_while_revalidate_secs")]
    pub stale_while_revalidate_secs: u64,

    #[serde(default = "default_stale_if_error_secs")]
    pub stale_if_error_secs: u64,
}

fn default_cdn_enabled() -> bool {
    true
}

fn default_cdn_max_age_secs() -> u64 {
    300
}

fn default_stale_while_revalidate_secs() -> u64 {
    60
}

fn default_stale_if_error_secs() -> u64 {
    86400 // 1 day
}

impl Default for CdnSettings {
    fn default() -> Self {
        Self {
            enabled: default_cdn_enabled(),
            max_age_secs: default_cdn_max_age_secs(),
            stale_while_revalidate_secs: default_stale_while_revalidate_secs(),
            stale_if_error_secs: default_stale_if_error_secs(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("jobboard.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., JOBBOARD__CACHE__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("JOBBOARD")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
