//! Configuration loader and validator for the delivery-cost service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub pipeline: Pipeline,
    pub rates: Rates,
    pub cache: Cache,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Overrides the default `sqlite://{data_dir}/parcels.db` location.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Background job cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pipeline {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_cleanup_interval_seconds")]
    pub session_cleanup_interval_seconds: u64,
    #[serde(default = "default_session_max_idle_days")]
    pub session_max_idle_days: u32,
}

/// Upstream exchange-rate provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rates {
    pub base_url: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

/// Rate cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cache {
    pub backend: CacheBackend,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_cache_key")]
    pub key: String,
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_interval_seconds() -> u64 {
    300
}

fn default_cleanup_interval_seconds() -> u64 {
    24 * 3600
}

fn default_session_max_idle_days() -> u32 {
    30
}

fn default_endpoint() -> String {
    "daily_json.js".into()
}

fn default_currency() -> String {
    "USD".into()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_user_agent() -> String {
    "parcel-cost/0.1".into()
}

fn default_cache_key() -> String {
    "rates:daily:usd".into()
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            session_cleanup_interval_seconds: default_cleanup_interval_seconds(),
            session_max_idle_days: default_session_max_idle_days(),
        }
    }
}

impl Pipeline {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn session_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.session_cleanup_interval_seconds)
    }
}

impl Rates {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Cache {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Database URL resolution order: `DATABASE_URL`, `app.database_url`,
    /// then a SQLite file inside `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.app.database_url.clone())
            .unwrap_or_else(|| format!("sqlite://{}/parcels.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Upper bound for `cache.ttl_seconds` (one week).
pub const MAX_CACHE_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.pipeline.interval_seconds == 0 {
        return Err(ConfigError::Invalid("pipeline.interval_seconds must be > 0"));
    }
    if cfg.pipeline.session_cleanup_interval_seconds == 0 {
        return Err(ConfigError::Invalid(
            "pipeline.session_cleanup_interval_seconds must be > 0",
        ));
    }

    if reqwest::Url::parse(&cfg.rates.base_url).is_err() {
        return Err(ConfigError::Invalid("rates.base_url must be a valid URL"));
    }
    if cfg.rates.currency.trim().is_empty() {
        return Err(ConfigError::Invalid("rates.currency must be non-empty"));
    }
    if cfg.rates.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("rates.timeout_seconds must be > 0"));
    }
    // max_retries is u32; zero means a single attempt.

    if cfg.cache.backend == CacheBackend::Redis && cfg.cache.url.trim().is_empty() {
        return Err(ConfigError::Invalid("cache.url must be non-empty for redis backend"));
    }
    if cfg.cache.key.trim().is_empty() {
        return Err(ConfigError::Invalid("cache.key must be non-empty"));
    }
    if cfg.cache.ttl_seconds == 0 || cfg.cache.ttl_seconds > MAX_CACHE_TTL_SECONDS {
        return Err(ConfigError::Invalid(
            "cache.ttl_seconds must be between 1 and 604800",
        ));
    }

    Ok(())
}

/// Returns an example YAML document covering every section.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

pipeline:
  interval_seconds: 300
  session_cleanup_interval_seconds: 86400
  session_max_idle_days: 30

rates:
  base_url: "https://www.cbr-xml-daily.ru/"
  endpoint: "daily_json.js"
  currency: "USD"
  timeout_seconds: 10
  max_retries: 2
  user_agent: "parcel-cost/0.1"

cache:
  backend: redis
  url: "redis://127.0.0.1:6379/0"
  key: "rates:daily:usd"
  ttl_seconds: 3600
"#
}
