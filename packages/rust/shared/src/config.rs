//! Application configuration for CampusBot.
//!
//! User config lives at `~/.campusbot/campusbot.toml`.
//! Environment variables override config file values, which override defaults.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CampusBotError, Result};
use crate::types::EntityKind;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "campusbot.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".campusbot";

/// Marker selecting an in-memory store.
pub const MEMORY_STORAGE: &str = ":memory:";

/// Lower bound for the store's busy timeout; warmup writes hold the writer
/// for long batches.
pub const MIN_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Config structs (matching campusbot.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default)]
    pub warmup: WarmupConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// SQLite `synchronous` pragma level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncMode {
    #[default]
    Normal,
    Full,
}

impl SyncMode {
    pub fn as_pragma(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path, or `:memory:`.
    #[serde(default = "default_storage_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout", with = "humantime_serde")]
    pub busy_timeout: Duration,

    /// Upper bound on concurrent reader connections.
    #[serde(default = "default_max_readers")]
    pub max_readers: usize,

    #[serde(default)]
    pub synchronous: SyncMode,

    /// How long a swapped-out store stays open for in-flight reads.
    #[serde(default = "default_swap_grace", with = "humantime_serde")]
    pub swap_grace: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            busy_timeout: default_busy_timeout(),
            max_readers: default_max_readers(),
            synchronous: SyncMode::default(),
            swap_grace: default_swap_grace(),
        }
    }
}

fn default_storage_path() -> String {
    "data/campusbot.db".into()
}
fn default_busy_timeout() -> Duration {
    MIN_BUSY_TIMEOUT
}
fn default_max_readers() -> usize {
    10
}
fn default_swap_grace() -> Duration {
    Duration::from_secs(5)
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hard TTL: rows older than this are invisible and deletable.
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Soft TTL: rows older than this are refreshed proactively.
    #[serde(default = "default_soft_ttl", with = "humantime_serde")]
    pub soft_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
            soft_ttl: default_soft_ttl(),
        }
    }
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}
fn default_soft_ttl() -> Duration {
    Duration::from_secs(5 * 24 * 3600)
}

/// `[scraper]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Budget for a whole fetch, retries included.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    #[serde(default = "default_per_attempt_timeout", with = "humantime_serde")]
    pub per_attempt_timeout: Duration,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay", with = "humantime_serde")]
    pub retry_base_delay: Duration,

    #[serde(default = "default_retry_max_delay", with = "humantime_serde")]
    pub retry_max_delay: Duration,

    /// Global cap on concurrent upstream requests.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Logical host alias → one or more origins, tried in order.
    #[serde(default = "default_base_urls")]
    pub base_urls: BTreeMap<String, Vec<String>>,

    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Minimum character-set Jaccard similarity for matching a course
    /// page's program name to the canonical list.
    #[serde(default = "default_program_match_threshold")]
    pub program_match_threshold: f64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            per_attempt_timeout: default_per_attempt_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay: default_retry_base_delay(),
            retry_max_delay: default_retry_max_delay(),
            max_in_flight: default_max_in_flight(),
            base_urls: default_base_urls(),
            user_agents: default_user_agents(),
            program_match_threshold: default_program_match_threshold(),
        }
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_per_attempt_timeout() -> Duration {
    Duration::from_secs(15)
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay() -> Duration {
    Duration::from_millis(500)
}
fn default_retry_max_delay() -> Duration {
    Duration::from_secs(8)
}
fn default_max_in_flight() -> usize {
    5
}
fn default_program_match_threshold() -> f64 {
    0.7
}
fn default_base_urls() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        ("lms".to_string(), vec!["https://lms.example.edu".to_string()]),
        (
            "sea".to_string(),
            vec![
                "https://sea.example.edu".to_string(),
                "https://sea-backup.example.edu".to_string(),
            ],
        ),
        ("directory".to_string(), vec!["https://directory.example.edu".to_string()]),
    ])
}
fn default_user_agents() -> Vec<String> {
    vec![
        concat!("CampusBot/", env!("CARGO_PKG_VERSION")).to_string(),
        "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15".to_string(),
    ]
}

/// A `[[warmup.seeds]]` entry: one catalog query run at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupSeed {
    pub kind: EntityKind,
    /// Catalog selector understood by the upstream (cohort year, directory
    /// section, ...).
    pub seed: String,
}

/// `[warmup]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    /// Run the background refresh/cleanup loops.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Run the startup bulk fetch of `seeds`.
    #[serde(default = "default_true")]
    pub startup: bool,

    #[serde(default)]
    pub seeds: Vec<WarmupSeed>,

    /// Max soft-expired keys refreshed per kind per tick.
    #[serde(default = "default_refresh_batch")]
    pub refresh_batch: usize,

    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup: true,
            seeds: Vec::new(),
            refresh_batch: default_refresh_batch(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_refresh_batch() -> usize {
    200
}
fn default_cleanup_interval() -> Duration {
    Duration::from_secs(3600)
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// `[metrics]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// `host:port` for the stats endpoint served by `campusbot serve`.
    /// Unset disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
}

impl MetricsConfig {
    /// The parsed listen address, if one is configured.
    pub fn listen_addr(&self) -> Result<Option<SocketAddr>> {
        self.listen
            .as_deref()
            .map(|addr| {
                addr.trim().parse().map_err(|e| {
                    CampusBotError::config(format!("metrics.listen {addr:?}: {e}"))
                })
            })
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Environment overrides and validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Apply the recognized environment variables on top of file values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("STORAGE_PATH") {
            self.storage.path = path;
        }
        if let Some(v) = lookup("CACHE_TTL") {
            self.cache.cache_ttl = parse_duration_var("CACHE_TTL", &v)?;
        }
        if let Some(v) = lookup("SOFT_TTL") {
            self.cache.soft_ttl = parse_duration_var("SOFT_TTL", &v)?;
        }
        if let Some(v) = lookup("SCRAPE_TIMEOUT") {
            self.scraper.request_timeout = parse_duration_var("SCRAPE_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("SCRAPE_MAX_RETRIES") {
            self.scraper.max_retries = v.trim().parse().map_err(|e| {
                CampusBotError::config(format!("SCRAPE_MAX_RETRIES={v:?}: {e}"))
            })?;
        }
        if let Some(v) = lookup("SCRAPE_MAX_CONCURRENCY") {
            self.scraper.max_in_flight = v.trim().parse().map_err(|e| {
                CampusBotError::config(format!("SCRAPE_MAX_CONCURRENCY={v:?}: {e}"))
            })?;
        }
        if let Some(v) = lookup("BASE_URLS") {
            self.scraper.base_urls = parse_base_urls(&v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("METRICS_ADDR") {
            self.metrics.listen = Some(v);
        }
        Ok(())
    }

    /// Check cross-field constraints. Clamps a too-short busy timeout.
    pub fn validate(&mut self) -> Result<()> {
        if self.cache.soft_ttl > self.cache.cache_ttl {
            return Err(CampusBotError::config(format!(
                "soft_ttl ({}) must not exceed cache_ttl ({})",
                humantime::format_duration(self.cache.soft_ttl),
                humantime::format_duration(self.cache.cache_ttl),
            )));
        }
        if self.scraper.max_in_flight == 0 {
            return Err(CampusBotError::config("scraper.max_in_flight must be at least 1"));
        }
        if self.storage.max_readers == 0 {
            return Err(CampusBotError::config("storage.max_readers must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.scraper.program_match_threshold) {
            return Err(CampusBotError::config(
                "scraper.program_match_threshold must be within 0.0..=1.0",
            ));
        }
        if self.scraper.user_agents.is_empty() {
            return Err(CampusBotError::config("scraper.user_agents must not be empty"));
        }
        for (alias, origins) in &self.scraper.base_urls {
            if origins.is_empty() {
                return Err(CampusBotError::config(format!(
                    "base url alias {alias:?} has no origins"
                )));
            }
        }
        if self.warmup.cleanup_interval.is_zero() {
            return Err(CampusBotError::config("warmup.cleanup_interval must be non-zero"));
        }
        if self.warmup.refresh_batch == 0 {
            return Err(CampusBotError::config("warmup.refresh_batch must be at least 1"));
        }
        self.metrics.listen_addr()?;
        if self.storage.busy_timeout < MIN_BUSY_TIMEOUT {
            tracing::warn!(
                configured_ms = self.storage.busy_timeout.as_millis() as u64,
                "busy_timeout below minimum, clamping to 30s"
            );
            self.storage.busy_timeout = MIN_BUSY_TIMEOUT;
        }
        Ok(())
    }

    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.path)
    }
}

fn parse_duration_var(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| CampusBotError::config(format!("{name}={value:?}: {e}")))
}

/// Parse `alias=url1|url2;alias2=url3`.
pub fn parse_base_urls(value: &str) -> Result<BTreeMap<String, Vec<String>>> {
    let mut map = BTreeMap::new();
    for entry in value.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (alias, urls) = entry.split_once('=').ok_or_else(|| {
            CampusBotError::config(format!("BASE_URLS entry {entry:?} is missing '='"))
        })?;
        let origins: Vec<String> = urls
            .split('|')
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if origins.is_empty() {
            return Err(CampusBotError::config(format!(
                "BASE_URLS alias {alias:?} has no origins"
            )));
        }
        map.insert(alias.trim().to_string(), origins);
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.campusbot/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CampusBotError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.campusbot/campusbot.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does
/// not exist. Environment overrides are applied and the result validated.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Load the application config from a specific file path (no env overrides).
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CampusBotError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        CampusBotError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CampusBotError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CampusBotError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CampusBotError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("cache_ttl"));
        assert!(toml_str.contains("max_in_flight"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.cache.cache_ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(parsed.storage.max_readers, 10);
        assert_eq!(parsed.scraper.base_urls["sea"].len(), 2);
    }

    #[test]
    fn config_with_durations_and_seeds() {
        let toml_str = r#"
[cache]
cache_ttl = "3d"
soft_ttl = "36h"

[storage]
path = ":memory:"
synchronous = "FULL"

[[warmup.seeds]]
kind = "student"
seed = "112"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.cache.cache_ttl, Duration::from_secs(3 * 24 * 3600));
        assert_eq!(config.cache.soft_ttl, Duration::from_secs(36 * 3600));
        assert_eq!(config.storage.synchronous, SyncMode::Full);
        assert_eq!(config.warmup.seeds.len(), 1);
        assert_eq!(config.warmup.seeds[0].kind, EntityKind::Student);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = AppConfig::default();
        let env = BTreeMap::from([
            ("STORAGE_PATH", ":memory:"),
            ("CACHE_TTL", "2d"),
            ("SOFT_TTL", "1d"),
            ("SCRAPE_MAX_RETRIES", "1"),
            ("SCRAPE_MAX_CONCURRENCY", "8"),
            ("BASE_URLS", "sea=https://a.example.edu/|https://b.example.edu;lms=https://c.example.edu"),
        ]);
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .expect("apply env");

        assert_eq!(config.storage.path, MEMORY_STORAGE);
        assert_eq!(config.cache.cache_ttl, Duration::from_secs(2 * 24 * 3600));
        assert_eq!(config.scraper.max_retries, 1);
        assert_eq!(config.scraper.max_in_flight, 8);
        assert_eq!(
            config.scraper.base_urls["sea"],
            vec!["https://a.example.edu", "https://b.example.edu"]
        );
        assert_eq!(config.scraper.base_urls.len(), 2);
    }

    #[test]
    fn bad_env_value_is_a_config_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_from(|k| (k == "CACHE_TTL").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CACHE_TTL"));
    }

    #[test]
    fn validation_rejects_soft_ttl_above_hard() {
        let mut config = AppConfig::default();
        config.cache.soft_ttl = Duration::from_secs(8 * 24 * 3600);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_clamps_busy_timeout() {
        let mut config = AppConfig::default();
        config.storage.busy_timeout = Duration::from_secs(1);
        config.validate().expect("validate");
        assert_eq!(config.storage.busy_timeout, MIN_BUSY_TIMEOUT);
    }

    #[test]
    fn validation_rejects_zero_cleanup_interval() {
        let toml_str = r#"
[warmup]
cleanup_interval = "0s"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).expect("parse");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cleanup_interval"), "{err}");

        config.warmup.cleanup_interval = Duration::from_secs(60);
        config.warmup.refresh_batch = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn metrics_listen_address_from_env() {
        let mut config = AppConfig::default();
        assert_eq!(config.metrics.listen_addr().unwrap(), None);

        config
            .apply_env_from(|k| (k == "METRICS_ADDR").then(|| "127.0.0.1:9464".to_string()))
            .expect("apply env");
        config.validate().expect("validate");
        assert_eq!(
            config.metrics.listen_addr().unwrap(),
            Some("127.0.0.1:9464".parse().unwrap())
        );

        config.metrics.listen = Some("localhost".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("metrics.listen"), "{err}");
    }

    #[test]
    fn base_urls_parser_rejects_garbage() {
        assert!(parse_base_urls("no-equals-sign").is_err());
        assert!(parse_base_urls("sea=").is_err());
        assert!(parse_base_urls("").unwrap().is_empty());
    }
}
