//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Record-view behavior
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Client reporter settings
    #[serde(default)]
    pub reporter: ReporterConfig,

    /// Sitemap generation settings
    #[serde(default)]
    pub sitemap: SitemapConfig,

    /// Local storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.tracking.window_hours == 0 {
            return Err(AppError::validation("tracking.window_hours must be > 0"));
        }
        if self.tracking.window_hours > MAX_WINDOW_HOURS {
            return Err(AppError::validation(format!(
                "tracking.window_hours must be <= {}",
                MAX_WINDOW_HOURS
            )));
        }
        if self.tracking.storage_timeout_ms == 0 {
            return Err(AppError::validation(
                "tracking.storage_timeout_ms must be > 0",
            ));
        }
        if self.reporter.timeout_secs == 0 {
            return Err(AppError::validation("reporter.timeout_secs must be > 0"));
        }
        Url::parse(&self.reporter.endpoint).map_err(|e| {
            AppError::validation(format!("reporter.endpoint is not a URL: {}", e))
        })?;
        let base = Url::parse(&self.sitemap.base_url).map_err(|e| {
            AppError::validation(format!("sitemap.base_url is not a URL: {}", e))
        })?;
        if base.cannot_be_a_base() {
            return Err(AppError::validation("sitemap.base_url cannot be a base URL"));
        }
        Ok(())
    }
}

/// Longest accepted dedup window: one year.
pub const MAX_WINDOW_HOURS: u32 = 24 * 366;

/// What to do with a request whose IP, user agent and visitor token are all unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnonymousPolicy {
    /// Hash as usual: all such visitors share one identity
    #[default]
    Dedup,
    /// Skip deduplication and always count
    AlwaysCount,
    /// Refuse the request as invalid input
    Reject,
}

impl std::str::FromStr for AnonymousPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dedup" => Ok(Self::Dedup),
            "always_count" => Ok(Self::AlwaysCount),
            "reject" => Ok(Self::Reject),
            other => Err(AppError::config(format!("unknown anonymous policy '{}'", other))),
        }
    }
}

/// Record-view behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Dedup window length in hours
    #[serde(default = "defaults::window_hours")]
    pub window_hours: u32,

    /// Timeout for each storage call in milliseconds
    #[serde(default = "defaults::storage_timeout_ms")]
    pub storage_timeout_ms: u64,

    /// Handling of fully anonymous requests
    #[serde(default)]
    pub anonymous_policy: AnonymousPolicy,
}

impl TrackingConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.window_hours))
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            window_hours: defaults::window_hours(),
            storage_timeout_ms: defaults::storage_timeout_ms(),
            anonymous_policy: AnonymousPolicy::default(),
        }
    }
}

/// Client reporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Record-view endpoint URL
    #[serde(default = "defaults::endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::reporter_timeout")]
    pub timeout_secs: u64,

    /// Optional API key sent as `apikey` and bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    /// File holding the durable visitor id
    #[serde(default = "defaults::visitor_id_path")]
    pub visitor_id_path: PathBuf,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::endpoint(),
            timeout_secs: defaults::reporter_timeout(),
            api_key: None,
            visitor_id_path: defaults::visitor_id_path(),
        }
    }
}

/// Sitemap generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapConfig {
    /// Public site origin
    #[serde(default = "defaults::base_url")]
    pub base_url: String,
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
        }
    }
}

/// Local storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the JSON store
    #[serde(default = "defaults::root_dir")]
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: defaults::root_dir(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Tracking defaults
    pub fn window_hours() -> u32 {
        12
    }
    pub fn storage_timeout_ms() -> u64 {
        3000
    }

    // Reporter defaults
    pub fn endpoint() -> String {
        "http://localhost:54321/functions/v1/track-view".into()
    }
    pub fn reporter_timeout() -> u64 {
        5
    }
    pub fn visitor_id_path() -> PathBuf {
        PathBuf::from("storage/visitor_id")
    }

    // Sitemap defaults
    pub fn base_url() -> String {
        "https://maamin-beemet.lovable.app".into()
    }

    // Storage defaults
    pub fn root_dir() -> PathBuf {
        PathBuf::from("storage")
    }

    pub fn level() -> String {
        "info".into()
    }
}
