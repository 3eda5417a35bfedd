// src/config.rs

//! Configuration loading for deployed environments.
//!
//! Local runs read `config.toml` through [`Config::load`]. In
//! Lambda the file lives in S3 and environment variables override it.

use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::models::{AnonymousPolicy, Config};
#[cfg(feature = "s3")]
use crate::storage::s3::S3Storage;

/// Default S3 prefix holding `config.toml`.
pub const DEFAULT_CONFIG_PREFIX: &str = "lesson-views/config";

/// Config loader for Lambda environment.
#[cfg(feature = "s3")]
pub struct LambdaConfigLoader {
    storage: S3Storage,
    prefix: String,
}

#[cfg(feature = "s3")]
impl LambdaConfigLoader {
    pub fn new(storage: S3Storage, config_prefix: &str) -> Self {
        Self {
            storage,
            prefix: config_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Prefix from `CONFIG_S3_PREFIX`, or the default.
    pub fn from_env(storage: S3Storage) -> Self {
        let prefix = std::env::var("CONFIG_S3_PREFIX")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PREFIX.to_string());
        Self::new(storage, &prefix)
    }

    /// Read `config.toml` from S3.
    pub async fn load_config(&self) -> Result<Config> {
        let key = format!("{}/config.toml", self.prefix);
        log::info!("Loading config file from S3: {}", key);
        let bytes = self
            .storage
            .read_bytes_optional(&key)
            .await?
            .ok_or_else(|| AppError::Config(format!("Config file not found in S3: {}", key)))?;

        let s = String::from_utf8(bytes).map_err(|e| {
            AppError::Config(format!("Config file {} is not valid UTF-8: {}", key, e))
        })?;
        Ok(toml::from_str(&s)?)
    }

    /// Config from S3 (defaults if unavailable), then environment overrides.
    pub async fn load_or_default(&self) -> Result<Config> {
        let mut config = self.load_config().await.unwrap_or_else(|e| {
            log::warn!("Failed to load config from S3: {}", e);
            log::warn!("Using default configuration.");
            Config::default()
        });
        apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }
}

/// Override config fields from environment-style variables.
///
/// `lookup` returns the variable's value, if set. Unparsable numbers and
/// policies are configuration errors.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(hours) = lookup("VIEW_WINDOW_HOURS") {
        config.tracking.window_hours = parse_var("VIEW_WINDOW_HOURS", &hours)?;
    }

    if let Some(ms) = lookup("STORAGE_TIMEOUT_MS") {
        config.tracking.storage_timeout_ms = parse_var("STORAGE_TIMEOUT_MS", &ms)?;
    }

    if let Some(policy) = lookup("ANONYMOUS_POLICY") {
        config.tracking.anonymous_policy = AnonymousPolicy::from_str(&policy)?;
    }

    if let Some(url) = lookup("SITEMAP_BASE_URL") {
        config.sitemap.base_url = url;
    }

    Ok(())
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::config(format!("{} has an invalid value: {:?}", name, value)))
}
