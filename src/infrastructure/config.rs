//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate:
//! 1. Built-in defaults (`defaults` module)
//! 2. Optional config file (JSON or TOML, by extension)
//! 3. Environment overrides, `CATALOG_SYNC_<SECTION>__<KEY>`
//!    (e.g. `CATALOG_SYNC_SYNC__ACCESS_TOKEN`)

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::domain::product::Language;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

/// Remote store and dispatch settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Store domain, e.g. `my-shop.myshopify.com`
    pub store_domain: String,
    pub api_version: String,
    /// Normally supplied through the environment, never written back out
    #[serde(skip_serializing)]
    pub access_token: String,
    /// Language of the title/description sent to the store
    pub language: Language,
    pub rate_limit_per_second: u32,
    pub max_concurrency: usize,
    pub create_chunk_size: usize,
    pub update_chunk_size: usize,
    pub snapshot_page_size: usize,
    pub request_timeout_seconds: u64,
    /// Draft remote products that disappeared from the feed
    pub archive_missing: bool,
    pub dry_run: bool,
    /// Vendor set on created products
    pub vendor: Option<String>,
    /// Created products get `{image_base_url}/{sku}.jpg` attached
    pub image_base_url: Option<String>,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("store_domain", &self.store_domain)
            .field("api_version", &self.api_version)
            .field("access_token", &if self.access_token.is_empty() { "<unset>" } else { "<redacted>" })
            .field("language", &self.language)
            .field("rate_limit_per_second", &self.rate_limit_per_second)
            .field("max_concurrency", &self.max_concurrency)
            .field("create_chunk_size", &self.create_chunk_size)
            .field("update_chunk_size", &self.update_chunk_size)
            .field("snapshot_page_size", &self.snapshot_page_size)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("archive_missing", &self.archive_missing)
            .field("dry_run", &self.dry_run)
            .field("vendor", &self.vendor)
            .field("image_base_url", &self.image_base_url)
            .finish()
    }
}

/// Backoff settings for transient remote failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_range_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub rules_path: PathBuf,
    /// Local path or http(s) URL of the supplier feed
    pub feed_source: Option<String>,
    pub report_dir: PathBuf,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Directory for log files; defaults to `logs/` next to the executable
    pub log_dir: Option<PathBuf>,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Module-specific log level filters (e.g., "reqwest": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_domain: String::new(),
            api_version: defaults::API_VERSION.to_string(),
            access_token: String::new(),
            language: Language::En,
            rate_limit_per_second: defaults::RATE_LIMIT_PER_SECOND,
            max_concurrency: defaults::MAX_CONCURRENCY,
            create_chunk_size: defaults::CREATE_CHUNK_SIZE,
            update_chunk_size: defaults::UPDATE_CHUNK_SIZE,
            snapshot_page_size: defaults::SNAPSHOT_PAGE_SIZE,
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            archive_missing: false,
            dry_run: false,
            vendor: defaults::VENDOR.map(str::to_string),
            image_base_url: defaults::IMAGE_BASE_URL.map(str::to_string),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            backoff_multiplier: defaults::RETRY_BACKOFF_MULTIPLIER,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            jitter_range_ms: defaults::RETRY_JITTER_RANGE_MS,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from(defaults::RULES_PATH),
            feed_source: None,
            report_dir: PathBuf::from(defaults::REPORT_DIR),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            log_dir: None,
            max_files: defaults::LOG_MAX_FILES,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("reqwest".to_string(), "warn".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("h2".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

impl AppConfig {
    /// Semantic checks the type system cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Validation {
                message: message.to_string(),
            })
        };

        if self.sync.rate_limit_per_second == 0 {
            return invalid("sync.rate_limit_per_second must be greater than 0");
        }
        if self.sync.max_concurrency == 0 {
            return invalid("sync.max_concurrency must be greater than 0");
        }
        if self.sync.create_chunk_size == 0 || self.sync.update_chunk_size == 0 {
            return invalid("sync chunk sizes must be greater than 0");
        }
        if self.sync.snapshot_page_size == 0 || self.sync.snapshot_page_size > 250 {
            return invalid("sync.snapshot_page_size must be between 1 and 250");
        }
        if let Some(url) = &self.sync.image_base_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return invalid("sync.image_base_url must be an http(s) URL");
            }
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be greater than 0");
        }
        if self.retry.backoff_multiplier < 1.0 {
            return invalid("retry.backoff_multiplier must be at least 1.0");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms cannot be greater than retry.max_delay_ms");
        }
        Ok(())
    }

    /// Checked separately so `classify` runs without store credentials
    pub fn validate_remote(&self) -> Result<(), ConfigError> {
        if self.sync.store_domain.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "sync.store_domain is not set".to_string(),
            });
        }
        if self.sync.access_token.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("sync.access_token is not set (use {}_SYNC__ACCESS_TOKEN)", ENV_PREFIX),
            });
        }
        Ok(())
    }
}

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CATALOG_SYNC";

/// Configuration manager for locating and loading settings
pub struct ConfigManager {
    pub config_path: PathBuf,
    explicit: bool,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("catalog-sync");

        Ok(config_dir)
    }

    /// Manager for the default per-user config file (optional on disk)
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join("config.json");
        Ok(Self {
            config_path,
            explicit: false,
        })
    }

    /// Manager for an explicitly requested file, which must exist
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
            explicit: true,
        }
    }

    /// Load defaults, then the config file, then environment overrides
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let config = Self::build(Some(&self.config_path), self.explicit)?;
        info!("⚙️ Loaded configuration (file: {:?})", self.config_path);
        Ok(config)
    }

    fn build(path: Option<&Path>, required: bool) -> Result<AppConfig, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(required));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Default sync configuration values
pub mod defaults {
    /// Shopify Admin API version
    pub const API_VERSION: &str = "2024-01";

    /// Outbound calls per second, shared across all workers
    pub const RATE_LIMIT_PER_SECOND: u32 = 2;

    /// Concurrent dispatch workers
    pub const MAX_CONCURRENCY: usize = 4;

    /// Items per create chunk
    pub const CREATE_CHUNK_SIZE: usize = 20;

    /// Items per update (and archive) chunk
    pub const UPDATE_CHUNK_SIZE: usize = 10;

    /// Products per snapshot page (remote maximum is 250)
    pub const SNAPSHOT_PAGE_SIZE: usize = 250;

    /// Default request timeout in seconds
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    /// Feed download timeout in seconds
    pub const FEED_TIMEOUT_SECONDS: u64 = 60;

    /// No vendor unless configured
    pub const VENDOR: Option<&str> = None;

    /// No product images unless configured
    pub const IMAGE_BASE_URL: Option<&str> = None;

    // Retry defaults
    pub const RETRY_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 1000;
    pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const RETRY_MAX_DELAY_MS: u64 = 30_000;
    pub const RETRY_JITTER_RANGE_MS: u64 = 500;

    // Paths
    pub const RULES_PATH: &str = "category_rules.json";
    pub const REPORT_DIR: &str = "reports";

    // Log configuration defaults
    /// Default log level
    pub const LOG_LEVEL: &str = "info";

    /// Default JSON format setting
    pub const LOG_JSON_FORMAT: bool = false;

    /// Default console output setting
    pub const LOG_CONSOLE_OUTPUT: bool = true;

    /// Default file output setting
    pub const LOG_FILE_OUTPUT: bool = true;

    /// Default maximum log files to keep
    pub const LOG_MAX_FILES: u32 = 5;
}
