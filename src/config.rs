//! Configuration and settings management
//!
//! Loads settings from optional config files and environment variables and
//! defines the fixed Telegram API constants.

use crate::relay::retry::RetryPolicy;
use crate::relay::RelayConfig;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

// Bot API retry settings for one-shot calls (discovery tool)
/// Initial backoff for Telegram API retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff for Telegram API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Maximum retries for Telegram API operations
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Interface to bind the HTTP server to
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted upload
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Chunk size used while staging uploads to disk
    #[serde(default = "default_upload_chunk_size")]
    pub upload_chunk_size_bytes: usize,
    /// Read buffer used when streaming the document to Telegram
    #[serde(default = "default_telegram_chunk_size")]
    pub telegram_chunk_size_bytes: usize,

    /// Staging directory for uploads
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Directory holding per-bot session files
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,

    /// Counted attempts per delivery
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds to wait after a transient failure
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Caption used when the request has none
    #[serde(default = "default_caption")]
    pub default_caption: String,

    /// Self-hosted Bot API server, `None` for the official one
    pub telegram_api_url: Option<String>,
    /// Timeout for one document upload request
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// Keep uploaded files when the request does not say otherwise
    #[serde(default)]
    pub keep_uploads: bool,
    /// Answer `202 Accepted` and deliver in the background
    #[serde(default)]
    pub background_delivery: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

const fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 * 1024
}

const fn default_upload_chunk_size() -> usize {
    2 * 1024 * 1024
}

const fn default_telegram_chunk_size() -> usize {
    512 * 1024
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay_secs() -> u64 {
    1
}

fn default_caption() -> String {
    crate::relay::dispatcher::DEFAULT_CAPTION.to_string()
}

const fn default_upload_timeout_secs() -> u64 {
    900 // 15 minutes
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use oxide_relay::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP__PORT=9000 ./target/oxide-relay` sets the `port` key
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain env vars (MAX_FILE_SIZE_BYTES=...), empty ones count as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Message("max_retries must be at least 1".into()));
        }
        if self.upload_chunk_size_bytes == 0 || self.telegram_chunk_size_bytes == 0 {
            return Err(ConfigError::Message("chunk sizes must be positive".into()));
        }
        Ok(())
    }

    /// Socket address for the HTTP listener
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if host/port do not form a valid address.
    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Message(format!("invalid bind address: {e}")))
    }

    /// Retry policy for deliveries
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            time_unit: Duration::from_secs(1),
            transient_delay_units: u32::try_from(self.retry_delay_secs).unwrap_or(u32::MAX),
        }
    }

    /// Pipeline tunables
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            upload_dir: self.upload_dir.clone(),
            stage_chunk_size: self.upload_chunk_size_bytes,
            max_file_size: self.max_file_size_bytes,
            default_caption: self.default_caption.clone(),
            transfer_chunk_size: self.telegram_chunk_size_bytes,
            retry: self.retry_policy(),
        }
    }

    /// Upload timeout as a duration
    #[must_use]
    pub const fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}
