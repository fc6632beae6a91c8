//! Configuration management for the Bindle daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/bindle/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use transfer::{ServingRoot, UploadPolicy};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_size must be greater than 0, got {0}")]
    InvalidMaxSize(u64),

    #[error("max_request_bytes ({request}) must be at least max_size ({file})")]
    RequestLimitTooSmall { request: u64, file: u64 },

    #[error("bind must be a socket address like 127.0.0.1:8080, got {0}")]
    InvalidBindAddress(String),

    #[error("allowed_extensions entry is not a bare extension: {0}")]
    InvalidExtension(String),

    #[error("destination_dir must not be empty")]
    EmptyDestination,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Bindle daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// Upload handling.
    pub uploads: UploadConfig,

    /// Download handling.
    pub downloads: DownloadConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server listens on.
    pub bind: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily-rotated log files. Empty disables file logging.
    pub log_dir: PathBuf,

    /// Maximum size of a whole request body in bytes (default: 50MB).
    pub max_request_bytes: u64,
}

/// Upload handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory uploaded files are stored in.
    pub destination_dir: PathBuf,

    /// Maximum size of a single file in bytes (default: 5MB).
    pub max_size: u64,

    /// Accepted extensions. Empty means all extensions allowed.
    pub allowed_extensions: Vec<String>,

    /// Replace client filenames with random tokens.
    pub randomize_filename: bool,

    /// Prefix for stored names. Routes supply their own when empty.
    pub filename_prefix: String,
}

/// Download handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Directory files are served from.
    pub root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            log_level: "info".to_string(),
            log_dir: PathBuf::new(),
            max_request_bytes: 50 * 1024 * 1024, // 50MB
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            destination_dir: PathBuf::from("./uploads"),
            max_size: 5 * 1024 * 1024, // 5MB
            allowed_extensions: ["jpg", "jpeg", "png", "gif", "pdf"]
                .into_iter()
                .map(String::from)
                .collect(),
            randomize_filename: true,
            filename_prefix: String::new(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./uploads"),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bindle")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - BINDLE_BIND: Override the listen address
    /// - BINDLE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - BINDLE_UPLOAD_DIR: Override the upload directory and download root
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("BINDLE_BIND") {
            if !bind.is_empty() {
                tracing::info!("Overriding bind from environment: {}", bind);
                self.server.bind = bind;
            }
        }

        if let Ok(level) = std::env::var("BINDLE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.server.log_level = level;
            }
        }

        if let Ok(dir) = std::env::var("BINDLE_UPLOAD_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding upload directory from environment: {}", dir);
                self.uploads.destination_dir = PathBuf::from(&dir);
                self.downloads.root = PathBuf::from(dir);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uploads.max_size == 0 {
            return Err(ConfigError::InvalidMaxSize(self.uploads.max_size));
        }

        // A single file must fit in a request
        if self.server.max_request_bytes < self.uploads.max_size {
            return Err(ConfigError::RequestLimitTooSmall {
                request: self.server.max_request_bytes,
                file: self.uploads.max_size,
            });
        }

        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(self.server.bind.clone()));
        }

        if self.uploads.destination_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDestination);
        }

        for ext in &self.uploads.allowed_extensions {
            let bare = ext.trim().trim_start_matches('.');
            if bare.contains(['/', '\\', '.']) {
                return Err(ConfigError::InvalidExtension(ext.clone()));
            }
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        Ok(())
    }

    /// Parsed listen address. Only meaningful after [`Config::validate`].
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind))
    }

    /// Build the upload policy for a route.
    ///
    /// `route_prefix` is used when the configuration sets no prefix of its own.
    pub fn upload_policy(&self, route_prefix: &str) -> UploadPolicy {
        let prefix = if self.uploads.filename_prefix.is_empty() {
            route_prefix
        } else {
            self.uploads.filename_prefix.as_str()
        };

        UploadPolicy::new(&self.uploads.destination_dir)
            .with_max_size(self.uploads.max_size)
            .with_allowed_extensions(&self.uploads.allowed_extensions)
            .with_randomized_names(self.uploads.randomize_filename)
            .with_prefix(prefix)
    }

    /// Directory downloads are served from.
    pub fn serving_root(&self) -> ServingRoot {
        ServingRoot::new(&self.downloads.root)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// The default path is `~/.config/bindle/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
