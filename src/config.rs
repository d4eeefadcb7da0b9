//! Configuration file parser for ~/.config/silkfeed/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cache::{PipelineOptions, DEFAULT_CONCURRENT_DOWNLOADS};
use crate::feed::{FetchError, FetchProfile};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but is out of range
    #[error("Invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. Defaults to `cache.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// Whole-request budget for fetching a feed document, in seconds.
    pub feed_timeout_secs: f64,

    /// Whole-request budget for each image, connectivity waits included.
    pub image_timeout_secs: f64,

    pub max_feed_bytes: usize,

    pub max_image_bytes: usize,

    /// Images downloaded at the same time during caching.
    pub max_concurrent_downloads: usize,
}

impl Default for Config {
    fn default() -> Self {
        let fast = FetchProfile::fast();
        let patient = FetchProfile::patient();
        Self {
            database_path: None,
            feed_timeout_secs: fast.timeout.as_secs_f64(),
            image_timeout_secs: patient.timeout.as_secs_f64(),
            max_feed_bytes: fast.max_bytes,
            max_image_bytes: patient.max_bytes,
            max_concurrent_downloads: DEFAULT_CONCURRENT_DOWNLOADS,
        }
    }
}

const KNOWN_KEYS: [&str; 6] = [
    "database_path",
    "feed_timeout_secs",
    "image_timeout_secs",
    "max_feed_bytes",
    "max_image_bytes",
    "max_concurrent_downloads",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Zero or non-finite timeouts, zero limits → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a corrupted file can't exhaust memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            feed_timeout_secs = config.feed_timeout_secs,
            max_concurrent_downloads = config.max_concurrent_downloads,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (key, secs) in [
            ("feed_timeout_secs", self.feed_timeout_secs),
            ("image_timeout_secs", self.image_timeout_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("{secs} is not a positive number of seconds"),
                });
            }
        }
        for (key, value) in [
            ("max_feed_bytes", self.max_feed_bytes),
            ("max_image_bytes", self.max_image_bytes),
            ("max_concurrent_downloads", self.max_concurrent_downloads),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Profile for feed documents: short budget, no connectivity wait.
    pub fn fast_profile(&self) -> FetchProfile {
        let default = FetchProfile::fast();
        FetchProfile {
            timeout: Duration::try_from_secs_f64(self.feed_timeout_secs).unwrap_or(default.timeout),
            max_bytes: self.max_feed_bytes,
            ..default
        }
    }

    /// Profile for images: long budget, waits for connectivity.
    pub fn patient_profile(&self) -> FetchProfile {
        let default = FetchProfile::patient();
        FetchProfile {
            timeout: Duration::try_from_secs_f64(self.image_timeout_secs).unwrap_or(default.timeout),
            max_bytes: self.max_image_bytes,
            ..default
        }
    }

    pub fn pipeline_options(&self) -> Result<PipelineOptions, FetchError> {
        PipelineOptions::with_profiles(
            self.fast_profile(),
            self.patient_profile(),
            self.max_concurrent_downloads,
        )
    }

    /// `database_path` if set, otherwise `cache.db` inside `config_dir`.
    pub fn database_path_in(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("cache.db"))
    }
}

// ============================================================================
// Tests
// ============================================================================
