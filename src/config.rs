//! Configuration file parser for ~/.config/feedsync/config.toml.
//!
//! The config file is optional and a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::sync::ReconcileOptions;
use crate::util::DEFAULT_WORDS_PER_MINUTE;

const KNOWN_KEYS: [&str; 3] = ["database_path", "delete_missing_items", "words_per_minute"];

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level application configuration.
///
/// Every key is optional; missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database location. Defaults to `feedsync.db` in the config directory.
    pub database_path: Option<PathBuf>,

    /// Delete local items a full sync no longer lists.
    pub delete_missing_items: bool,

    /// Reading speed used for item read-time estimates.
    pub words_per_minute: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            delete_missing_items: true,
            words_per_minute: DEFAULT_WORDS_PER_MINUTE,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - `words_per_minute = 0` → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
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

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            delete_missing_items = config.delete_missing_items,
            words_per_minute = config.words_per_minute,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: toml::Table = content.parse()?;
        for key in raw.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            }
        }

        let config: Config = toml::from_str(content)?;
        if config.words_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "words_per_minute must be greater than 0".to_string(),
            ));
        }
        Ok(config)
    }

    /// Database path, resolving relative paths against `config_dir`
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        match &self.database_path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => config_dir.join(p),
            None => config_dir.join("feedsync.db"),
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            delete_missing_items: self.delete_missing_items,
            words_per_minute: self.words_per_minute,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
