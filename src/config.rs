// Configuration File Support
//
// This module provides configuration file parsing for the scene-gate
// admission controller. Supports TOML format with environment variable
// overrides. Configuration files are loaded from the XDG config
// directory: ~/.config/scenegate/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Deployment environment (development, staging, production)
    pub environment: String,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    pub rate_limits: RateLimitsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Rate limiting configuration
///
/// The four quota maxima are hot-reloadable between requests; the
/// `enabled` switch is read once at startup and never toggled at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Master switch. Disabling admits every request and must only be
    /// used outside production.
    pub enabled: bool,

    /// Directory holding the shared global bucket files
    pub data_dir: PathBuf,

    /// Per-session quota maxima
    pub user: ScopeLimits,

    /// Deployment-wide quota maxima
    pub global: ScopeLimits,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            data_dir: PathBuf::from("data"),
            user: ScopeLimits {
                per_minute: 10,
                per_day: 40,
            },
            global: ScopeLimits {
                per_minute: 500,
                per_day: 50_000,
            },
        }
    }
}

/// Maximum admissions per window for one scope
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeLimits {
    /// Maximum requests per minute
    pub per_minute: u64,

    /// Maximum requests per day
    pub per_day: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            logging: LoggingConfig::default(),
            rate_limits: RateLimitsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. If the config file does not exist, returns the
    /// default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. If the config file does not exist, returns the
    /// default configuration.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            let config = Self::default().apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        // Apply environment variable overrides
        let config = config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/scenegate/config.toml` on Linux/Mac
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "scenegate", "SceneGate") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("scenegate")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - SCENE_GATE_ENVIRONMENT
    /// - SCENE_GATE_LOG_LEVEL
    /// - SCENE_GATE_LOG_FORMAT
    /// - SCENE_GATE_RATE_LIMIT_ENABLED
    /// - SCENE_GATE_DATA_DIR
    /// - SCENE_GATE_USER_PER_MINUTE / SCENE_GATE_USER_PER_DAY
    /// - SCENE_GATE_GLOBAL_PER_MINUTE / SCENE_GATE_GLOBAL_PER_DAY
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(environment) = std::env::var("SCENE_GATE_ENVIRONMENT") {
            self.environment = environment;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("SCENE_GATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SCENE_GATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Rate limit overrides; quota maxima must stay positive
        if let Ok(enabled) = std::env::var("SCENE_GATE_RATE_LIMIT_ENABLED") {
            self.rate_limits.enabled = enabled.parse().unwrap_or(self.rate_limits.enabled);
        }
        if let Ok(dir) = std::env::var("SCENE_GATE_DATA_DIR") {
            self.rate_limits.data_dir = PathBuf::from(dir);
        }
        if let Ok(max) = std::env::var("SCENE_GATE_USER_PER_MINUTE") {
            if let Ok(max) = max.parse::<u64>() {
                if max > 0 {
                    self.rate_limits.user.per_minute = max;
                }
            }
        }
        if let Ok(max) = std::env::var("SCENE_GATE_USER_PER_DAY") {
            if let Ok(max) = max.parse::<u64>() {
                if max > 0 {
                    self.rate_limits.user.per_day = max;
                }
            }
        }
        if let Ok(max) = std::env::var("SCENE_GATE_GLOBAL_PER_MINUTE") {
            if let Ok(max) = max.parse::<u64>() {
                if max > 0 {
                    self.rate_limits.global.per_minute = max;
                }
            }
        }
        if let Ok(max) = std::env::var("SCENE_GATE_GLOBAL_PER_DAY") {
            if let Ok(max) = max.parse::<u64>() {
                if max > 0 {
                    self.rate_limits.global.per_day = max;
                }
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid. Configuration
    /// problems are fatal at startup only, never per-request.
    pub fn validate(&self) -> Result<()> {
        // Validate deployment environment
        match self.environment.to_lowercase().as_str() {
            "development" | "staging" | "production" => {}
            _ => anyhow::bail!(
                "Invalid environment: {}. Must be one of: development, staging, production",
                self.environment
            ),
        }

        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        // Validate quota maxima
        if self.rate_limits.user.per_minute == 0 {
            anyhow::bail!("user.per_minute must be > 0");
        }
        if self.rate_limits.user.per_day == 0 {
            anyhow::bail!("user.per_day must be > 0");
        }
        if self.rate_limits.global.per_minute == 0 {
            anyhow::bail!("global.per_minute must be > 0");
        }
        if self.rate_limits.global.per_day == 0 {
            anyhow::bail!("global.per_day must be > 0");
        }

        // The kill switch must never survive into production
        if !self.rate_limits.enabled && self.is_production() {
            anyhow::bail!("Rate limiting cannot be disabled when environment is production");
        }

        Ok(())
    }

    /// Whether this deployment is production
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
