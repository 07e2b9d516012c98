//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration
//! files across all NCMILL applications.
//!
//! # Usage
//!
//! ```rust,no_run
//! use ncmill_common::config::{ConfigLoader, NcConfig};
//! use std::path::Path;
//!
//! let config = NcConfig::load(Path::new("ncmill.toml")).unwrap();
//! assert!(config.lookahead_depth >= 1);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::consts::{
    DEFAULT_CYCLE_TIME_US, DEFAULT_LOOKAHEAD_DEPTH, DEFAULT_STALL_ALARM_MS,
    DEFAULT_STATUS_CADENCE_MS,
};

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Common configuration fields shared across NCMILL applications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the shared configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: "ncmill".to_string(),
        }
    }
}

// ─── Stack Configuration ────────────────────────────────────────────

/// Runtime configuration for the interpreter/motion stack.
///
/// Look-ahead depth and stall-alarm threshold are deliberate, explicit
/// tunables; the defaults in [`crate::consts`] are starting points, not
/// machine-specific values.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "ncmill-sim-01"
///
/// lookahead_depth = 32
/// stall_alarm_ms = 2000
/// cycle_time_us = 1000
/// status_cadence_ms = 50
/// interp_error_fatal = true
/// semicolon_comments = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NcConfig {
    /// Shared fields.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Maximum unacknowledged commands in the queue (≥ 1).
    #[serde(default = "default_lookahead_depth")]
    pub lookahead_depth: usize,

    /// `Busy` duration after which a stall alarm is raised [ms].
    #[serde(default = "default_stall_alarm_ms")]
    pub stall_alarm_ms: u64,

    /// Trajectory executor cycle time [µs].
    #[serde(default = "default_cycle_time_us")]
    pub cycle_time_us: u64,

    /// Status replication cadence [ms].
    #[serde(default = "default_status_cadence_ms")]
    pub status_cadence_ms: u64,

    /// Whether an `InterpError` terminates the run (true) or parks the
    /// interpreter for operator correction and resume (false).
    #[serde(default = "default_true")]
    pub interp_error_fatal: bool,

    /// Whether `;` starts a trailing comment in addition to `( )`.
    #[serde(default = "default_true")]
    pub semicolon_comments: bool,
}

fn default_lookahead_depth() -> usize {
    DEFAULT_LOOKAHEAD_DEPTH
}
fn default_stall_alarm_ms() -> u64 {
    DEFAULT_STALL_ALARM_MS
}
fn default_cycle_time_us() -> u64 {
    DEFAULT_CYCLE_TIME_US
}
fn default_status_cadence_ms() -> u64 {
    DEFAULT_STATUS_CADENCE_MS
}
fn default_true() -> bool {
    true
}

impl Default for NcConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig::default(),
            lookahead_depth: DEFAULT_LOOKAHEAD_DEPTH,
            stall_alarm_ms: DEFAULT_STALL_ALARM_MS,
            cycle_time_us: DEFAULT_CYCLE_TIME_US,
            status_cadence_ms: DEFAULT_STATUS_CADENCE_MS,
            interp_error_fatal: true,
            semicolon_comments: true,
        }
    }
}

impl NcConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `lookahead_depth` is zero
    /// - `cycle_time_us` is zero
    /// - `status_cadence_ms` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.lookahead_depth == 0 {
            return Err(ConfigError::ValidationError(
                "lookahead_depth must be >= 1".to_string(),
            ));
        }
        if self.cycle_time_us == 0 {
            return Err(ConfigError::ValidationError(
                "cycle_time_us must be > 0".to_string(),
            ));
        }
        if self.status_cadence_ms == 0 {
            return Err(ConfigError::ValidationError(
                "status_cadence_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Loader ─────────────────────────────────────────────────────────

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load and deserialize a TOML configuration file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound);
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl ConfigLoader for NcConfig {}
