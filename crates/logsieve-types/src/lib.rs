//! Shared types for logsieve
//!
//! This crate contains the value types passed between the engine and its
//! hosts: severity levels, parsed records, and the sieve configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Rejected configuration values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The retained history must hold at least one record
    #[error("max_retained must be greater than zero, got {0}")]
    NonPositiveCapacity(usize),

    /// A level name or code that does not map to any severity
    #[error("unknown log level: {0:?}")]
    UnknownLevel(String),
}

// ============================================================================
// Log Types
// ============================================================================

/// Log severity level, ordered from least to most severe
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Verbose,
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    Assert,
    #[serde(alias = "wtf")]
    Fatal,
}

impl LogLevel {
    /// Every level, lowest first
    pub const ALL: [LogLevel; 7] = [
        Self::Verbose,
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Assert,
        Self::Fatal,
    ];

    /// The level that lets everything through
    pub fn lowest() -> Self {
        Self::Verbose
    }

    /// Map a single-character level code to a level.
    ///
    /// Codes are case-sensitive. Anything unrecognized is treated as debug.
    pub fn from_code(code: char) -> Self {
        match code {
            'V' => Self::Verbose,
            'D' => Self::Debug,
            'I' => Self::Info,
            'W' => Self::Warning,
            'E' => Self::Error,
            'A' => Self::Assert,
            'F' => Self::Fatal,
            _ => Self::Debug,
        }
    }

    /// The single-character code used in raw log lines
    pub fn code(&self) -> char {
        match self {
            Self::Verbose => 'V',
            Self::Debug => 'D',
            Self::Info => 'I',
            Self::Warning => 'W',
            Self::Error => 'E',
            Self::Assert => 'A',
            Self::Fatal => 'F',
        }
    }

    /// Lowercase display name
    pub fn label(&self) -> &'static str {
        match self {
            Self::Verbose => "verbose",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Assert => "assert",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    /// Accepts level codes, full names and common abbreviations, in any case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "v" | "verbose" | "all" => Ok(Self::Verbose),
            "d" | "debug" | "dbg" => Ok(Self::Debug),
            "i" | "info" | "inf" => Ok(Self::Info),
            "w" | "warning" | "warn" | "wrn" => Ok(Self::Warning),
            "e" | "error" | "err" => Ok(Self::Error),
            "a" | "assert" => Ok(Self::Assert),
            "f" | "fatal" | "wtf" => Ok(Self::Fatal),
            _ => Err(ConfigError::UnknownLevel(s.to_string())),
        }
    }
}

/// A single parsed log record
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct LogRecord {
    /// Severity taken from the level code
    level: LogLevel,

    /// Timestamp prefix and body, space-joined
    message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Plain-text form used when exporting records, e.g. `E/ 02-07 17:45:33.014 boom`
    pub fn to_plain(&self) -> String {
        format!("{}/ {}", self.level.code(), self.message)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/ {}", self.level.code(), self.message)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Default number of records kept for redisplay
pub const DEFAULT_MAX_RETAINED: NonZeroUsize = NonZeroUsize::new(2500).unwrap();

/// Default minimum time between two deliveries
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 150;

fn default_max_retained() -> NonZeroUsize {
    DEFAULT_MAX_RETAINED
}

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

/// Filtering, sampling and retention settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SieveConfig {
    /// Maximum number of records kept in the retained history
    #[serde(default = "default_max_retained")]
    pub max_retained: NonZeroUsize,

    /// Case-insensitive substring or regex (empty = no text filter)
    #[serde(default)]
    pub text_filter: String,

    /// Minimum level a record needs to pass
    #[serde(default)]
    pub min_level: LogLevel,

    /// Minimum milliseconds between two subscriber deliveries
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Rendering hint for hosts; the engine never reads it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_size_px: Option<f32>,
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            max_retained: DEFAULT_MAX_RETAINED,
            text_filter: String::new(),
            min_level: LogLevel::lowest(),
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            text_size_px: None,
        }
    }
}

impl SieveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retained history size, rejecting zero
    pub fn with_max_retained(mut self, max_retained: usize) -> Result<Self, ConfigError> {
        self.max_retained =
            NonZeroUsize::new(max_retained).ok_or(ConfigError::NonPositiveCapacity(max_retained))?;
        Ok(self)
    }

    pub fn with_text_filter(mut self, filter: impl Into<String>) -> Self {
        self.text_filter = filter.into();
        self
    }

    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_flush_interval_ms(mut self, interval_ms: u64) -> Self {
        self.flush_interval_ms = interval_ms;
        self
    }

    pub fn with_text_size_px(mut self, text_size_px: f32) -> Self {
        self.text_size_px = Some(text_size_px);
        self
    }

    /// Whether any text or level filtering is configured
    pub fn has_filter(&self) -> bool {
        !self.text_filter.is_empty() || self.min_level != LogLevel::lowest()
    }
}
