//! Error types for the logsieve engine.

use thiserror::Error;

use logsieve_types::ConfigError;

/// A raw line that does not have the `MM-DD HH:MM:SS.mmm L/message` shape.
///
/// Recoverable: the stream engine drops the line and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecordError {
    #[error("line too short for a log record ({len} bytes)")]
    TooShort { len: usize },

    #[error("missing level separator at byte {index}")]
    MissingSeparator { index: usize },

    #[error("timestamp prefix is not valid text")]
    BadTimestamp,
}

/// Failures raised by a log source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Sources are single-use; restarting needs a fresh instance
    #[error("log source was already started")]
    AlreadyStarted,

    #[error("failed to spawn log command {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned to callers of the engine facade
#[derive(Debug, Error)]
pub enum SieveError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SieveError>;
