use logsieve_types::{LogLevel, LogRecord};

use crate::error::MalformedRecordError;

/// Shortest line that can hold a timestamp, a level code and the separator
pub const MIN_LINE_LEN: usize = 21;

/// Length of the `MM-DD HH:MM:SS.mmm` prefix
pub const TIMESTAMP_LEN: usize = 18;

/// Byte offset of the level code
pub const LEVEL_INDEX: usize = 19;

/// Byte offset of the `/` that follows the level code
pub const SEPARATOR_INDEX: usize = 20;

/// Parser for `logcat -v time` lines
pub struct LogParser;

impl LogParser {
    /// Parse a raw line such as `02-07 17:45:33.014 D/hello`.
    ///
    /// The resulting message is the timestamp and the text after the
    /// separator joined by a single space; the raw line itself is not kept.
    pub fn parse(raw: &str) -> Result<LogRecord, MalformedRecordError> {
        let bytes = raw.as_bytes();
        if bytes.len() < MIN_LINE_LEN {
            return Err(MalformedRecordError::TooShort { len: bytes.len() });
        }

        if bytes[SEPARATOR_INDEX] != b'/' {
            return Err(MalformedRecordError::MissingSeparator {
                index: SEPARATOR_INDEX,
            });
        }

        let timestamp = raw
            .get(..TIMESTAMP_LEN)
            .ok_or(MalformedRecordError::BadTimestamp)?;

        // A non-ASCII byte here can't be a level code, so it falls back like any unknown code
        let level = LogLevel::from_code(char::from(bytes[LEVEL_INDEX]));

        // SEPARATOR_INDEX holds an ASCII '/', so the next byte is a char boundary
        let body = &raw[SEPARATOR_INDEX + 1..];

        Ok(LogRecord::new(level, format!("{} {}", timestamp, body)))
    }
}
