use regex::Regex;
use tracing::debug;

use logsieve_types::{LogLevel, LogRecord, SieveConfig};

/// Compiled filter for log records
#[derive(Clone)]
pub struct CompiledFilter {
    /// Lower-cased pattern used for substring matching
    pattern: String,

    /// Regex compiled from the lower-cased pattern (None if empty or invalid)
    regex: Option<Regex>,

    /// Minimum level to include
    min_level: LogLevel,
}

impl CompiledFilter {
    /// Create a filter from a text pattern and a minimum level.
    ///
    /// A pattern that is not a valid regex is still usable: the filter falls
    /// back to case-insensitive substring matching only.
    pub fn new(pattern: &str, min_level: LogLevel) -> Self {
        let pattern = pattern.to_lowercase();
        let regex = if pattern.is_empty() {
            None
        } else {
            match Regex::new(&pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    debug!(%pattern, error = %err, "invalid regex filter, using substring match");
                    None
                }
            }
        };

        Self {
            pattern,
            regex,
            min_level,
        }
    }

    /// Filter that lets every record through
    pub fn pass_all() -> Self {
        Self::new("", LogLevel::lowest())
    }

    pub fn from_config(config: &SieveConfig) -> Self {
        if !config.has_filter() {
            return Self::pass_all();
        }
        Self::new(&config.text_filter, config.min_level)
    }

    /// Check if a record passes both the level gate and the text gate
    pub fn matches(&self, record: &LogRecord) -> bool {
        record.level() >= self.min_level && self.matches_text(record.message())
    }

    fn matches_text(&self, message: &str) -> bool {
        if self.pattern.is_empty() {
            return true;
        }

        let message = message.to_lowercase();
        if message.contains(&self.pattern) {
            return true;
        }

        match &self.regex {
            Some(re) => re.is_match(&message),
            None => false,
        }
    }

    /// Get the lower-cased pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Whether the pattern compiled as a regex
    pub fn has_regex(&self) -> bool {
        self.regex.is_some()
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty() && self.min_level == LogLevel::lowest()
    }
}

impl Default for CompiledFilter {
    fn default() -> Self {
        Self::pass_all()
    }
}

impl std::fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("pattern", &self.pattern)
            .field("regex", &self.has_regex())
            .field("min_level", &self.min_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: LogLevel, body: &str) -> LogRecord {
        LogRecord::new(level, format!("02-07 17:45:33.014 {}", body))
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = CompiledFilter::pass_all();
        assert!(filter.is_empty());
        for level in LogLevel::ALL {
            assert!(filter.matches(&record(level, "anything")));
        }
    }

    #[test]
    fn test_substring_is_case_insensitive() {
        let filter = CompiledFilter::new("FiLteR", LogLevel::Verbose);
        assert!(filter.matches(&record(LogLevel::Debug, "any fIltEr trace")));
        assert!(!filter.matches(&record(LogLevel::Verbose, "Any error trace")));
    }

    #[test]
    fn test_regex_alternation() {
        let filter = CompiledFilter::new("FiLteR|Other", LogLevel::Debug);
        assert!(filter.has_regex());
        assert!(filter.matches(&record(LogLevel::Debug, "any fIltEr trace")));
        assert!(filter.matches(&record(LogLevel::Info, "some OTHER trace")));
        assert!(!filter.matches(&record(LogLevel::Debug, "Any error trace")));
    }

    #[test]
    fn test_invalid_regex_degrades_to_substring() {
        let filter = CompiledFilter::new("[a-z", LogLevel::Debug);
        assert!(!filter.has_regex());
        assert!(filter.matches(&record(LogLevel::Debug, "Any [a-z trace")));
        assert!(!filter.matches(&record(LogLevel::Debug, "Any abc trace")));
    }

    #[test]
    fn test_level_gate() {
        let filter = CompiledFilter::new("", LogLevel::Error);
        assert!(!filter.matches(&record(LogLevel::Verbose, "Any error trace")));
        assert!(!filter.matches(&record(LogLevel::Warning, "warn")));
        assert!(filter.matches(&record(LogLevel::Error, "error")));
        assert!(filter.matches(&record(LogLevel::Fatal, "wtf")));
    }

    #[test]
    fn test_both_gates_must_pass() {
        let filter = CompiledFilter::new("boom", LogLevel::Warning);
        assert!(filter.matches(&record(LogLevel::Error, "boom")));
        assert!(!filter.matches(&record(LogLevel::Info, "boom")));
        assert!(!filter.matches(&record(LogLevel::Error, "fine")));
    }

    #[test]
    fn test_text_filter_sees_timestamp() {
        let filter = CompiledFilter::new("17:45", LogLevel::Verbose);
        assert!(filter.matches(&record(LogLevel::Info, "body")));
    }

    #[test]
    fn test_raising_min_level_never_widens() {
        let records: Vec<LogRecord> = LogLevel::ALL
            .iter()
            .flat_map(|&level| [record(level, "alpha"), record(level, "beta")])
            .collect();

        for pattern in ["", "alpha", "a|b"] {
            let mut previous: Option<Vec<&LogRecord>> = None;
            for min_level in LogLevel::ALL {
                let filter = CompiledFilter::new(pattern, min_level);
                let accepted: Vec<&LogRecord> =
                    records.iter().filter(|r| filter.matches(r)).collect();
                if let Some(previous) = &previous {
                    assert!(accepted.iter().all(|r| previous.contains(r)));
                    assert!(accepted.len() <= previous.len());
                }
                previous = Some(accepted);
            }
        }
    }

    #[test]
    fn test_from_config() {
        let config = SieveConfig::new()
            .with_text_filter("Net")
            .with_min_level(LogLevel::Info);
        let filter = CompiledFilter::from_config(&config);
        assert_eq!(filter.pattern(), "net");
        assert_eq!(filter.min_level(), LogLevel::Info);
    }

    #[test]
    fn test_from_unfiltered_config_passes_all() {
        let filter = CompiledFilter::from_config(&SieveConfig::new());
        assert!(filter.is_empty());
        assert!(!filter.has_regex());
        assert!(filter.matches(&LogRecord::new(LogLevel::Verbose, "anything")));
    }
}
