use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use logsieve_types::SieveConfig;

/// Contents of a `logsieve.toml` file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceSection,

    #[serde(default)]
    pub sieve: SieveConfig,
}

/// Command whose stdout is tailed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSection {
    #[serde(default = "default_command")]
    pub command: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,
}

fn default_command() -> String {
    "logcat".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-v".to_string(), "time".to_string()]
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
        }
    }
}

impl AppConfig {
    /// Load a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
