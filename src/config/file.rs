use super::ConfigError;
use super::cli::CliArgs;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// YAML configuration file structure
///
/// All fields are optional; anything left out keeps its built-in default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub mode: Option<String>,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub handler: HandlerSection,
}

/// `server:` section of the configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub listen: Option<String>,
    pub timeout: Option<TimeoutValue>,
}

/// `handler:` section of the configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerSection {
    pub message: Option<String>,
    pub static_responses: Option<BTreeMap<String, String>>,
    pub openapi_spec: Option<String>,
}

/// Timeout as written in the file: plain milliseconds or a duration string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TimeoutValue {
    Millis(i64),
    Text(String),
}

impl TimeoutValue {
    /// Resolves the value to a signed millisecond count.
    pub fn as_millis(&self) -> Result<i64, ConfigError> {
        match self {
            TimeoutValue::Millis(ms) => Ok(*ms),
            TimeoutValue::Text(text) => parse_duration_millis(text),
        }
    }
}

impl FileConfig {
    /// Reads and parses a YAML configuration file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replaces file values with the flags given explicitly on the command line
    pub fn apply_flags(&mut self, cli: &CliArgs) {
        if let Some(mode) = &cli.mode {
            self.mode = Some(mode.clone());
        }
        if let Some(listen) = &cli.listen {
            self.server.listen = Some(listen.clone());
        }
        if let Some(ms) = cli.timeout {
            self.server.timeout = Some(TimeoutValue::Millis(ms));
        }
        if let Some(message) = &cli.message {
            self.handler.message = Some(message.clone());
        }
    }

    /// Parses YAML text; an empty document yields the default (empty) config
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }
}

/// Parses `"500ms"`, `"5s"`, `"2m"`, `"1h"` or a bare number of milliseconds.
fn parse_duration_millis(text: &str) -> Result<i64, ConfigError> {
    let invalid = || ConfigError::InvalidTimeout(text.to_string());
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '-' || c == '+'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: i64 = number.parse().map_err(|_| invalid())?;
    let factor = match unit.trim() {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => return Err(invalid()),
    };
    value.checked_mul(factor).ok_or_else(invalid)
}
