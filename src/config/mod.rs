//! Configuration for the echo server
//!
//! A [`Config`] is built once at startup from three layers: built-in
//! defaults, an optional YAML file, and explicit command-line flags.
//! Later layers win. The result is validated and then only read.

pub mod cli;
pub mod file;

pub use cli::CliArgs;
pub use file::FileConfig;

use clap::Parser;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LISTEN: &str = ":8080";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_MESSAGE: &str = "hello, world";
pub const DEFAULT_LOG_LEVEL: &str = "dummyhttp=info";

/// Response mode selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Echo every request back as JSON
    #[default]
    Dummy,
    /// Canned responses per path (not implemented yet)
    Static,
    /// Responses generated from an OpenAPI document (not implemented yet)
    OpenApi,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Dummy => "dummy",
            Mode::Static => "static",
            Mode::OpenApi => "openapi",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mode string that names no known mode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown mode: {0}")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dummy" => Ok(Mode::Dummy),
            "static" => Ok(Mode::Static),
            "openapi" => Ok(Mode::OpenApi),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on; `:PORT` means every IPv4 interface
    pub listen: String,
    /// Applied to reading a request head, reading the body, writing the
    /// response and idling between keep-alive requests
    pub timeout: Duration,
}

impl ServerConfig {
    /// Address string suitable for binding a listener
    pub fn bind_address(&self) -> String {
        if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Per-mode handler options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Message attached to every echo response
    pub message: String,
    /// Path to response body, used by `static` mode
    pub static_responses: BTreeMap<String, String>,
    /// OpenAPI document, used by `openapi` mode
    pub openapi_spec_path: String,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            message: DEFAULT_MESSAGE.to_string(),
            static_responses: BTreeMap::new(),
            openapi_spec_path: String::new(),
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mode: Mode,
    pub server: ServerConfig,
    pub handler: HandlerOptions,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            server: ServerConfig::default(),
            handler: HandlerOptions::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process arguments and optional YAML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Builds a validated configuration from already-parsed arguments.
    ///
    /// Flags are layered over the raw file values before anything is
    /// parsed, so a flag can replace a file value that would not parse.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let mut layered = match cli.config {
            Some(ref path) => FileConfig::from_path(path)?,
            None => FileConfig::default(),
        };
        layered.apply_flags(&cli);

        let mut config = Config::default();
        config.merge_file(layered)?;
        if let Some(log_level) = cli.log_level {
            config.log_level = log_level;
        }
        config.validate()?;

        Ok(config)
    }

    /// Resolves every value present in `file` on top of the current values
    pub fn merge_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        if let Some(mode) = file.mode {
            self.mode = mode.parse()?;
        }
        if let Some(listen) = file.server.listen {
            self.server.listen = listen;
        }
        if let Some(timeout) = file.server.timeout {
            self.server.timeout = timeout_from_millis(timeout.as_millis()?)?;
        }
        if let Some(message) = file.handler.message {
            self.handler.message = message;
        }
        if let Some(responses) = file.handler.static_responses {
            self.handler.static_responses = responses;
        }
        if let Some(spec) = file.handler.openapi_spec {
            self.handler.openapi_spec_path = spec;
        }
        Ok(())
    }

    /// Checks the mode-specific requirements and the server settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            Mode::Dummy => {}
            Mode::Static if self.handler.static_responses.is_empty() => {
                return Err(ConfigError::MissingStaticResponses);
            }
            Mode::OpenApi if self.handler.openapi_spec_path.is_empty() => {
                return Err(ConfigError::MissingOpenApiSpec);
            }
            Mode::Static | Mode::OpenApi => {}
        }

        if self.server.listen.is_empty() {
            return Err(ConfigError::EmptyListenAddress);
        }
        if self.server.timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout);
        }

        Ok(())
    }
}

fn timeout_from_millis(ms: i64) -> Result<Duration, ConfigError> {
    if ms <= 0 {
        return Err(ConfigError::NonPositiveTimeout);
    }
    Ok(Duration::from_millis(ms as u64))
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid timeout '{0}': expected milliseconds or a duration such as 500ms, 5s, 1m")]
    InvalidTimeout(String),

    #[error("timeout must be positive")]
    NonPositiveTimeout,

    #[error(transparent)]
    Mode(#[from] UnknownMode),

    #[error("static mode requires static_responses configuration")]
    MissingStaticResponses,

    #[error("openapi mode requires openapi_spec configuration")]
    MissingOpenApiSpec,

    #[error("listen address is required")]
    EmptyListenAddress,
}
