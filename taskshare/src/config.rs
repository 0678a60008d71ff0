//! Configuration for the `taskshare` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskshare/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::client::{self, ConnectOptions};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A setting needed to reach the hub is not configured.
    #[error("no {0} configured (set it on the command line, in the environment, or in the config file)")]
    Missing(&'static str),

    /// The configured hub URL is unusable.
    #[error(transparent)]
    InvalidUrl(#[from] client::ClientError),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    hub: HubFileConfig,
    logging: LoggingFileConfig,
}

/// `[hub]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HubFileConfig {
    hub_url: Option<String>,
    token: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[logging]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LoggingFileConfig {
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Hub WebSocket URL.
    pub hub_url: Option<String>,
    /// Bearer token presented to the hub.
    pub token: Option<String>,
    /// Timeout for connecting and authenticating.
    pub connect_timeout: Duration,
    /// Timeout for each request round trip.
    pub request_timeout: Duration,
    /// Log level filter string.
    pub log_level: String,
    /// Log file path (default: `$TMPDIR/taskshare.log`).
    pub log_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: None,
            token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            hub_url: cli.hub_url.clone().or_else(|| file.hub.hub_url.clone()),
            token: cli.token.clone().or_else(|| file.hub.token.clone()),
            connect_timeout: file
                .hub
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .hub
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.logging.log_level.clone())
                .unwrap_or(defaults.log_level),
            log_file: cli
                .log_file
                .clone()
                .or_else(|| file.logging.log_file.clone()),
        }
    }

    /// The hub URL and token, validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if either is unset, or
    /// [`ConfigError::InvalidUrl`] if the URL is not `ws://` or `wss://`.
    pub fn hub_endpoint(&self) -> Result<(&str, &str), ConfigError> {
        let url = self.hub_url.as_deref().ok_or(ConfigError::Missing("hub URL"))?;
        let token = self.token.as_deref().ok_or(ConfigError::Missing("token"))?;
        client::validate_url(url)?;
        Ok((url, token))
    }

    /// Timeouts for [`crate::client::HubClient::connect`].
    #[must_use]
    pub const fn to_connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
        }
    }
}

/// Connection and logging arguments shared by every subcommand.
#[derive(clap::Args, Debug, Default)]
pub struct CliArgs {
    /// WebSocket URL of the hub.
    #[arg(long, global = true, env = "TASKSHARE_HUB_URL")]
    pub hub_url: Option<String>,

    /// Bearer token identifying you to the hub.
    #[arg(long, global = true, env = "TASKSHARE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Path to config file (default: `~/.config/taskshare/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "TASKSHARE_LOG")]
    pub log_level: Option<String>,

    /// Path to log file (default: `$TMPDIR/taskshare.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("taskshare").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
