//! Configuration for the `TaskShare` hub server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskshare-hub/config.toml`)
//! 4. Compiled defaults
//!
//! Tokens given with `--token` are merged over the file's `[auth.tokens]`
//! table.

use std::collections::BTreeMap;
use std::path::PathBuf;

use taskshare_proto::ids::UserId;

use crate::auth::TokenTable;

/// Errors that can occur when loading hub configuration.
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

    /// A `--token` argument was not of the form `TOKEN=USER`.
    #[error("invalid token mapping {0:?}, expected TOKEN=USER")]
    InvalidToken(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HubConfigFile {
    server: ServerFileConfig,
    auth: AuthFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
    log_level: Option<String>,
}

/// `[auth]` section; `tokens` maps bearer token to user id.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AuthFileConfig {
    tokens: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the hub server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "TaskShare hub server")]
pub struct HubCliArgs {
    /// Address to bind the hub to.
    #[arg(short, long, env = "TASKSHARE_HUB_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/taskshare-hub/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum accepted WebSocket frame size in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Accept a bearer token for a user, as `TOKEN=USER`. Repeatable.
    #[arg(long = "token", value_name = "TOKEN=USER")]
    pub tokens: Vec<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, env = "TASKSHARE_HUB_LOG")]
    pub log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9400`).
    pub bind_addr: String,
    /// Frames larger than this are rejected.
    pub max_frame_size: usize,
    /// Log level filter string.
    pub log_level: String,
    /// Accepted bearer tokens.
    pub tokens: BTreeMap<String, UserId>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9400".to_string(),
            max_frame_size: 256 * 1024,
            log_level: "info".to_string(),
            tokens: BTreeMap::new(),
        }
    }
}

impl HubConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or a `--token` argument is malformed.
    pub fn load(cli: &HubCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Builds the authenticator for the configured tokens.
    #[must_use]
    pub fn token_table(&self) -> TokenTable {
        self.tokens
            .iter()
            .map(|(token, user)| (token.clone(), user.clone()))
            .collect()
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &HubCliArgs, file: &HubConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut tokens: BTreeMap<String, UserId> = file
            .auth
            .tokens
            .iter()
            .map(|(token, user)| (token.clone(), UserId::new(user.as_str())))
            .collect();
        for mapping in &cli.tokens {
            let (token, user) = parse_token_mapping(mapping)?;
            tokens.insert(token, user);
        }

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_frame_size: cli
                .max_frame_size
                .or(file.server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.server.log_level.clone())
                .unwrap_or(defaults.log_level),
            tokens,
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_token_mapping(mapping: &str) -> Result<(String, UserId), ConfigError> {
    match mapping.split_once('=') {
        Some((token, user)) if !token.is_empty() && !user.is_empty() => {
            Ok((token.to_string(), UserId::new(user)))
        }
        _ => Err(ConfigError::InvalidToken(mapping.to_string())),
    }
}

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<HubConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(HubConfigFile::default());
    };
    let path = config_dir.join("taskshare-hub").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HubConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
