//! Configuration for the `setchat` client.
//!
//! Priority, highest first:
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/setchat/config.toml`)
//! 4. Compiled defaults
//!
//! A missing default config file is not an error. An explicit `--config`
//! path that doesn't exist is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use setchat_proto::identity::Identity;

use crate::channel::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_CONNECT_TIMEOUT};

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
}

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    client: ClientFileConfig,
    log: LogFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[client]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ClientFileConfig {
    id: Option<String>,
    state_file: Option<PathBuf>,
}

/// `[log]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LogFileConfig {
    level: Option<String>,
    file: Option<PathBuf>,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the relay, without the `id` query.
    pub server_url: String,
    /// Identity to connect as. When `None`, the identity saved in the state
    /// file is used.
    pub identity: Option<Identity>,
    /// Where conversations, contacts and the identity are persisted.
    /// `None` disables persistence.
    pub state_file: Option<PathBuf>,
    /// Timeout for opening the WebSocket.
    pub connect_timeout: Duration,
    /// Capacity of the inbound event queue.
    pub channel_capacity: usize,
    /// Log level filter.
    pub log_level: String,
    /// Log file path.
    pub log_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:5000/ws".to_string(),
            identity: None,
            state_file: default_state_file(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            log_level: "info".to_string(),
            log_file: std::env::temp_dir().join("setchat.log"),
        }
    }
}

impl ClientConfig {
    /// Loads configuration by merging CLI args, env vars and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolves a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Empty identities count as unset.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            server_url: cli
                .server
                .clone()
                .or_else(|| file.server.url.clone())
                .unwrap_or(defaults.server_url),
            identity: cli
                .id
                .clone()
                .or_else(|| file.client.id.clone())
                .filter(|id| !id.is_empty())
                .map(Identity::new),
            state_file: cli
                .state_file
                .clone()
                .or_else(|| file.client.state_file.clone())
                .or(defaults.state_file),
            connect_timeout: file
                .server
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            channel_capacity: file
                .server
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.log.level.clone())
                .unwrap_or(defaults.log_level),
            log_file: cli
                .log_file
                .clone()
                .or_else(|| file.log.file.clone())
                .unwrap_or(defaults.log_file),
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Messenger whose conversations are keyed by their participants")]
pub struct CliArgs {
    /// WebSocket URL of the relay server.
    #[arg(long, env = "SETCHAT_SERVER")]
    pub server: Option<String>,

    /// Identity to connect as.
    #[arg(long, env = "SETCHAT_ID")]
    pub id: Option<String>,

    /// Path to config file (default: `~/.config/setchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the local state file.
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, env = "SETCHAT_LOG")]
    pub log_level: Option<String>,

    /// Path to log file (default: `$TMPDIR/setchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn default_state_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("setchat").join("state.json"))
}

/// Loads and parses a TOML config file.
///
/// An explicit path must exist. Without one, the default path is tried and
/// a missing file yields an empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("setchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
