//! Relay settings.
//!
//! Each field is taken from the first source that sets it: command line
//! (or its `SETCHAT_RELAY_*` environment variable), then
//! `~/.config/setchat-relay/config.toml`, then the built-in default.

use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Why the relay settings could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid relay config: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// On-disk shape. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    server: ServerSection,
    log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogSection {
    level: Option<String>,
}

/// Command line of `setchat-relay`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "SetChat relay server")]
pub struct RelayCliArgs {
    /// Listen address, e.g. `127.0.0.1:8080`.
    #[arg(short, long, env = "SETCHAT_RELAY_ADDR")]
    pub bind: Option<String>,

    /// Settings file to read instead of the default location.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest binary frame accepted from a client, in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// `tracing` filter directive such as `debug` or `setchat_relay=trace`.
    #[arg(long, env = "SETCHAT_RELAY_LOG")]
    pub log_level: Option<String>,
}

/// Settings the relay runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub max_frame_size: usize,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_owned(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            log_level: DEFAULT_LOG_LEVEL.to_owned(),
        }
    }
}

impl RelayConfig {
    /// Reads the settings file and layers `cli` on top of it.
    ///
    /// A missing file at the default location is fine; a missing file
    /// named with `--config` is an error.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if the file exists but cannot be read or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_settings(path)?,
            None => match default_settings_path() {
                Some(path) => read_settings_if_present(&path)?,
                None => FileSettings::default(),
            },
        };
        Ok(Self::resolve(cli, file))
    }

    fn resolve(cli: &RelayCliArgs, file: FileSettings) -> Self {
        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned()),
            max_frame_size: cli
                .max_frame_size
                .or(file.server.max_frame_size)
                .unwrap_or(DEFAULT_MAX_FRAME_SIZE),
            log_level: cli
                .log_level
                .clone()
                .or(file.log.level)
                .filter(|level| !level.is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned()),
        }
    }
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("setchat-relay").join("config.toml"))
}

fn read_settings(path: &Path) -> Result<FileSettings, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}

fn read_settings_if_present(path: &Path) -> Result<FileSettings, ConfigError> {
    match read_settings(path) {
        Err(ConfigError::ReadFile { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(FileSettings::default())
        }
        other => other,
    }
}
