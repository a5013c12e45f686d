//! Layered configuration for the reload middleware and the dev server.
//!
//! Sources, lowest to highest precedence:
//! - Default values
//! - `livereload.toml` in the working directory (or an explicit file)
//! - Environment variables
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `LIVERELOAD_` and use double
//! underscores to separate nested levels:
//! - `LIVERELOAD_RELOAD__DEBOUNCE_MS=250` sets `reload.debounce_ms`
//! - `LIVERELOAD_SERVER__BIND=0.0.0.0:8080` sets `server.bind`
//! - `LIVERELOAD_RELOAD__DISABLE_CACHING=false` sets `reload.disable_caching`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default settings file name, looked up in the working directory.
pub const SETTINGS_FILE: &str = "livereload.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LIVERELOAD_";

/// Errors from loading or saving settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write configuration to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
pub struct Settings {
    /// Reload middleware settings
    #[serde(default)]
    pub reload: ReloadConfig,

    /// Dev server settings (used by `livereload serve`)
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ReloadConfig {
    /// Directories to watch recursively
    #[serde(default)]
    pub directories: Vec<PathBuf>,

    /// Path the notification WebSocket is served on
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Add `Cache-Control: no-cache` to intercepted responses
    #[serde(default = "default_true")]
    pub disable_caching: bool,

    /// Quiescence window before a burst of changes fires a reload
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the dev server binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Directory served by the dev server
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_endpoint() -> String {
    "/reload_ws".to_string()
}
fn default_true() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    100
}
fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}
fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            endpoint: default_endpoint(),
            disable_caching: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            root: default_root(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from `livereload.toml` in the working directory
    /// (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(SETTINGS_FILE)
    }

    /// Load configuration from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore becomes a dot; single underscores stay inside field names
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Save the configuration as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let toml_string = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, toml_string).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
