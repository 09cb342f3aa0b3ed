//! Host configuration file.
//!
//! Loaded once at startup and passed down; nothing here is global.

use cachevisor_core::{
    ArgumentAssembler, Payload, StagingConfig, SupervisorConfig, SupervisorError,
    default_grace_period,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "CACHEVISOR_CONFIG";

/// File looked up next to the executable, then in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "cachevisor.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Supported logging output formats
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

/// Files making up the supervised binary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PayloadConfig {
    /// Directory holding the entry executable and its libraries.
    /// Relative paths are resolved against the configuration file.
    pub bundle_dir: PathBuf,
    pub entry: String,
    #[serde(default)]
    pub libraries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    pub service_name: String,
    pub payload: PayloadConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Ordered settings feeding the argument assembler
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Extra environment for the child
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub log: LogConfig,
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if config.payload.bundle_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.payload.bundle_dir = parent.join(&config.payload.bundle_dir);
            }
        }
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Settings as strings, in file order. `null` counts as empty; numbers
    /// and booleans use their JSON spelling.
    pub fn setting_pairs(&self) -> impl Iterator<Item = (&str, String)> {
        self.settings.iter().map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key.as_str(), value)
        })
    }

    /// Argument list used when none is supplied at start
    pub fn default_arguments(&self) -> Vec<String> {
        ArgumentAssembler::default().assemble(self.setting_pairs())
    }

    pub fn payload(&self) -> Payload {
        Payload::from_bundle(
            &self.payload.bundle_dir,
            &self.payload.entry,
            &self.payload.libraries,
        )
    }

    pub fn supervisor_config(&self) -> Result<SupervisorConfig, SupervisorError> {
        SupervisorConfig::builder()
            .name(self.service_name.as_str())
            .grace_period(Duration::from_millis(self.grace_period_ms))
            .staging(self.staging.clone())
            .env_multi(self.env.iter())
            .build()
            .map_err(|e| SupervisorError::Configuration(e.to_string()))
    }
}

/// Pick the configuration file: `$CACHEVISOR_CONFIG`, else the default file
/// next to the executable if present, else the default file in the working
/// directory.
pub fn resolve_config_path(env_value: Option<OsString>, exe_dir: Option<&Path>) -> PathBuf {
    if let Some(value) = env_value.filter(|v| !v.is_empty()) {
        return PathBuf::from(value);
    }
    if let Some(candidate) = exe_dir.map(|dir| dir.join(DEFAULT_CONFIG_FILE)) {
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// [`resolve_config_path`] for the current process
pub fn config_path() -> PathBuf {
    let exe = std::env::current_exe().ok();
    resolve_config_path(
        std::env::var_os(CONFIG_ENV),
        exe.as_deref().and_then(Path::parent),
    )
}

fn default_grace_period_ms() -> u64 {
    default_grace_period().as_millis() as u64
}

fn default_log_filter() -> String {
    "info".to_string()
}
