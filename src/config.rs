//! Link settings read from `dcm.json`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::schema::{ParameterSchema, SchemaError};

pub const CONFIG_FILE: &str = "dcm.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    /// Serial port to use without asking.
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "LinkConfig::default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "LinkConfig::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Parameter schema document; the built-in one when unset.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: Self::default_baud_rate(),
            read_timeout_ms: Self::default_read_timeout_ms(),
            schema_path: None,
        }
    }
}

impl LinkConfig {
    fn default_baud_rate() -> u32 {
        115_200
    }

    fn default_read_timeout_ms() -> u64 {
        100
    }

    /// Defaults when `path` does not exist. Zero rates and timeouts fall back
    /// to their defaults too.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("{} not found, using default link settings", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_json_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(schema_path) = &cfg.schema_path {
            if schema_path.is_relative() {
                if let Some(dir) = path.parent() {
                    cfg.schema_path = Some(dir.join(schema_path));
                }
            }
        }
        log::info!("loaded link settings from {}", path.display());
        Ok(cfg)
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let mut cfg: LinkConfig = serde_json::from_str(text)?;
        if cfg.baud_rate == 0 {
            cfg.baud_rate = Self::default_baud_rate();
        }
        if cfg.read_timeout_ms == 0 {
            cfg.read_timeout_ms = Self::default_read_timeout_ms();
        }
        if cfg.port.as_deref().is_some_and(|p| p.trim().is_empty()) {
            cfg.port = None;
        }
        Ok(cfg)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn schema(&self) -> Result<ParameterSchema, ConfigError> {
        let schema = match &self.schema_path {
            Some(path) => ParameterSchema::load(path)?,
            None => ParameterSchema::standard()?,
        };
        Ok(schema)
    }
}
