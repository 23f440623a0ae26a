//! Server configuration.
//!
//! A JSON file named by `GUILDS_CONFIG_PATH`, else built-in defaults.
//! Every field is optional in the file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use guild_engine::domain::{EngineLimits, DEFAULT_MAX_GUILDS_PER_PLAYER, DEFAULT_STALE_METRICS_SECS};

use crate::error::ConfigError;

pub const CONFIG_PATH_VAR: &str = "GUILDS_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory holding both persisted documents.
    pub data_dir: PathBuf,
    pub guilds_file: String,
    pub claims_file: String,
    pub max_guilds_per_player: usize,
    pub stale_metrics_after_secs: u64,
    /// Re-derive claim border flags after loading instead of trusting the file.
    pub recompute_borders_on_load: bool,
    /// Reply to the sender when a request is rejected.
    pub notify_rejections: bool,
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            guilds_file: "guilds.json".to_string(),
            claims_file: "guildclaims.json".to_string(),
            max_guilds_per_player: DEFAULT_MAX_GUILDS_PER_PLAYER,
            stale_metrics_after_secs: DEFAULT_STALE_METRICS_SECS,
            recompute_borders_on_load: true,
            notify_rejections: true,
            max_frame_len: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn limits(&self) -> EngineLimits {
        EngineLimits {
            max_guilds_per_player: self.max_guilds_per_player,
            stale_metrics_after_secs: self.stale_metrics_after_secs,
        }
    }

    pub fn guilds_path(&self) -> PathBuf {
        self.data_dir.join(&self.guilds_file)
    }

    pub fn claims_path(&self) -> PathBuf {
        self.data_dir.join(&self.claims_file)
    }
}

/// Load configuration from `GUILDS_CONFIG_PATH`, or the built-in defaults.
/// Returns the path used, if any.
pub fn load_config_from_env() -> (ServerConfig, Option<PathBuf>) {
    if let Some(path) = env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from) {
        match ServerConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "guilds::config",
                    path = %path.display(),
                    "server_config.loaded=file"
                );
                return (config, Some(path));
            }
            Err(err) => {
                tracing::warn!(
                    target: "guilds::config",
                    path = %path.display(),
                    error = %err,
                    "server_config.load_failed"
                );
            }
        }
    }

    tracing::info!(target: "guilds::config", "server_config.loaded=builtin");
    (ServerConfig::default(), None)
}
