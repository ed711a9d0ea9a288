//! Client configuration.
//!
//! Loaded from TOML. Every field is optional and falls back to its default;
//! durations are written in humantime form (`"120s"`, `"500ms"`).

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::{DEFAULT_QUERY_INTERVAL, DEFAULT_TICK_INTERVAL, HANDSHAKE_TIMEOUT};
use crate::core::{GroupManagerConfig, Id, DEFAULT_NEW_GROUP_THRESHOLD};
use crate::ds::GateOptions;

pub const ENV_STATION_HOST: &str = "SECHAT_STATION_HOST";
pub const ENV_STATION_PORT: &str = "SECHAT_STATION_PORT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid station port {0:?}")]
    InvalidPort(String),
    #[error("An unknown error occurred: {0}")]
    Other(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a handshake may go unanswered before it is retried.
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Minimum time between group queries to the same member.
    #[serde(with = "humantime_serde")]
    pub query_interval: Duration,

    pub new_group_threshold: usize,

    pub default_assistants: Vec<Id>,

    pub station: GateOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
            query_interval: DEFAULT_QUERY_INTERVAL,
            new_group_threshold: DEFAULT_NEW_GROUP_THRESHOLD,
            default_assistants: Vec::new(),
            station: GateOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    /// Override the station address from `SECHAT_STATION_HOST` and
    /// `SECHAT_STATION_PORT` when set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var(ENV_STATION_HOST) {
            self.station.host = host;
        }
        if let Ok(port) = env::var(ENV_STATION_PORT) {
            self.station.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }
        Ok(())
    }

    pub fn group_manager_config(&self) -> GroupManagerConfig {
        GroupManagerConfig {
            new_group_threshold: self.new_group_threshold,
            default_assistants: self.default_assistants.clone(),
        }
    }
}
