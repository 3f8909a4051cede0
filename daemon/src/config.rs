//! Daemon configuration: the coordinator's settings plus process-level
//! options. CLI flags and environment variables override file values.

use anyhow::Context;
use polity_coordinator::CoordinatorConfig;
use polity_utils::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    #[serde(default)]
    pub enable_metrics: bool,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Filter directive, e.g. `"info"` or `"info,polity_coordinator=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

fn default_rpc_port() -> u16 {
    7077
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            rpc_port: default_rpc_port(),
            enable_metrics: false,
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.coordinator.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
