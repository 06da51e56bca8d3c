//! Process configuration of the control plane.
//!
//! These types map to YAML (also JSON / TOML) files and carry defaults so that a minimal
//! file only lists its fleets.
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_distribution_addr() -> String {
    "0.0.0.0:18010".to_string()
}

fn default_fanout_send_timeout() -> String {
    "5s".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_agent_listen_addr() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_fleet_id() -> String {
    "default".to_string()
}

fn default_node_name() -> String {
    "mock-agent".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ControlPlaneConfig {
    /// HTTP address of the snapshot distribution service.
    #[serde(default = "default_distribution_addr")]
    pub distribution_addr: String,
    /// Per-node bound of the fan-out, parsed by humantime; `"0s"` waits indefinitely.
    #[serde(default = "default_fanout_send_timeout")]
    pub fanout_send_timeout: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub fleets: Vec<FleetEntry>,
    #[serde(default)]
    pub agent: Option<AgentConfig>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            distribution_addr: default_distribution_addr(),
            fanout_send_timeout: default_fanout_send_timeout(),
            logging: LoggingConfig::default(),
            fleets: Vec::new(),
            agent: None,
        }
    }
}

impl ControlPlaneConfig {
    /// The fan-out send bound; `None` when disabled.
    pub fn send_timeout(&self) -> Result<Option<Duration>, humantime::DurationError> {
        let timeout = humantime::parse_duration(&self.fanout_send_timeout)?;
        Ok((!timeout.is_zero()).then_some(timeout))
    }

    pub fn fleet(&self, id: &str) -> Option<&FleetEntry> {
        self.fleets.iter().find(|f| f.id == id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// A fleet and the documents compiled into its snapshot.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FleetEntry {
    pub id: String,
    #[serde(default)]
    pub apis: Vec<ApiEntry>,
    /// Static route documents.
    #[serde(default)]
    pub static_routes: Vec<String>,
}

impl FleetEntry {
    /// Every file this fleet is compiled from.
    pub fn source_paths(&self) -> impl Iterator<Item = &str> {
        self.apis
            .iter()
            .map(|api| api.spec_path.as_str())
            .chain(self.static_routes.iter().map(String::as_str))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiEntry {
    pub name: String,
    pub spec_path: String,
}

/// Settings of the mock agent mode.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    #[serde(default = "default_agent_listen_addr")]
    pub listen_addr: String,
    /// Base URL of the distribution service, e.g. `http://kusk-gateway-manager:18010`.
    pub manager_url: String,
    #[serde(default = "default_fleet_id")]
    pub fleet_id: String,
    #[serde(default = "default_node_name")]
    pub node_name: String,
}
