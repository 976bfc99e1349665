//! Deployment configuration.
//!
//! [`TopologyState`] carries what the caller decides at launch (the optional
//! uplink endpoint). [`DeploymentConfig`] carries every project constant of
//! the obcA topology; its `Default` is the reference deployment and any
//! subset can be overridden from a JSON file.

use crate::components::file_downlink::FileDownlinkParams;
use crate::components::rate_group::Divider;
use crate::queue::QueuePriorityTable;
use crate::sizing::{PlatformConstants, ResourceSizingSpec};
use crate::watchdog::{DEFAULT_PING_FATAL, DEFAULT_PING_WARN};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CMD_SEQ_BUFFER_SIZE: usize = 5 * 1024;
pub const HEALTH_WATCHDOG_CODE: u32 = 0x123;
pub const COMM_PRIORITY: u32 = 100;
pub const BUFFER_MANAGER_ID: u32 = 200;
/// Stack budget for every component thread.
pub const DEFAULT_STACK_SIZE: usize = 512 * 1024;
pub const DEFAULT_QUEUE_DEPTH: usize = 32;
pub const HUB_ADDRESS: &str = "0.0.0.0";
pub const HUB_PORT: u16 = 50500;
/// Opcodes at or above this value are routed to the hub.
pub const CMD_SPLITTER_REMOTE_BASE: u32 = 0x10000;
pub const PARAM_FILE: &str = "PrmDb.dat";
pub const RATE_GROUP_DIVIDERS: [Divider; 3] = [Divider::new(1, 0), Divider::new(2, 0), Divider::new(4, 0)];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Launch-time input to setup and teardown. Never modified by the topology.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopologyState {
    pub hostname: Option<String>,
    pub port: u16,
}

impl TopologyState {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: Some(hostname.into()),
            port,
        }
    }

    pub fn without_network() -> Self {
        Self::default()
    }

    /// The uplink endpoint, present only with a non-empty host and non-zero port.
    pub fn uplink_endpoint(&self) -> Option<(&str, u16)> {
        match self.hostname.as_deref() {
            Some(host) if !host.is_empty() && self.port != 0 => Some((host, self.port)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub cmd_seq_buffer_size: usize,
    pub file_downlink: FileDownlinkParams,
    pub health_watchdog_code: u32,
    pub ping_warn: u32,
    pub ping_fatal: u32,
    pub comm_priority: u32,
    pub task_stack_size: usize,
    pub active_queue_depth: usize,
    pub buffer_manager_id: u32,
    pub platform: PlatformConstants,
    pub queue_table: QueuePriorityTable,
    pub rate_group_dividers: Vec<Divider>,
    pub param_file: PathBuf,
    /// Read the parameter file during setup.
    pub load_parameters: bool,
    pub hub_address: String,
    pub hub_port: u16,
    pub cmd_splitter_remote_base: u32,
    pub reconnect_interval_ms: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            cmd_seq_buffer_size: CMD_SEQ_BUFFER_SIZE,
            file_downlink: FileDownlinkParams::default(),
            health_watchdog_code: HEALTH_WATCHDOG_CODE,
            ping_warn: DEFAULT_PING_WARN,
            ping_fatal: DEFAULT_PING_FATAL,
            comm_priority: COMM_PRIORITY,
            task_stack_size: DEFAULT_STACK_SIZE,
            active_queue_depth: DEFAULT_QUEUE_DEPTH,
            buffer_manager_id: BUFFER_MANAGER_ID,
            platform: PlatformConstants::REFERENCE,
            queue_table: QueuePriorityTable::reference(),
            rate_group_dividers: RATE_GROUP_DIVIDERS.to_vec(),
            param_file: PathBuf::from(PARAM_FILE),
            load_parameters: false,
            hub_address: HUB_ADDRESS.to_string(),
            hub_port: HUB_PORT,
            cmd_splitter_remote_base: CMD_SPLITTER_REMOTE_BASE,
            reconnect_interval_ms: 1000,
        }
    }
}

impl DeploymentConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks values that would otherwise only fail part-way through setup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cmd_seq_buffer_size == 0 {
            return Err(ConfigError::Invalid("cmd_seq_buffer_size must be non-zero".into()));
        }
        if self.active_queue_depth == 0 {
            return Err(ConfigError::Invalid("active_queue_depth must be non-zero".into()));
        }
        if self.task_stack_size == 0 {
            return Err(ConfigError::Invalid("task_stack_size must be non-zero".into()));
        }
        if self.ping_warn > self.ping_fatal {
            return Err(ConfigError::Invalid(format!(
                "ping_warn ({}) exceeds ping_fatal ({})",
                self.ping_warn, self.ping_fatal
            )));
        }
        if self.hub_address.is_empty() {
            return Err(ConfigError::Invalid("hub_address must not be empty".into()));
        }
        if QueuePriorityTable::new(*self.queue_table.entries()).is_err() {
            return Err(ConfigError::Invalid("every queue lane needs a non-zero depth".into()));
        }
        ResourceSizingSpec::try_compute(&self.platform).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uplink_endpoint_requires_host_and_port() {
        assert_eq!(TopologyState::without_network().uplink_endpoint(), None);
        assert_eq!(TopologyState::new("", 50000).uplink_endpoint(), None);
        assert_eq!(TopologyState::new("10.0.0.2", 0).uplink_endpoint(), None);
        assert_eq!(
            TopologyState::new("10.0.0.2", 50000).uplink_endpoint(),
            Some(("10.0.0.2", 50000))
        );
    }

    #[test]
    fn test_partial_json_keeps_reference_values() {
        let config = DeploymentConfig::from_json(r#"{ "hub_port": 0, "load_parameters": true }"#).unwrap();
        assert_eq!(config.hub_port, 0);
        assert!(config.load_parameters);
        assert_eq!(config.cmd_seq_buffer_size, 5120);
        assert_eq!(config.rate_group_dividers, RATE_GROUP_DIVIDERS);
    }

    #[test]
    fn test_inverted_ping_thresholds_rejected() {
        let result = DeploymentConfig::from_json(r#"{ "ping_warn": 6, "ping_fatal": 5 }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
