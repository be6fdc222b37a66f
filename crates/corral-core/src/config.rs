//! Inventory and node configuration parsers.
//!
//! The inventory (`inventory.toml`) describes every host the bootstrap
//! pipeline drives. The node config (`corrald.toml`) describes the single
//! host a daemon runs on. Both are plain values handed to the components
//! that need them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::types::Role;

/// Default port the node daemon API listens on.
pub const DEFAULT_API_PORT: u16 = 2377;

/// Inventory validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("inventory lists no hosts")]
    NoHosts,

    #[error("duplicate hostname '{0}' in inventory")]
    DuplicateHost(String),

    #[error("inventory has no manager host")]
    NoManager,

    #[error("more than one host is flagged as leader: {0} and {1}")]
    MultipleLeaders(String, String),

    #[error("host '{0}' is flagged as leader but its role is worker")]
    WorkerLeader(String),

    #[error("invalid duration '{value}' for {field}")]
    InvalidDuration { field: &'static str, value: String },
}

/// Ordered host inventory for one bootstrap run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    pub hosts: Vec<HostSpec>,
}

/// Cluster-wide settings shared by every host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Port every node daemon's API listens on, unless a host overrides it.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Port the leader advertises to joining hosts when it differs from
    /// the leader's API port (a forwarded or load-balanced port).
    #[serde(default)]
    pub advertise_port: Option<u16>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            api_port: DEFAULT_API_PORT,
            advertise_port: None,
        }
    }
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

/// Timeout and backoff parameters for network steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: String,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,
    /// Per-attempt timeout for a single network round-trip.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    /// How long to wait for every member to show up in the leader's view.
    #[serde(default = "default_convergence_timeout")]
    pub convergence_timeout: String,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            request_timeout: default_request_timeout(),
            convergence_timeout: default_convergence_timeout(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> String {
    "500ms".to_string()
}

fn default_max_backoff() -> String {
    "10s".to_string()
}

fn default_request_timeout() -> String {
    "15s".to_string()
}

fn default_convergence_timeout() -> String {
    "30s".to_string()
}

impl RetrySettings {
    pub fn initial_backoff(&self) -> Result<Duration, ConfigError> {
        duration_field("retry.initial_backoff", &self.initial_backoff)
    }

    pub fn max_backoff(&self) -> Result<Duration, ConfigError> {
        duration_field("retry.max_backoff", &self.max_backoff)
    }

    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("retry.request_timeout", &self.request_timeout)
    }

    pub fn convergence_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("retry.convergence_timeout", &self.convergence_timeout)
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

/// One host descriptor from the inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSpec {
    pub hostname: String,
    /// Address the host's daemon is reachable on (IP or DNS name).
    pub address: String,
    /// Memory in MiB. Consumed by provisioning, informational here.
    pub ram: Option<u64>,
    pub cpus: Option<u32>,
    pub role: Role,
    /// Marks the manager that initializes the cluster.
    #[serde(default)]
    pub leader: bool,
    /// Per-host override of `cluster.api_port`.
    pub api_port: Option<u16>,
}

impl HostSpec {
    /// `address:port` of this host's daemon API.
    pub fn endpoint(&self, settings: &ClusterSettings) -> String {
        format!("{}:{}", self.address, self.api_port.unwrap_or(settings.api_port))
    }

    /// `address:port` joining hosts dial when this host leads.
    pub fn advertise_addr(&self, settings: &ClusterSettings) -> String {
        match settings.advertise_port {
            Some(port) => format!("{}:{port}", self.address),
            None => self.endpoint(settings),
        }
    }
}

impl Inventory {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let inventory = Self::from_toml(&content)?;
        Ok(inventory)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let inventory: Inventory = toml::from_str(content)?;
        inventory.validate()?;
        Ok(inventory)
    }

    /// Check the structural rules the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::NoHosts);
        }

        let mut seen = HashSet::new();
        for host in &self.hosts {
            if !seen.insert(host.hostname.as_str()) {
                return Err(ConfigError::DuplicateHost(host.hostname.clone()));
            }
        }

        if !self.hosts.iter().any(|h| h.role == Role::Manager) {
            return Err(ConfigError::NoManager);
        }

        let mut flagged = self.hosts.iter().filter(|h| h.leader);
        if let Some(first) = flagged.next() {
            if first.role == Role::Worker {
                return Err(ConfigError::WorkerLeader(first.hostname.clone()));
            }
            if let Some(second) = flagged.next() {
                return Err(ConfigError::MultipleLeaders(
                    first.hostname.clone(),
                    second.hostname.clone(),
                ));
            }
        }

        self.retry.initial_backoff()?;
        self.retry.max_backoff()?;
        self.retry.request_timeout()?;
        self.retry.convergence_timeout()?;
        Ok(())
    }

    /// The host that initializes the cluster: the flagged leader, else the
    /// first manager in inventory order.
    pub fn leader(&self) -> Option<&HostSpec> {
        self.hosts
            .iter()
            .find(|h| h.leader)
            .or_else(|| self.hosts.iter().find(|h| h.role == Role::Manager))
    }

    /// Every host except the leader, in inventory order.
    pub fn followers(&self) -> impl Iterator<Item = &HostSpec> {
        let leader = self.leader().map(|h| h.hostname.clone());
        self.hosts
            .iter()
            .filter(move |h| Some(&h.hostname) != leader.as_ref())
    }

    pub fn host(&self, hostname: &str) -> Option<&HostSpec> {
        self.hosts.iter().find(|h| h.hostname == hostname)
    }
}

/// Configuration of the node daemon on a single host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub hostname: String,
    /// Address other hosts use to reach this daemon.
    pub address: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Roles this host may join with. Empty means any role.
    #[serde(default)]
    pub allowed_roles: Vec<Role>,
    #[serde(default)]
    pub runtime: RuntimeSettings,
    /// Replica refresh interval for non-leader managers.
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/corral")
}

fn default_sync_interval() -> String {
    "5s".to_string()
}

/// How the daemon checks for (and optionally installs) the container runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Command whose success (and stdout) proves the runtime is up.
    #[serde(default = "default_probe")]
    pub probe: Vec<String>,
    /// Command run once when the probe fails.
    pub install: Option<Vec<String>>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            probe: default_probe(),
            install: None,
        }
    }
}

fn default_probe() -> Vec<String> {
    ["docker", "version", "--format", "{{.Server.Version}}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.sync_interval()?;
        Ok(config)
    }

    /// `address:port` advertised to the rest of the cluster.
    pub fn advertise_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn sync_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("sync_interval", &self.sync_interval)
    }
}
