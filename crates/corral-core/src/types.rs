//! Shared types used across Corral crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role a host plays once it is a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Manager,
    Worker,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Manager, Role::Worker];

    /// Lowercase name, as used on the command line and in URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Worker => "worker",
        }
    }

    /// Name of the credential class that admits this role.
    pub fn token_scope(&self) -> &'static str {
        match self {
            Role::Manager => "manager-join",
            Role::Worker => "worker-join",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manager" => Ok(Role::Manager),
            "worker" => Ok(Role::Worker),
            other => Err(format!("unknown role '{other}' (expected manager or worker)")),
        }
    }
}

/// Provisioning status of a single host.
///
/// Moves forward only: `Unprovisioned -> RuntimeReady -> ClusterMember`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostStatus {
    Unprovisioned,
    RuntimeReady,
    ClusterMember,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Unprovisioned => "unprovisioned",
            HostStatus::RuntimeReady => "runtime-ready",
            HostStatus::ClusterMember => "cluster-member",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling availability of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Active,
    Drained,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Active => "active",
            Availability::Drained => "drained",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Availability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Availability::Active),
            "drained" | "drain" => Ok(Availability::Drained),
            other => Err(format!("unknown availability '{other}'")),
        }
    }
}

/// Manager status of a member as reported by the state view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerStatus {
    Leader,
    Reachable,
    /// Workers carry no manager status.
    #[serde(rename = "n/a")]
    NotApplicable,
}

impl ManagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerStatus::Leader => "leader",
            ManagerStatus::Reachable => "reachable",
            ManagerStatus::NotApplicable => "n/a",
        }
    }

    /// Manager status a freshly admitted member of `role` starts with.
    pub fn for_joined(role: Role) -> Self {
        match role {
            Role::Manager => ManagerStatus::Reachable,
            Role::Worker => ManagerStatus::NotApplicable,
        }
    }
}

impl fmt::Display for ManagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness of a member as judged by the leader from its last check-in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Ready,
    /// Not heard from within the liveness window.
    Down,
    /// Read from a store written before check-ins were tracked.
    #[default]
    Unknown,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Ready => "ready",
            MemberStatus::Down => "down",
            MemberStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
