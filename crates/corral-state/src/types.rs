//! Persisted domain types for a Corral node.
//!
//! All types are serializable to/from JSON for storage in redb tables and
//! double as the wire format of the node API.

use std::fmt;

use serde::{Deserialize, Serialize};

use corral_core::{Availability, HostStatus, ManagerStatus, MemberStatus, Role};

/// Unique identifier for a cluster.
pub type ClusterId = String;

/// Unique identifier for a node within a cluster.
pub type NodeId = String;

// ── Cluster ───────────────────────────────────────────────────────

/// The cluster rooted at this node. Only the leader holds one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterRecord {
    pub id: ClusterId,
    pub leader_node_id: NodeId,
    /// `address:port` joining hosts dial to reach the leader.
    pub advertise_addr: String,
    /// PEM-encoded cluster CA certificate (the root of trust).
    pub ca_cert_pem: String,
    /// PEM-encoded cluster CA private key.
    pub ca_key_pem: String,
    /// Hex SHA-256 of `ca_cert_pem`, embedded in every join token.
    pub ca_digest: String,
    pub created_at: u64,
}

/// Live secret for one credential class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenRecord {
    pub role: Role,
    pub secret: String,
    /// Bumped on every rotation.
    pub generation: u32,
    pub issued_at: u64,
}

// ── Membership ────────────────────────────────────────────────────

/// One entry of the cluster state view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MembershipRecord {
    pub node_id: NodeId,
    pub hostname: String,
    pub address: String,
    pub role: Role,
    pub availability: Availability,
    pub manager_status: ManagerStatus,
    pub engine_version: String,
    pub joined_at: u64,
    /// Epoch seconds of the member's last check-in with the leader.
    #[serde(default)]
    pub last_seen: u64,
    /// Filled in by the leader when it serves the view.
    #[serde(default)]
    pub status: MemberStatus,
}

impl MembershipRecord {
    /// Ordering used by the state view: leader, managers, workers, then
    /// hostname within each group.
    pub fn view_rank(&self) -> (u8, &str) {
        let group = match (self.manager_status, self.role) {
            (ManagerStatus::Leader, _) => 0,
            (_, Role::Manager) => 1,
            (_, Role::Worker) => 2,
        };
        (group, self.hostname.as_str())
    }
}

/// This host's own membership, written when a join succeeds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalMembership {
    pub cluster_id: ClusterId,
    /// Leader address the host joined through.
    pub leader_addr: String,
    pub ca_cert_pem: String,
    pub ca_digest: String,
    /// PEM-encoded node certificate signed by the cluster CA.
    pub node_cert_pem: String,
    pub node_key_pem: String,
    pub record: MembershipRecord,
}

// ── Host ──────────────────────────────────────────────────────────

/// Provisioning state of the host the store belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostState {
    pub hostname: String,
    pub address: String,
    pub status: HostStatus,
    pub engine_version: Option<String>,
    pub updated_at: u64,
}

// ── Markers ───────────────────────────────────────────────────────

/// Operation guarded by an idempotency marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Initialize,
    Join,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Initialize => "initialize",
            Operation::Join => "join",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable proof that `operation` completed on `hostname`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Marker {
    pub hostname: String,
    pub operation: Operation,
    pub cluster_id: ClusterId,
    /// Node id the operation produced for this host.
    pub node_id: NodeId,
    pub created_at: u64,
}

impl Marker {
    /// Build the composite key for the markers table.
    pub fn table_key(&self) -> String {
        marker_key(&self.hostname, self.operation)
    }
}

/// Composite key for a (host, operation) marker.
pub fn marker_key(hostname: &str, operation: Operation) -> String {
    format!("{hostname}/{operation}")
}
