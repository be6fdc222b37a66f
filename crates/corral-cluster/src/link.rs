//! Node-to-leader requests.
//!
//! [`LeaderLink`] is how a host reaches the leader named in its join token:
//! admission, leaving, liveness check-ins, and pulling the member list for
//! a manager's replica.
//! The daemon uses an HTTP implementation; [`InProcessNetwork`] wires
//! nodes together inside one process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use corral_core::Role;
use corral_state::MembershipRecord;

use crate::error::{ClusterError, ClusterResult};
use crate::node::Node;

/// Sent by a joining host to the leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmitRequest {
    /// Encoded join token, as presented to the joining host.
    pub token: String,
    pub role: Role,
    pub hostname: String,
    pub address: String,
    pub engine_version: String,
}

/// The leader's answer to a successful admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmitResponse {
    pub cluster_id: String,
    pub leader_addr: String,
    pub ca_cert_pem: String,
    pub record: MembershipRecord,
    pub node_cert_pem: String,
    pub node_key_pem: String,
    /// Member list at admission time, sorted for display.
    pub members: Vec<MembershipRecord>,
    /// False when the host was already in the member table.
    pub created: bool,
}

/// Sent by a member asking the leader to drop it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub cluster_id: String,
    pub node_id: String,
    pub hostname: String,
}

/// Periodic check-in from a member, used by the leader to judge liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub cluster_id: String,
    pub node_id: String,
    pub hostname: String,
}

/// Transport to the cluster leader.
///
/// Implementations report a leader that cannot be contacted as
/// [`ClusterError::UnreachableLeader`]; errors the leader itself returns
/// come back as their original variant.
#[async_trait]
pub trait LeaderLink: Send + Sync {
    async fn admit(&self, leader: &str, request: &AdmitRequest) -> ClusterResult<AdmitResponse>;

    async fn leave(&self, leader: &str, request: &LeaveRequest) -> ClusterResult<()>;

    async fn members(&self, leader: &str, cluster_id: &str) -> ClusterResult<Vec<MembershipRecord>>;

    async fn heartbeat(&self, leader: &str, beat: &Heartbeat) -> ClusterResult<()>;
}

/// Nodes of one process addressed by their advertise address.
///
/// Holds weak references so registering a node with the network it also
/// uses as its link does not leak.
#[derive(Default)]
pub struct InProcessNetwork {
    nodes: RwLock<HashMap<String, Weak<Node>>>,
    down: RwLock<HashSet<String>>,
}

impl InProcessNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `node` reachable at `address`.
    pub fn register(&self, address: &str, node: &Arc<Node>) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(address.to_string(), Arc::downgrade(node));
        }
    }

    /// Partition (`false`) or heal (`true`) the node at `address`.
    pub fn set_reachable(&self, address: &str, reachable: bool) {
        if let Ok(mut down) = self.down.write() {
            if reachable {
                down.remove(address);
            } else {
                down.insert(address.to_string());
            }
        }
        debug!(%address, reachable, "in-process link changed");
    }

    fn resolve(&self, address: &str) -> ClusterResult<Arc<Node>> {
        let unreachable = || ClusterError::UnreachableLeader(address.to_string());
        let down = self.down.read().map_err(|_| unreachable())?;
        if down.contains(address) {
            return Err(unreachable());
        }
        let nodes = self.nodes.read().map_err(|_| unreachable())?;
        nodes.get(address).and_then(Weak::upgrade).ok_or_else(unreachable)
    }
}

#[async_trait]
impl LeaderLink for InProcessNetwork {
    async fn admit(&self, leader: &str, request: &AdmitRequest) -> ClusterResult<AdmitResponse> {
        let node = self.resolve(leader)?;
        node.admit(request).await
    }

    async fn leave(&self, leader: &str, request: &LeaveRequest) -> ClusterResult<()> {
        let node = self.resolve(leader)?;
        node.remove_member(request).await
    }

    async fn members(&self, leader: &str, cluster_id: &str) -> ClusterResult<Vec<MembershipRecord>> {
        let node = self.resolve(leader)?;
        node.authoritative_members(cluster_id)
    }

    async fn heartbeat(&self, leader: &str, beat: &Heartbeat) -> ClusterResult<()> {
        let node = self.resolve(leader)?;
        node.record_heartbeat(beat).await
    }
}
