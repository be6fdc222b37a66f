//! The host-local bootstrap engine.
//!
//! A [`Node`] owns everything one host needs to take part in bootstrap:
//! its durable state, its container runtime, a link to reach the leader,
//! and the locks that serialize lifecycle changes on this host and
//! admissions when this host leads.
//!
//! Operations are split across modules by component: `initializer`,
//! `broker`, `joiner` and `view` each add an `impl Node` block.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use corral_core::{HostStatus, Role};
use corral_metrics::ClusterMetrics;
use corral_state::{ClusterRecord, HostState, LocalMembership, MembershipRecord, StateStore};

use crate::error::{ClusterError, ClusterResult};
use crate::link::LeaderLink;
use crate::membership::epoch_secs;
use crate::runtime::{ContainerRuntime, RuntimeInfo, SharedReadiness};

/// Default silence after which the leader reports a member down.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(30);

/// Who this host is and which roles it may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub hostname: String,
    /// `address:port` other nodes use to reach this host's API.
    pub address: String,
    /// Roles local policy permits. Empty means any.
    #[serde(default)]
    pub allowed_roles: Vec<Role>,
}

impl NodeIdentity {
    pub fn new(hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
            allowed_roles: Vec::new(),
        }
    }

    pub fn with_allowed_roles(mut self, roles: Vec<Role>) -> Self {
        self.allowed_roles = roles;
        self
    }

    pub fn allows(&self, role: Role) -> bool {
        self.allowed_roles.is_empty() || self.allowed_roles.contains(&role)
    }
}

/// Reference to the cluster a leader created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHandle {
    pub cluster_id: String,
    pub leader_node_id: String,
    pub advertise_addr: String,
    pub ca_digest: String,
    pub created_at: u64,
}

impl From<&ClusterRecord> for ClusterHandle {
    fn from(cluster: &ClusterRecord) -> Self {
        Self {
            cluster_id: cluster.id.clone(),
            leader_node_id: cluster.leader_node_id.clone(),
            advertise_addr: cluster.advertise_addr.clone(),
            ca_digest: cluster.ca_digest.clone(),
            created_at: cluster.created_at,
        }
    }
}

/// Result of [`Node::initialize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "cluster", rename_all = "snake_case")]
pub enum InitOutcome {
    Initialized(ClusterHandle),
    /// The host had already initialized this cluster; nothing changed.
    AlreadyInitialized(ClusterHandle),
}

impl InitOutcome {
    pub fn handle(&self) -> &ClusterHandle {
        match self {
            InitOutcome::Initialized(h) | InitOutcome::AlreadyInitialized(h) => h,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, InitOutcome::AlreadyInitialized(_))
    }
}

/// Result of [`Node::join`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum JoinOutcome {
    Joined(MembershipRecord),
    /// The host was already a member of the token's cluster; nothing changed.
    AlreadyJoined(MembershipRecord),
}

impl JoinOutcome {
    pub fn record(&self) -> &MembershipRecord {
        match self {
            JoinOutcome::Joined(r) | JoinOutcome::AlreadyJoined(r) => r,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, JoinOutcome::AlreadyJoined(_))
    }
}

/// A host taking part in cluster bootstrap.
pub struct Node {
    pub(crate) identity: NodeIdentity,
    pub(crate) state: StateStore,
    pub(crate) runtime: SharedReadiness,
    pub(crate) link: Arc<dyn LeaderLink>,
    pub(crate) metrics: Arc<ClusterMetrics>,
    /// Serializes admissions, rotations and removals while leading.
    pub(crate) admission: Mutex<()>,
    /// Serializes initialize, join and leave on this host.
    pub(crate) lifecycle: Mutex<()>,
    /// How long a member may go without a heartbeat before the leader
    /// reports it down.
    pub(crate) liveness_window: Duration,
}

impl Node {
    pub fn new(
        identity: NodeIdentity,
        state: StateStore,
        runtime: Arc<dyn ContainerRuntime>,
        link: Arc<dyn LeaderLink>,
    ) -> Self {
        Self {
            identity,
            state,
            runtime: SharedReadiness::new(runtime),
            link,
            metrics: Arc::new(ClusterMetrics::new()),
            admission: Mutex::new(()),
            lifecycle: Mutex::new(()),
            liveness_window: DEFAULT_LIVENESS_WINDOW,
        }
    }

    /// Set how long a silent member stays `ready` in the leader's view.
    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    /// Share a metrics registry with the caller.
    pub fn with_metrics(mut self, metrics: Arc<ClusterMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn hostname(&self) -> &str {
        &self.identity.hostname
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn metrics(&self) -> &Arc<ClusterMetrics> {
        &self.metrics
    }

    /// Make sure the container runtime is up, installing it if configured.
    ///
    /// Concurrent callers share one check, and a caller that gives up does
    /// not cancel an install already underway. On success the host
    /// advances to `runtime-ready` (a member stays a member). A failure
    /// never moves the host backwards.
    pub async fn ensure_runtime(&self) -> ClusterResult<RuntimeInfo> {
        let info = match self.runtime.ensure_ready().await {
            Ok(info) => info,
            Err(e) => {
                warn!(hostname = %self.identity.hostname, error = %e, "container runtime not ready");
                return Err(e);
            }
        };

        let mut host = self.host_state()?;
        let changed = host.status < HostStatus::RuntimeReady
            || host.engine_version.as_deref() != Some(info.version.as_str());
        if changed {
            host.status = host.status.max(HostStatus::RuntimeReady);
            host.engine_version = Some(info.version.clone());
            host.updated_at = epoch_secs();
            self.state.put_host_state(&host)?;
            info!(hostname = %host.hostname, version = %info.version, "host runtime ready");
        } else {
            debug!(hostname = %host.hostname, "runtime already ready");
        }
        Ok(info)
    }

    /// The host's provisioning state; `unprovisioned` until first touched.
    pub fn host_state(&self) -> ClusterResult<HostState> {
        Ok(self.state.get_host_state()?.unwrap_or_else(|| HostState {
            hostname: self.identity.hostname.clone(),
            address: self.identity.address.clone(),
            status: HostStatus::Unprovisioned,
            engine_version: None,
            updated_at: epoch_secs(),
        }))
    }

    /// Whether this host leads a cluster.
    pub fn is_leader(&self) -> ClusterResult<bool> {
        Ok(self.state.get_cluster()?.is_some())
    }

    /// The cluster this host leads, or the reason it cannot act as leader.
    pub(crate) fn leader_cluster(&self) -> ClusterResult<ClusterRecord> {
        if let Some(cluster) = self.state.get_cluster()? {
            return Ok(cluster);
        }
        match self.state.get_local_membership()? {
            Some(local) => Err(ClusterError::NotLeader(format!(
                "{} is a {}; the leader is {}",
                self.identity.hostname, local.record.role, local.leader_addr
            ))),
            None => Err(ClusterError::ClusterNotInitialized),
        }
    }

    /// Membership this host holds as a joined (non-leader) node.
    pub fn local_membership(&self) -> ClusterResult<Option<LocalMembership>> {
        Ok(self.state.get_local_membership()?)
    }

    /// Id of the cluster this host belongs to, if any.
    pub fn cluster_id(&self) -> ClusterResult<Option<String>> {
        if let Some(cluster) = self.state.get_cluster()? {
            return Ok(Some(cluster.id));
        }
        Ok(self.state.get_local_membership()?.map(|m| m.cluster_id))
    }

    /// Role this host holds in its cluster, if any.
    pub fn role(&self) -> ClusterResult<Option<Role>> {
        if self.state.get_cluster()?.is_some() {
            return Ok(Some(Role::Manager));
        }
        Ok(self.state.get_local_membership()?.map(|m| m.record.role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::InProcessNetwork;
    use crate::runtime::StaticRuntime;

    fn node(runtime: Arc<StaticRuntime>) -> Node {
        Node::new(
            NodeIdentity::new("swarm-master-1", "10.0.0.11:2377"),
            StateStore::open_in_memory().unwrap(),
            runtime,
            Arc::new(InProcessNetwork::new()),
        )
    }

    #[test]
    fn identity_policy() {
        let any = NodeIdentity::new("h", "a");
        assert!(any.allows(Role::Manager));
        assert!(any.allows(Role::Worker));

        let workers_only = any.with_allowed_roles(vec![Role::Worker]);
        assert!(!workers_only.allows(Role::Manager));
        assert!(workers_only.allows(Role::Worker));
    }

    #[tokio::test]
    async fn fresh_host_is_unprovisioned() {
        let node = node(Arc::new(StaticRuntime::unavailable()));
        let host = node.host_state().unwrap();
        assert_eq!(host.status, HostStatus::Unprovisioned);
        assert!(!node.is_leader().unwrap());
        assert!(node.role().unwrap().is_none());
        assert!(matches!(
            node.leader_cluster(),
            Err(ClusterError::ClusterNotInitialized)
        ));
    }

    #[tokio::test]
    async fn ensure_runtime_advances_and_never_downgrades() {
        let runtime = Arc::new(StaticRuntime::unavailable());
        let node = node(runtime.clone());

        assert!(matches!(
            node.ensure_runtime().await,
            Err(ClusterError::RuntimeUnavailable(_))
        ));
        assert_eq!(node.host_state().unwrap().status, HostStatus::Unprovisioned);

        runtime.set_version(Some("27.1.1"));
        let info = node.ensure_runtime().await.unwrap();
        assert_eq!(info.version, "27.1.1");
        let host = node.host_state().unwrap();
        assert_eq!(host.status, HostStatus::RuntimeReady);
        assert_eq!(host.engine_version.as_deref(), Some("27.1.1"));

        runtime.set_version(None);
        assert!(node.ensure_runtime().await.is_err());
        assert_eq!(node.host_state().unwrap().status, HostStatus::RuntimeReady);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let handle = ClusterHandle {
            cluster_id: "c".into(),
            leader_node_id: "n".into(),
            advertise_addr: "10.0.0.11:2377".into(),
            ca_digest: "d".into(),
            created_at: 1,
        };
        let json = serde_json::to_value(InitOutcome::AlreadyInitialized(handle.clone())).unwrap();
        assert_eq!(json["outcome"], "already_initialized");
        assert_eq!(json["cluster"]["cluster_id"], "c");

        let back: InitOutcome = serde_json::from_value(json).unwrap();
        assert!(back.is_noop());
        assert_eq!(back.handle(), &handle);
    }
}
