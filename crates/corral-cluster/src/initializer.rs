//! Cluster initializer: create a new cluster rooted at this host.

use tracing::{debug, info};

use corral_core::{Availability, HostStatus, ManagerStatus, MemberStatus, Role};
use corral_state::{ClusterRecord, HostState, Marker, MembershipRecord, Operation, TokenRecord};

use crate::error::{ClusterError, ClusterResult};
use crate::membership::{epoch_secs, generate_node_id};
use crate::node::{ClusterHandle, InitOutcome, Node};
use crate::tls;
use crate::token::generate_secret;

impl Node {
    /// Create a cluster with this host as leader.
    ///
    /// `advertise` is the `address:port` joining hosts dial; empty means
    /// the host's own address. Re-running on a host that already
    /// initialized returns the existing handle without touching anything,
    /// even if the runtime has since gone away.
    pub async fn initialize(&self, advertise: &str) -> ClusterResult<InitOutcome> {
        let _guard = self.lifecycle.lock().await;
        let hostname = self.identity.hostname.clone();

        if let Some(marker) = self.state.get_marker(&hostname, Operation::Initialize)? {
            let cluster = self
                .state
                .get_cluster()?
                .ok_or(ClusterError::ClusterNotInitialized)?;
            debug!(%hostname, cluster_id = %marker.cluster_id, "cluster already initialized");
            return Ok(InitOutcome::AlreadyInitialized(ClusterHandle::from(&cluster)));
        }
        if let Some(marker) = self.state.get_marker(&hostname, Operation::Join)? {
            return Err(ClusterError::AlreadyMemberOfOtherCluster(marker.cluster_id));
        }
        if !self.identity.allows(Role::Manager) {
            return Err(ClusterError::RoleMismatch(format!(
                "{hostname} may not hold the manager role the leader requires"
            )));
        }

        let runtime = self.ensure_runtime().await?;

        let advertise_addr = if advertise.trim().is_empty() {
            self.identity.address.clone()
        } else {
            advertise.trim().to_string()
        };
        let cluster_id = uuid::Uuid::new_v4().to_string();
        let node_id = generate_node_id();
        let now = epoch_secs();

        let ca = tls::generate_ca(&cluster_id)?;
        let cluster = ClusterRecord {
            id: cluster_id.clone(),
            leader_node_id: node_id.clone(),
            advertise_addr: advertise_addr.clone(),
            ca_digest: tls::ca_digest(&ca.cert_pem),
            ca_cert_pem: ca.cert_pem,
            ca_key_pem: ca.key_pem,
            created_at: now,
        };

        let tokens: Vec<TokenRecord> = Role::ALL
            .into_iter()
            .map(|role| TokenRecord {
                role,
                secret: generate_secret(),
                generation: 1,
                issued_at: now,
            })
            .collect();

        let leader = MembershipRecord {
            node_id: node_id.clone(),
            hostname: hostname.clone(),
            address: advertise_addr.clone(),
            role: Role::Manager,
            availability: Availability::Active,
            manager_status: ManagerStatus::Leader,
            engine_version: runtime.version.clone(),
            joined_at: now,
            last_seen: now,
            status: MemberStatus::Ready,
        };

        let host = HostState {
            hostname: hostname.clone(),
            address: self.identity.address.clone(),
            status: HostStatus::ClusterMember,
            engine_version: Some(runtime.version),
            updated_at: now,
        };

        let marker = Marker {
            hostname: hostname.clone(),
            operation: Operation::Initialize,
            cluster_id: cluster_id.clone(),
            node_id,
            created_at: now,
        };

        self.state
            .commit_initialize(&cluster, &tokens, &leader, &host, &marker)?;

        info!(%hostname, %cluster_id, advertise = %advertise_addr, "cluster initialized");
        Ok(InitOutcome::Initialized(ClusterHandle::from(&cluster)))
    }
}
