//! Leaving the cluster and leader-side member administration.

use tracing::info;

use corral_core::{Availability, HostStatus};
use corral_state::MembershipRecord;

use crate::error::{ClusterError, ClusterResult};
use crate::link::LeaveRequest;
use crate::membership::{MembershipManager, epoch_secs};
use crate::node::Node;

impl Node {
    /// Leave the cluster this host joined.
    ///
    /// The leader drops the record first; local membership and the join
    /// marker are cleared only once it has. The leader itself cannot leave.
    pub async fn leave(&self) -> ClusterResult<MembershipRecord> {
        let _guard = self.lifecycle.lock().await;
        if self.state.get_cluster()?.is_some() {
            return Err(ClusterError::LeaderCannotLeave);
        }
        let local = self
            .state
            .get_local_membership()?
            .ok_or(ClusterError::NotMember)?;

        let request = LeaveRequest {
            cluster_id: local.cluster_id.clone(),
            node_id: local.record.node_id.clone(),
            hostname: local.record.hostname.clone(),
        };
        self.link.leave(&local.leader_addr, &request).await?;

        let mut host = self.host_state()?;
        host.status = HostStatus::RuntimeReady;
        host.updated_at = epoch_secs();
        self.state.commit_leave(&host)?;

        info!(
            hostname = %self.identity.hostname,
            cluster_id = %local.cluster_id,
            "left cluster"
        );
        Ok(local.record)
    }

    /// Leader side of a leave: drop the requesting member.
    pub async fn remove_member(&self, request: &LeaveRequest) -> ClusterResult<()> {
        let _guard = self.admission.lock().await;
        let cluster = self.leader_cluster()?;
        if cluster.id != request.cluster_id {
            return Err(ClusterError::NotMember);
        }
        if cluster.leader_node_id == request.node_id {
            return Err(ClusterError::LeaderCannotLeave);
        }

        let members = MembershipManager::new(self.state.clone());
        match members.get_member(&request.node_id)? {
            Some(record) if record.hostname == request.hostname => {
                members.remove(&request.node_id)?;
                Ok(())
            }
            _ => Err(ClusterError::UnknownNode(request.node_id.clone())),
        }
    }

    /// Drain or re-activate a member. Leader only.
    pub async fn set_availability(
        &self,
        node_id: &str,
        availability: Availability,
    ) -> ClusterResult<MembershipRecord> {
        let _guard = self.admission.lock().await;
        self.leader_cluster()?;
        MembershipManager::new(self.state.clone())
            .set_availability(node_id, availability)?
            .ok_or_else(|| ClusterError::UnknownNode(node_id.to_string()))
    }
}
