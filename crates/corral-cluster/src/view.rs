//! Cluster state view: the member list as seen from a manager.
//!
//! The leader answers from its authoritative table, stamping each member
//! `ready` or `down` from its last [`Heartbeat`]. Other managers answer
//! from a replica they refresh with [`Node::sync_members`]; the daemon
//! runs the heartbeat and that refresh on a fixed interval.

use tracing::{debug, warn};

use corral_core::Role;
use corral_state::MembershipRecord;

use crate::error::{ClusterError, ClusterResult};
use crate::link::Heartbeat;
use crate::membership::{MembershipManager, apply_liveness, epoch_secs, sort_members};
use crate::node::Node;

impl Node {
    /// Members of this host's cluster, leader first.
    ///
    /// Managers only. Workers get `NotManager`; a host in no cluster gets
    /// `ClusterNotInitialized`.
    pub fn list_members(&self) -> ClusterResult<Vec<MembershipRecord>> {
        if self.state.get_cluster()?.is_some() {
            return self.leader_view();
        }
        let local = self
            .state
            .get_local_membership()?
            .ok_or(ClusterError::ClusterNotInitialized)?;
        if local.record.role != Role::Manager {
            return Err(ClusterError::NotManager);
        }
        let mut replica = self.state.list_members()?;
        sort_members(&mut replica);
        Ok(replica)
    }

    /// Refresh a non-leader manager's replica from the leader.
    ///
    /// On the leader this is a plain read. Returns the new view.
    pub async fn sync_members(&self) -> ClusterResult<Vec<MembershipRecord>> {
        if self.state.get_cluster()?.is_some() {
            return self.list_members();
        }
        let local = self
            .state
            .get_local_membership()?
            .ok_or(ClusterError::NotMember)?;
        if local.record.role != Role::Manager {
            return Err(ClusterError::NotManager);
        }

        let mut members = self.link.members(&local.leader_addr, &local.cluster_id).await?;
        sort_members(&mut members);

        // The host may have left (or rejoined elsewhere) while the pull
        // was in flight; only the membership that asked may write.
        let _guard = self.lifecycle.lock().await;
        let still_member = self.state.get_local_membership()?.is_some_and(|current| {
            current.cluster_id == local.cluster_id
                && current.record.node_id == local.record.node_id
                && current.record.role == Role::Manager
        });
        if !still_member {
            debug!(
                hostname = %self.identity.hostname,
                cluster_id = %local.cluster_id,
                "membership changed during refresh, discarding pulled members"
            );
            return Err(ClusterError::NotMember);
        }
        self.state.replace_members(&members)?;
        debug!(
            hostname = %self.identity.hostname,
            members = members.len(),
            "member replica refreshed"
        );
        Ok(members)
    }

    /// Leader side of a replica refresh.
    pub fn authoritative_members(&self, cluster_id: &str) -> ClusterResult<Vec<MembershipRecord>> {
        let cluster = self.leader_cluster()?;
        if cluster.id != cluster_id {
            return Err(ClusterError::NotMember);
        }
        self.leader_view()
    }

    /// Tell the leader this member is alive. Returns false on the leader
    /// itself, which has no one to report to.
    pub async fn heartbeat(&self) -> ClusterResult<bool> {
        if self.state.get_cluster()?.is_some() {
            return Ok(false);
        }
        let local = self
            .state
            .get_local_membership()?
            .ok_or(ClusterError::NotMember)?;
        let beat = Heartbeat {
            cluster_id: local.cluster_id.clone(),
            node_id: local.record.node_id.clone(),
            hostname: local.record.hostname.clone(),
        };
        self.link.heartbeat(&local.leader_addr, &beat).await?;
        Ok(true)
    }

    /// Leader side of a heartbeat.
    pub async fn record_heartbeat(&self, beat: &Heartbeat) -> ClusterResult<()> {
        let _guard = self.admission.lock().await;
        let cluster = self.leader_cluster()?;
        if cluster.id != beat.cluster_id {
            return Err(ClusterError::NotMember);
        }
        match MembershipManager::new(self.state.clone()).touch(&beat.node_id, &beat.hostname)? {
            Some(_) => Ok(()),
            None => {
                warn!(node_id = %beat.node_id, hostname = %beat.hostname, "heartbeat from unknown member");
                Err(ClusterError::UnknownNode(beat.node_id.clone()))
            }
        }
    }

    fn leader_view(&self) -> ClusterResult<Vec<MembershipRecord>> {
        let mut members = MembershipManager::new(self.state.clone()).list_members()?;
        apply_liveness(&mut members, epoch_secs(), self.liveness_window);
        Ok(members)
    }
}
