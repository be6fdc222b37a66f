//! Membership joiner: bring a host into an existing cluster.
//!
//! The joining side validates the token against itself first, so a bad
//! request never mutates local state. The leader side validates the token
//! against the live secrets and admits the host under the admission lock.

use tracing::{debug, info, warn};

use corral_core::{HostStatus, Role};
use corral_metrics::{AdmissionOutcome, JoinResult};
use corral_state::{HostState, LocalMembership, Marker, Operation};

use crate::error::{ClusterError, ClusterResult};
use crate::link::{AdmitRequest, AdmitResponse};
use crate::membership::{MembershipManager, epoch_secs};
use crate::node::{JoinOutcome, Node};
use crate::tls;
use crate::token::JoinToken;

impl Node {
    /// Join the cluster named by `token` with `role`.
    ///
    /// Checks run in order: token decodes, `role` matches the token scope,
    /// local policy allows `role`, markers (no-op or conflict), runtime.
    /// Only then is the leader contacted.
    pub async fn join(&self, token: &str, role: Role) -> ClusterResult<JoinOutcome> {
        let result = self.join_inner(token, role).await;
        match &result {
            Ok(JoinOutcome::Joined(_)) => self.metrics.record_join(JoinResult::Joined),
            Ok(JoinOutcome::AlreadyJoined(_)) => self.metrics.record_join(JoinResult::AlreadyJoined),
            Err(e) => {
                warn!(hostname = %self.identity.hostname, %role, error = %e, "join failed");
                self.metrics.record_join(JoinResult::Failed);
            }
        }
        result
    }

    async fn join_inner(&self, token: &str, role: Role) -> ClusterResult<JoinOutcome> {
        let token = JoinToken::decode(token)?;
        if token.role != role {
            return Err(ClusterError::RoleMismatch(format!(
                "requested role {role} but token scope is {}",
                token.scope()
            )));
        }
        if !self.identity.allows(role) {
            return Err(ClusterError::RoleMismatch(format!(
                "local policy does not allow {} to join as {role}",
                self.identity.hostname
            )));
        }

        let _guard = self.lifecycle.lock().await;
        let hostname = self.identity.hostname.clone();

        if let Some(marker) = self.state.get_marker(&hostname, Operation::Join)? {
            if marker.cluster_id != token.cluster_id {
                return Err(ClusterError::AlreadyMemberOfOtherCluster(marker.cluster_id));
            }
            let local = self.state.get_local_membership()?.ok_or(ClusterError::NotMember)?;
            debug!(%hostname, cluster_id = %marker.cluster_id, "already joined");
            return Ok(JoinOutcome::AlreadyJoined(local.record));
        }
        if let Some(marker) = self.state.get_marker(&hostname, Operation::Initialize)? {
            if marker.cluster_id != token.cluster_id {
                return Err(ClusterError::AlreadyMemberOfOtherCluster(marker.cluster_id));
            }
            let own = self
                .state
                .get_member(&marker.node_id)?
                .ok_or(ClusterError::UnknownNode(marker.node_id))?;
            if own.role != role {
                return Err(ClusterError::RoleMismatch(format!(
                    "{hostname} leads the cluster as a manager"
                )));
            }
            debug!(%hostname, "leader presented its own cluster token");
            return Ok(JoinOutcome::AlreadyJoined(own));
        }

        let runtime = self.ensure_runtime().await?;

        let request = AdmitRequest {
            token: token.encode(),
            role,
            hostname: hostname.clone(),
            address: self.identity.address.clone(),
            engine_version: runtime.version.clone(),
        };
        info!(%hostname, %role, leader = %token.leader, "requesting admission");
        let response = self.link.admit(&token.leader, &request).await?;

        if response.cluster_id != token.cluster_id
            || tls::ca_digest(&response.ca_cert_pem) != token.ca_digest
        {
            return Err(ClusterError::InvalidToken(format!(
                "leader at {} does not hold the CA named by the token",
                token.leader
            )));
        }
        if response.record.role != role || response.record.hostname != hostname {
            return Err(ClusterError::RoleMismatch(format!(
                "leader admitted {} as {}",
                response.record.hostname, response.record.role
            )));
        }

        let now = epoch_secs();
        let record = response.record.clone();
        let membership = LocalMembership {
            cluster_id: response.cluster_id.clone(),
            leader_addr: response.leader_addr.clone(),
            ca_cert_pem: response.ca_cert_pem,
            ca_digest: token.ca_digest.clone(),
            node_cert_pem: response.node_cert_pem,
            node_key_pem: response.node_key_pem,
            record: record.clone(),
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
            operation: Operation::Join,
            cluster_id: response.cluster_id,
            node_id: record.node_id.clone(),
            created_at: now,
        };
        let replica = (role == Role::Manager).then_some(response.members.as_slice());

        self.state.commit_join(&membership, &host, &marker, replica)?;

        info!(%hostname, node_id = %record.node_id, %role, "joined cluster");
        Ok(JoinOutcome::Joined(record))
    }

    /// Leader side of a join: admit the requesting host.
    ///
    /// Idempotent per hostname. A host already admitted with the same role
    /// gets its existing record back with a freshly signed certificate.
    pub async fn admit(&self, request: &AdmitRequest) -> ClusterResult<AdmitResponse> {
        let result = self.admit_inner(request).await;
        match &result {
            Ok(response) if response.created => self.metrics.record_admission(AdmissionOutcome::Admitted),
            Ok(_) => self.metrics.record_admission(AdmissionOutcome::AlreadyMember),
            Err(e) => {
                warn!(hostname = %request.hostname, role = %request.role, error = %e, "admission rejected");
                self.metrics.record_admission(AdmissionOutcome::Rejected);
            }
        }
        result
    }

    async fn admit_inner(&self, request: &AdmitRequest) -> ClusterResult<AdmitResponse> {
        let _guard = self.admission.lock().await;
        let cluster = self.leader_cluster()?;

        let token = JoinToken::decode(&request.token)?;
        if token.cluster_id != cluster.id || token.ca_digest != cluster.ca_digest {
            return Err(ClusterError::InvalidToken(
                "token was issued by a different cluster".to_string(),
            ));
        }
        if request.role != token.role {
            return Err(ClusterError::RoleMismatch(format!(
                "requested role {} but token scope is {}",
                request.role,
                token.scope()
            )));
        }
        let live = self
            .state
            .get_token(token.role)?
            .ok_or(ClusterError::ClusterNotInitialized)?;
        if live.secret != token.secret {
            return Err(ClusterError::TokenExpiredOrRotated(format!(
                "{} token was rotated (generation {})",
                token.role, live.generation
            )));
        }

        let members = MembershipManager::new(self.state.clone());
        if let Some(existing) = self.state.find_member_by_hostname(&request.hostname)? {
            if existing.role != request.role {
                return Err(ClusterError::RoleMismatch(format!(
                    "{} is already a {} in this cluster",
                    existing.hostname, existing.role
                )));
            }
        }
        let (record, created) = members.admit(
            &request.hostname,
            &request.address,
            request.role,
            &request.engine_version,
        )?;

        let node_cert = tls::generate_node_cert(
            &cluster.id,
            &cluster.ca_key_pem,
            &record.node_id,
            &[record.address.clone(), record.hostname.clone()],
        )?;

        Ok(AdmitResponse {
            cluster_id: cluster.id,
            leader_addr: cluster.advertise_addr,
            ca_cert_pem: cluster.ca_cert_pem,
            record,
            node_cert_pem: node_cert.cert_pem,
            node_key_pem: node_cert.key_pem,
            members: members.list_members()?,
            created,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use corral_core::ManagerStatus;
    use corral_metrics::CounterSnapshot;
    use corral_state::StateStore;

    use super::*;
    use crate::link::InProcessNetwork;
    use crate::node::NodeIdentity;
    use crate::runtime::StaticRuntime;

    const LEADER: &str = "10.0.0.11:2377";

    struct Fixture {
        network: Arc<InProcessNetwork>,
        leader: Arc<Node>,
    }

    impl Fixture {
        async fn new() -> Self {
            let network = Arc::new(InProcessNetwork::new());
            let leader = Arc::new(Node::new(
                NodeIdentity::new("swarm-master-1", LEADER),
                StateStore::open_in_memory().unwrap(),
                Arc::new(StaticRuntime::ready("27.1.1")),
                network.clone(),
            ));
            network.register(LEADER, &leader);
            leader.initialize(LEADER).await.unwrap();
            Self { network, leader }
        }

        fn host(&self, hostname: &str, address: &str) -> Node {
            Node::new(
                NodeIdentity::new(hostname, address),
                StateStore::open_in_memory().unwrap(),
                Arc::new(StaticRuntime::ready("27.1.1")),
                self.network.clone(),
            )
        }

        async fn token(&self, role: Role) -> String {
            self.leader.issue_token(role).await.unwrap().encode()
        }
    }

    fn counters(node: &Node) -> CounterSnapshot {
        node.metrics().snapshot()
    }

    #[tokio::test]
    async fn worker_joins_and_persists_membership() {
        let fx = Fixture::new().await;
        let worker = fx.host("swarm-worker-1", "10.0.0.21:2377");

        let outcome = worker.join(&fx.token(Role::Worker).await, Role::Worker).await.unwrap();
        assert!(!outcome.is_noop());
        let record = outcome.record();
        assert_eq!(record.role, Role::Worker);
        assert_eq!(record.manager_status, ManagerStatus::NotApplicable);

        let local = worker.local_membership().unwrap().unwrap();
        assert_eq!(local.record, *record);
        assert!(local.node_cert_pem.contains("BEGIN CERTIFICATE"));
        assert_eq!(worker.host_state().unwrap().status, HostStatus::ClusterMember);
        // Workers keep no replica.
        assert!(worker.state().list_members().unwrap().is_empty());

        assert_eq!(fx.leader.state().list_members().unwrap().len(), 2);
        assert_eq!(counters(&fx.leader).admissions_for(AdmissionOutcome::Admitted), 1);
        assert_eq!(counters(&worker).joins_for(JoinResult::Joined), 1);
    }

    #[tokio::test]
    async fn manager_join_carries_replica() {
        let fx = Fixture::new().await;
        let manager = fx.host("swarm-master-2", "10.0.0.12:2377");
        manager.join(&fx.token(Role::Manager).await, Role::Manager).await.unwrap();

        let replica = manager.state().list_members().unwrap();
        assert_eq!(replica.len(), 2);
    }

    #[tokio::test]
    async fn repeated_join_is_a_noop() {
        let fx = Fixture::new().await;
        let worker = fx.host("swarm-worker-1", "10.0.0.21:2377");
        let token = fx.token(Role::Worker).await;

        let first = worker.join(&token, Role::Worker).await.unwrap();
        let second = worker.join(&token, Role::Worker).await.unwrap();

        assert!(second.is_noop());
        assert_eq!(first.record(), second.record());
        assert_eq!(fx.leader.state().list_members().unwrap().len(), 2);
        // The leader was not asked again.
        assert_eq!(counters(&fx.leader).admissions_for(AdmissionOutcome::Admitted), 1);
        assert_eq!(counters(&fx.leader).admissions_for(AdmissionOutcome::AlreadyMember), 0);
    }

    #[tokio::test]
    async fn scope_mismatch_fails_before_any_mutation() {
        let fx = Fixture::new().await;
        let host = fx.host("swarm-worker-1", "10.0.0.21:2377");

        let err = host
            .join(&fx.token(Role::Manager).await, Role::Worker)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::RoleMismatch(_)));

        let err = host
            .join(&fx.token(Role::Worker).await, Role::Manager)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::RoleMismatch(_)));

        assert!(host.state().get_host_state().unwrap().is_none());
        assert!(host.local_membership().unwrap().is_none());
        assert_eq!(fx.leader.state().list_members().unwrap().len(), 1);
        assert_eq!(counters(&host).joins_for(JoinResult::Failed), 2);
    }

    #[tokio::test]
    async fn local_policy_rejects_disallowed_role() {
        let fx = Fixture::new().await;
        let host = Node::new(
            NodeIdentity::new("swarm-worker-1", "10.0.0.21:2377").with_allowed_roles(vec![Role::Worker]),
            StateStore::open_in_memory().unwrap(),
            Arc::new(StaticRuntime::ready("27.1.1")),
            fx.network.clone(),
        );
        let err = host
            .join(&fx.token(Role::Manager).await, Role::Manager)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::RoleMismatch(_)));
    }

    #[tokio::test]
    async fn runtime_must_be_up() {
        let fx = Fixture::new().await;
        let host = Node::new(
            NodeIdentity::new("swarm-worker-1", "10.0.0.21:2377"),
            StateStore::open_in_memory().unwrap(),
            Arc::new(StaticRuntime::unavailable()),
            fx.network.clone(),
        );
        let err = host.join(&fx.token(Role::Worker).await, Role::Worker).await.unwrap_err();
        assert!(matches!(err, ClusterError::RuntimeUnavailable(_)));
        assert_eq!(fx.leader.state().list_members().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rotated_token_is_refused() {
        let fx = Fixture::new().await;
        let stale = fx.token(Role::Worker).await;
        fx.leader.rotate_token(Role::Worker).await.unwrap();

        let host = fx.host("swarm-worker-1", "10.0.0.21:2377");
        let err = host.join(&stale, Role::Worker).await.unwrap_err();
        assert!(matches!(err, ClusterError::TokenExpiredOrRotated(_)));
        assert!(err.is_retryable());
        assert_eq!(counters(&fx.leader).admissions_for(AdmissionOutcome::Rejected), 1);

        let fresh = fx.token(Role::Worker).await;
        assert!(host.join(&fresh, Role::Worker).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_leader_is_retryable_and_leaves_no_state() {
        let fx = Fixture::new().await;
        let token = fx.token(Role::Worker).await;
        fx.network.set_reachable(LEADER, false);

        let host = fx.host("swarm-worker-1", "10.0.0.21:2377");
        let err = host.join(&token, Role::Worker).await.unwrap_err();
        assert!(matches!(err, ClusterError::UnreachableLeader(_)));
        assert!(host.local_membership().unwrap().is_none());
        assert!(host.state().get_marker("swarm-worker-1", Operation::Join).unwrap().is_none());

        fx.network.set_reachable(LEADER, true);
        assert!(host.join(&token, Role::Worker).await.is_ok());
    }

    #[tokio::test]
    async fn leader_presenting_own_manager_token_is_noop() {
        let fx = Fixture::new().await;
        let outcome = fx
            .leader
            .join(&fx.token(Role::Manager).await, Role::Manager)
            .await
            .unwrap();
        assert!(outcome.is_noop());
        assert_eq!(outcome.record().manager_status, ManagerStatus::Leader);
    }

    #[tokio::test]
    async fn token_of_another_cluster_conflicts_with_membership() {
        let fx = Fixture::new().await;
        let other = Fixture::new().await;
        let worker = fx.host("swarm-worker-1", "10.0.0.21:2377");
        worker.join(&fx.token(Role::Worker).await, Role::Worker).await.unwrap();

        let err = worker
            .join(&other.token(Role::Worker).await, Role::Worker)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyMemberOfOtherCluster(_)));
    }

    #[tokio::test]
    async fn admit_rejects_foreign_cluster_token() {
        let fx = Fixture::new().await;
        let other = Fixture::new().await;
        let request = AdmitRequest {
            token: other.token(Role::Worker).await,
            role: Role::Worker,
            hostname: "swarm-worker-1".into(),
            address: "10.0.0.21:2377".into(),
            engine_version: "27.1.1".into(),
        };
        let err = fx.leader.admit(&request).await.unwrap_err();
        assert!(matches!(err, ClusterError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn admit_refuses_role_change_for_known_host() {
        let fx = Fixture::new().await;
        let worker = fx.host("swarm-worker-1", "10.0.0.21:2377");
        worker.join(&fx.token(Role::Worker).await, Role::Worker).await.unwrap();

        let request = AdmitRequest {
            token: fx.token(Role::Manager).await,
            role: Role::Manager,
            hostname: "swarm-worker-1".into(),
            address: "10.0.0.21:2377".into(),
            engine_version: "27.1.1".into(),
        };
        let err = fx.leader.admit(&request).await.unwrap_err();
        assert!(matches!(err, ClusterError::RoleMismatch(_)));
    }

    #[tokio::test]
    async fn admit_on_non_leader_is_refused() {
        let fx = Fixture::new().await;
        let manager = fx.host("swarm-master-2", "10.0.0.12:2377");
        manager.join(&fx.token(Role::Manager).await, Role::Manager).await.unwrap();

        let request = AdmitRequest {
            token: fx.token(Role::Worker).await,
            role: Role::Worker,
            hostname: "swarm-worker-1".into(),
            address: "10.0.0.21:2377".into(),
            engine_version: "27.1.1".into(),
        };
        let err = manager.admit(&request).await.unwrap_err();
        assert!(matches!(err, ClusterError::NotLeader(_)));
    }
}
