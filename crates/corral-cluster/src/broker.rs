//! Credential broker: hand out and rotate the two join tokens.

use tracing::{debug, info};

use corral_core::Role;
use corral_state::{ClusterRecord, TokenRecord};

use crate::error::{ClusterError, ClusterResult};
use crate::membership::epoch_secs;
use crate::node::Node;
use crate::token::{JoinToken, generate_secret};

impl Node {
    /// Current join token for `role`. Leader only.
    ///
    /// Stable across calls until [`Node::rotate_token`] replaces it.
    pub async fn issue_token(&self, role: Role) -> ClusterResult<JoinToken> {
        let cluster = self.leader_cluster()?;
        let record = self
            .state
            .get_token(role)?
            .ok_or(ClusterError::ClusterNotInitialized)?;
        debug!(%role, generation = record.generation, "join token issued");
        Ok(token_for(&cluster, &record))
    }

    /// Replace the secret for `role`. Leader only.
    ///
    /// Tokens issued earlier for this role stop admitting hosts. The other
    /// role's token is untouched.
    pub async fn rotate_token(&self, role: Role) -> ClusterResult<JoinToken> {
        let _guard = self.admission.lock().await;
        let cluster = self.leader_cluster()?;
        let previous = self
            .state
            .get_token(role)?
            .ok_or(ClusterError::ClusterNotInitialized)?;

        let record = TokenRecord {
            role,
            secret: generate_secret(),
            generation: previous.generation + 1,
            issued_at: epoch_secs(),
        };
        self.state.put_token(&record)?;

        info!(%role, generation = record.generation, "join token rotated");
        Ok(token_for(&cluster, &record))
    }
}

fn token_for(cluster: &ClusterRecord, record: &TokenRecord) -> JoinToken {
    JoinToken {
        cluster_id: cluster.id.clone(),
        role: record.role,
        leader: cluster.advertise_addr.clone(),
        ca_digest: cluster.ca_digest.clone(),
        secret: record.secret.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use corral_state::StateStore;

    use super::*;
    use crate::link::InProcessNetwork;
    use crate::node::NodeIdentity;
    use crate::runtime::StaticRuntime;

    fn node() -> Node {
        Node::new(
            NodeIdentity::new("swarm-master-1", "10.0.0.11:2377"),
            StateStore::open_in_memory().unwrap(),
            Arc::new(StaticRuntime::ready("27.1.1")),
            Arc::new(InProcessNetwork::new()),
        )
    }

    #[tokio::test]
    async fn tokens_require_a_cluster() {
        let node = node();
        let err = node.issue_token(Role::Worker).await.unwrap_err();
        assert!(matches!(err, ClusterError::ClusterNotInitialized));
    }

    #[tokio::test]
    async fn tokens_are_stable_and_role_scoped() {
        let node = node();
        let handle = node.initialize("10.0.0.11:2377").await.unwrap();

        let manager = node.issue_token(Role::Manager).await.unwrap();
        let worker = node.issue_token(Role::Worker).await.unwrap();

        assert_eq!(manager, node.issue_token(Role::Manager).await.unwrap());
        assert_ne!(manager.secret, worker.secret);
        assert_eq!(manager.scope(), "manager-join");
        assert_eq!(worker.scope(), "worker-join");
        assert_eq!(worker.cluster_id, handle.handle().cluster_id);
        assert_eq!(worker.leader, "10.0.0.11:2377");
        assert_eq!(worker.ca_digest, handle.handle().ca_digest);
    }

    #[tokio::test]
    async fn rotation_touches_one_role_only() {
        let node = node();
        node.initialize("10.0.0.11:2377").await.unwrap();

        let worker_before = node.issue_token(Role::Worker).await.unwrap();
        let manager_before = node.issue_token(Role::Manager).await.unwrap();

        let rotated = node.rotate_token(Role::Worker).await.unwrap();

        assert_ne!(rotated.secret, worker_before.secret);
        assert_eq!(node.issue_token(Role::Worker).await.unwrap(), rotated);
        assert_eq!(node.issue_token(Role::Manager).await.unwrap(), manager_before);
        assert_eq!(node.state().get_token(Role::Worker).unwrap().unwrap().generation, 2);
    }
}
