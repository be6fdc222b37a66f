//! How the orchestrator reaches a host.

use async_trait::async_trait;

use corral_api::NodeClient;
use corral_cluster::{ClusterResult, InitOutcome, JoinOutcome, Node};
use corral_core::Role;
use corral_state::MembershipRecord;

/// The bootstrap operations of one host.
#[async_trait]
pub trait HostControl: Send + Sync {
    /// Make the runtime ready; returns its version.
    async fn ensure_runtime(&self) -> ClusterResult<String>;

    async fn initialize(&self, advertise: &str) -> ClusterResult<InitOutcome>;

    /// Encoded join token for `role`. Leader only.
    async fn token(&self, role: Role) -> ClusterResult<String>;

    async fn join(&self, token: &str, role: Role) -> ClusterResult<JoinOutcome>;

    async fn members(&self) -> ClusterResult<Vec<MembershipRecord>>;
}

#[async_trait]
impl HostControl for NodeClient {
    async fn ensure_runtime(&self) -> ClusterResult<String> {
        Ok(NodeClient::ensure_runtime(self).await?.version)
    }

    async fn initialize(&self, advertise: &str) -> ClusterResult<InitOutcome> {
        NodeClient::initialize(self, advertise).await
    }

    async fn token(&self, role: Role) -> ClusterResult<String> {
        NodeClient::token(self, role).await
    }

    async fn join(&self, token: &str, role: Role) -> ClusterResult<JoinOutcome> {
        NodeClient::join(self, token, role).await
    }

    async fn members(&self) -> ClusterResult<Vec<MembershipRecord>> {
        NodeClient::members(self).await
    }
}

#[async_trait]
impl HostControl for Node {
    async fn ensure_runtime(&self) -> ClusterResult<String> {
        Ok(Node::ensure_runtime(self).await?.version)
    }

    async fn initialize(&self, advertise: &str) -> ClusterResult<InitOutcome> {
        Node::initialize(self, advertise).await
    }

    async fn token(&self, role: Role) -> ClusterResult<String> {
        Ok(self.issue_token(role).await?.encode())
    }

    async fn join(&self, token: &str, role: Role) -> ClusterResult<JoinOutcome> {
        Node::join(self, token, role).await
    }

    async fn members(&self) -> ClusterResult<Vec<MembershipRecord>> {
        self.list_members()
    }
}
