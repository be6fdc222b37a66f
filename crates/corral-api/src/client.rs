//! HTTP client for node daemons.
//!
//! One TCP connection and HTTP/1 handshake per request, the same way the
//! health prober talks to instances. A daemon that cannot be contacted, or
//! does not answer within the timeout, is reported as
//! [`ClusterError::UnreachableLeader`]; errors the daemon returns come back
//! as their original variant through the `code` field.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use corral_cluster::{
    AdmitRequest, AdmitResponse, ClusterError, ClusterResult, Heartbeat, InitOutcome, JoinOutcome,
    LeaderLink, LeaveRequest,
};
use corral_core::{Availability, Role};
use corral_state::MembershipRecord;

use crate::types::*;

const USER_AGENT: &str = concat!("corral/", env!("CARGO_PKG_VERSION"));

/// Client for one node daemon's API.
#[derive(Debug, Clone)]
pub struct NodeClient {
    /// `host:port` of the daemon.
    endpoint: String,
    timeout: Duration,
}

impl NodeClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        let endpoint = endpoint
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        Self {
            endpoint,
            timeout: Duration::from_secs(15),
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn status(&self) -> ClusterResult<NodeStatus> {
        self.get("/api/v1/node").await
    }

    pub async fn ensure_runtime(&self) -> ClusterResult<RuntimeReport> {
        self.post("/api/v1/runtime/ensure", &()).await
    }

    pub async fn initialize(&self, advertise: &str) -> ClusterResult<InitOutcome> {
        let req = InitRequest {
            advertise: advertise.to_string(),
        };
        self.post("/api/v1/cluster/init", &req).await
    }

    /// Current join token for `role`, encoded.
    pub async fn token(&self, role: Role) -> ClusterResult<String> {
        let resp: TokenResponse = self.get(&format!("/api/v1/cluster/tokens/{role}")).await?;
        Ok(resp.token)
    }

    pub async fn rotate_token(&self, role: Role) -> ClusterResult<String> {
        let resp: TokenResponse = self
            .post(&format!("/api/v1/cluster/tokens/{role}/rotate"), &())
            .await?;
        Ok(resp.token)
    }

    pub async fn join(&self, token: &str, role: Role) -> ClusterResult<JoinOutcome> {
        let req = JoinRequest {
            token: token.to_string(),
            role,
        };
        self.post("/api/v1/cluster/join", &req).await
    }

    pub async fn leave(&self) -> ClusterResult<MembershipRecord> {
        self.post("/api/v1/cluster/leave", &()).await
    }

    pub async fn members(&self) -> ClusterResult<Vec<MembershipRecord>> {
        self.get("/api/v1/members").await
    }

    pub async fn set_availability(
        &self,
        node_id: &str,
        availability: Availability,
    ) -> ClusterResult<MembershipRecord> {
        self.post(
            &format!("/api/v1/members/{node_id}/availability"),
            &AvailabilityRequest { availability },
        )
        .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClusterResult<T> {
        self.send("GET", path, Bytes::new()).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ClusterResult<T> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ClusterError::Remote(format!("cannot encode request: {e}")))?;
        self.send("POST", path, Bytes::from(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, method: &str, path: &str, body: Bytes) -> ClusterResult<T> {
        let endpoint = self.endpoint.as_str();
        let exchange = async {
            let stream = tokio::net::TcpStream::connect(endpoint).await.map_err(|e| {
                debug!(error = %e, %endpoint, "connection failed");
                ClusterError::UnreachableLeader(endpoint.to_string())
            })?;

            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.map_err(|e| {
                debug!(error = %e, %endpoint, "handshake failed");
                ClusterError::UnreachableLeader(endpoint.to_string())
            })?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method(method)
                .uri(format!("http://{endpoint}{path}"))
                .header("host", endpoint)
                .header("user-agent", USER_AGENT)
                .header("content-type", "application/json")
                .body(Full::new(body))
                .map_err(|e| ClusterError::Remote(format!("invalid request: {e}")))?;

            let resp = sender.send_request(req).await.map_err(|e| {
                debug!(error = %e, %endpoint, %path, "request failed");
                ClusterError::UnreachableLeader(endpoint.to_string())
            })?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| ClusterError::Remote(format!("reading response from {endpoint}: {e}")))?
                .to_bytes();

            let decoded: ApiResponse<T> = serde_json::from_slice(&bytes).map_err(|e| {
                ClusterError::Remote(format!("{method} {path} on {endpoint} returned {status}: {e}"))
            })?;
            decoded.into_result()
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%endpoint, %path, "request timed out");
                Err(ClusterError::UnreachableLeader(format!(
                    "{endpoint} (timed out after {:?})",
                    self.timeout
                )))
            }
        }
    }
}

/// [`LeaderLink`] over the leader's peer endpoints.
#[derive(Debug, Clone)]
pub struct HttpLeaderLink {
    timeout: Duration,
}

impl HttpLeaderLink {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(&self, leader: &str) -> NodeClient {
        NodeClient::new(leader).with_timeout(self.timeout)
    }
}

impl Default for HttpLeaderLink {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

#[async_trait]
impl LeaderLink for HttpLeaderLink {
    async fn admit(&self, leader: &str, request: &AdmitRequest) -> ClusterResult<AdmitResponse> {
        self.client(leader).post("/api/v1/peer/admit", request).await
    }

    async fn leave(&self, leader: &str, request: &LeaveRequest) -> ClusterResult<()> {
        let _: String = self.client(leader).post("/api/v1/peer/leave", request).await?;
        Ok(())
    }

    async fn members(&self, leader: &str, cluster_id: &str) -> ClusterResult<Vec<MembershipRecord>> {
        self.client(leader)
            .get(&format!("/api/v1/peer/members?cluster_id={cluster_id}"))
            .await
    }

    async fn heartbeat(&self, leader: &str, beat: &Heartbeat) -> ClusterResult<()> {
        let _: String = self.client(leader).post("/api/v1/peer/heartbeat", beat).await?;
        Ok(())
    }
}
