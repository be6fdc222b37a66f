//! Request and response bodies shared by the handlers and the client.

use serde::{Deserialize, Serialize};

use corral_cluster::{ClusterError, ErrorKind};
use corral_core::{Availability, HostStatus, Role};
use corral_state::HostState;

/// Response wrapper for consistent API format.
///
/// `code` carries the stable [`ErrorKind`] of a failure so clients can
/// rebuild the typed error.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn failure(err: &ClusterError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.detail()),
            code: Some(err.kind().as_str().to_string()),
        }
    }

    /// Turn a decoded response back into a result.
    pub fn into_result(self) -> Result<T, ClusterError> {
        if self.success {
            return self
                .data
                .ok_or_else(|| ClusterError::Remote("response carried no data".to_string()));
        }
        let detail = self.error.unwrap_or_else(|| "unknown error".to_string());
        match self.code.as_deref().map(str::parse::<ErrorKind>) {
            Some(Ok(kind)) => Err(ClusterError::from_kind(kind, detail)),
            _ => Err(ClusterError::Remote(detail)),
        }
    }
}

/// POST /api/v1/cluster/init
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitRequest {
    /// Empty means the node's own address.
    #[serde(default)]
    pub advertise: String,
}

/// POST /api/v1/cluster/join
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub token: String,
    pub role: Role,
}

/// GET /api/v1/cluster/tokens/{role}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub role: Role,
    pub token: String,
}

/// POST /api/v1/members/{node_id}/availability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    pub availability: Availability,
}

/// POST /api/v1/runtime/ensure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeReport {
    pub version: String,
    pub host: HostState,
}

/// GET /api/v1/node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub hostname: String,
    pub address: String,
    pub status: HostStatus,
    pub engine_version: Option<String>,
    pub cluster_id: Option<String>,
    pub role: Option<Role>,
    pub is_leader: bool,
}

/// Query of GET /api/v1/peer/members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembersQuery {
    pub cluster_id: String,
}
