//! REST API handlers.
//!
//! Each handler calls one `Node` operation and wraps the result in an
//! [`ApiResponse`]. Failures carry the error kind in `code` and map to an
//! HTTP status by class.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::debug;

use corral_cluster::{AdmitRequest, ClusterError, Heartbeat, LeaveRequest, Node};
use corral_core::Role;

use crate::ApiState;
use crate::types::*;

fn ok<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::ok(data)).into_response()
}

fn error_response(err: &ClusterError) -> Response {
    (status_for(err), Json(ApiResponse::<()>::failure(err))).into_response()
}

fn respond<T: Serialize>(result: Result<T, ClusterError>) -> Response {
    match result {
        Ok(data) => ok(data),
        Err(e) => {
            debug!(code = %e.kind(), error = %e, "request failed");
            error_response(&e)
        }
    }
}

/// HTTP status for an error class.
pub fn status_for(err: &ClusterError) -> StatusCode {
    match err {
        ClusterError::InvalidToken(_) => StatusCode::BAD_REQUEST,
        ClusterError::TokenExpiredOrRotated(_) => StatusCode::UNAUTHORIZED,
        ClusterError::RoleMismatch(_) | ClusterError::NotManager => StatusCode::FORBIDDEN,
        ClusterError::NotMember | ClusterError::UnknownNode(_) => StatusCode::NOT_FOUND,
        ClusterError::AlreadyMemberOfOtherCluster(_)
        | ClusterError::NotLeader(_)
        | ClusterError::LeaderCannotLeave => StatusCode::CONFLICT,
        ClusterError::ClusterNotInitialized => StatusCode::PRECONDITION_FAILED,
        ClusterError::UnreachableLeader(_) | ClusterError::Remote(_) => StatusCode::BAD_GATEWAY,
        ClusterError::RuntimeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ClusterError::Certificate(_) | ClusterError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Node ───────────────────────────────────────────────────────

/// GET /api/v1/node
pub async fn node_status(State(state): State<ApiState>) -> Response {
    respond(status_of(&state.node))
}

fn status_of(node: &Node) -> Result<NodeStatus, ClusterError> {
    let host = node.host_state()?;
    Ok(NodeStatus {
        hostname: host.hostname,
        address: host.address,
        status: host.status,
        engine_version: host.engine_version,
        cluster_id: node.cluster_id()?,
        role: node.role()?,
        is_leader: node.is_leader()?,
    })
}

/// POST /api/v1/runtime/ensure
pub async fn ensure_runtime(State(state): State<ApiState>) -> Response {
    let result = match state.node.ensure_runtime().await {
        Ok(info) => state.node.host_state().map(|host| RuntimeReport {
            version: info.version,
            host,
        }),
        Err(e) => Err(e),
    };
    respond(result)
}

// ── Cluster ────────────────────────────────────────────────────

/// POST /api/v1/cluster/init
pub async fn init_cluster(State(state): State<ApiState>, Json(req): Json<InitRequest>) -> Response {
    respond(state.node.initialize(&req.advertise).await)
}

/// GET /api/v1/cluster/tokens/{role}
pub async fn get_token(State(state): State<ApiState>, Path(role): Path<Role>) -> Response {
    respond(
        state
            .node
            .issue_token(role)
            .await
            .map(|t| TokenResponse { role, token: t.encode() }),
    )
}

/// POST /api/v1/cluster/tokens/{role}/rotate
pub async fn rotate_token(State(state): State<ApiState>, Path(role): Path<Role>) -> Response {
    respond(
        state
            .node
            .rotate_token(role)
            .await
            .map(|t| TokenResponse { role, token: t.encode() }),
    )
}

/// POST /api/v1/cluster/join
pub async fn join_cluster(State(state): State<ApiState>, Json(req): Json<JoinRequest>) -> Response {
    respond(state.node.join(&req.token, req.role).await)
}

/// POST /api/v1/cluster/leave
pub async fn leave_cluster(State(state): State<ApiState>) -> Response {
    respond(state.node.leave().await)
}

// ── Members ────────────────────────────────────────────────────

/// GET /api/v1/members
pub async fn list_members(State(state): State<ApiState>) -> Response {
    respond(state.node.list_members())
}

/// POST /api/v1/members/{node_id}/availability
pub async fn set_availability(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    Json(req): Json<AvailabilityRequest>,
) -> Response {
    respond(state.node.set_availability(&node_id, req.availability).await)
}

// ── Peer ───────────────────────────────────────────────────────

/// POST /api/v1/peer/admit
pub async fn peer_admit(State(state): State<ApiState>, Json(req): Json<AdmitRequest>) -> Response {
    respond(state.node.admit(&req).await)
}

/// POST /api/v1/peer/leave
pub async fn peer_leave(State(state): State<ApiState>, Json(req): Json<LeaveRequest>) -> Response {
    respond(state.node.remove_member(&req).await.map(|()| "removed"))
}

/// POST /api/v1/peer/heartbeat
pub async fn peer_heartbeat(State(state): State<ApiState>, Json(beat): Json<Heartbeat>) -> Response {
    respond(state.node.record_heartbeat(&beat).await.map(|()| "recorded"))
}

/// GET /api/v1/peer/members?cluster_id=...
pub async fn peer_members(State(state): State<ApiState>, Query(query): Query<MembersQuery>) -> Response {
    respond(state.node.authoritative_members(&query.cluster_id))
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    // Workers and unjoined hosts have no view; they still export counters.
    let members = state.node.list_members().unwrap_or_default();
    let is_leader = state.node.is_leader().unwrap_or(false);
    let body = corral_metrics::render_prometheus(&members, is_leader, &state.node.metrics().snapshot());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
