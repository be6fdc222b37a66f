//! corral-api — the node daemon's HTTP surface.
//!
//! Provides axum route handlers for the bootstrap operations of one node,
//! the peer endpoints other nodes call on the leader, and the Prometheus
//! exposition. [`client`] holds the matching hyper client and the HTTP
//! [`LeaderLink`](corral_cluster::LeaderLink).
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/node` | Host status and cluster role |
//! | POST | `/api/v1/runtime/ensure` | Make the container runtime ready |
//! | POST | `/api/v1/cluster/init` | Initialize a cluster on this node |
//! | GET | `/api/v1/cluster/tokens/{role}` | Current join token (leader) |
//! | POST | `/api/v1/cluster/tokens/{role}/rotate` | Rotate a join token (leader) |
//! | POST | `/api/v1/cluster/join` | Join a cluster with a token |
//! | POST | `/api/v1/cluster/leave` | Leave the cluster |
//! | GET | `/api/v1/members` | Cluster state view (managers) |
//! | POST | `/api/v1/members/{node_id}/availability` | Drain or activate (leader) |
//! | POST | `/api/v1/peer/admit` | Admission request (leader) |
//! | POST | `/api/v1/peer/leave` | Member removal request (leader) |
//! | POST | `/api/v1/peer/heartbeat` | Member liveness check-in (leader) |
//! | GET | `/api/v1/peer/members` | Authoritative member list (leader) |
//! | GET | `/metrics` | Prometheus exposition |

pub mod client;
pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use corral_cluster::Node;

pub use client::{HttpLeaderLink, NodeClient};
pub use types::*;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<Node>,
}

/// Build the complete API router (REST + peer + metrics).
pub fn build_router(node: Arc<Node>) -> Router {
    let api_state = ApiState { node };

    let api_routes = Router::new()
        .route("/node", get(handlers::node_status))
        .route("/runtime/ensure", post(handlers::ensure_runtime))
        .route("/cluster/init", post(handlers::init_cluster))
        .route("/cluster/tokens/{role}", get(handlers::get_token))
        .route("/cluster/tokens/{role}/rotate", post(handlers::rotate_token))
        .route("/cluster/join", post(handlers::join_cluster))
        .route("/cluster/leave", post(handlers::leave_cluster))
        .route("/members", get(handlers::list_members))
        .route("/members/{node_id}/availability", post(handlers::set_availability))
        .route("/peer/admit", post(handlers::peer_admit))
        .route("/peer/leave", post(handlers::peer_leave))
        .route("/peer/heartbeat", post(handlers::peer_heartbeat))
        .route("/peer/members", get(handlers::peer_members))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
}
