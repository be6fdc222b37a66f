//! Serve mode: one node's API plus its replica sync loop.
//!
//! In this mode, the daemon:
//! 1. Opens the host's state store
//! 2. Builds the node around the runtime probe and the HTTP leader link
//! 3. Runs the replica sync loop in the background
//! 4. Serves the REST, peer and metrics routes until Ctrl-C

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use corral_api::{HttpLeaderLink, build_router};
use corral_cluster::{CommandRuntime, Node, NodeIdentity, ReplicaAgent};
use corral_core::NodeConfig;
use corral_state::StateStore;

pub async fn run(config: NodeConfig) -> anyhow::Result<()> {
    info!(hostname = %config.hostname, advertise = %config.advertise_addr(), "corral daemon starting");
    let sync_interval = config.sync_interval()?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let db_path = config.data_dir.join("corral.redb");
    let state = StateStore::open(&db_path)
        .with_context(|| format!("opening state store {}", db_path.display()))?;
    info!(path = ?db_path, "state store opened");

    // ── Node ───────────────────────────────────────────────────
    let identity = NodeIdentity::new(config.hostname.clone(), config.advertise_addr())
        .with_allowed_roles(config.allowed_roles.clone());
    let runtime = Arc::new(CommandRuntime::new(&config.runtime));
    let link = Arc::new(HttpLeaderLink::default());
    // A member is down once it has missed three heartbeats.
    let node = Arc::new(
        Node::new(identity, state, runtime, link).with_liveness_window(sync_interval * 3),
    );

    if let Some(local) = node.local_membership()? {
        info!(
            cluster_id = %local.cluster_id,
            role = %local.record.role,
            leader = %local.leader_addr,
            "resuming cluster membership"
        );
    }

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let agent = ReplicaAgent::new(node.clone(), sync_interval);
    let agent_handle = tokio::spawn(async move {
        agent.run(shutdown_rx).await;
    });

    // ── API server ─────────────────────────────────────────────
    let router = build_router(node);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C, running until killed");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = agent_handle.await;
    info!("corral daemon stopped");
    Ok(())
}
