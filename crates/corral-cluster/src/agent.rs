//! Replica agent: member heartbeats and a non-leader manager's view.
//!
//! Runs beside the node daemon. On a fixed interval every joined member
//! sends the leader a heartbeat, and non-leader managers then pull the
//! leader's member list. The interval bounds how stale a manager's view
//! can be. Leaders and unjoined hosts idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use corral_core::Role;

use crate::error::ClusterResult;
use crate::node::Node;

/// What one refresh attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTick {
    /// The replica was replaced with this many records.
    Refreshed(usize),
    /// A worker checked in; it keeps no replica.
    Reported,
    /// This host keeps no replica right now.
    Idle,
}

/// Periodic replica refresher for one node.
pub struct ReplicaAgent {
    node: Arc<Node>,
    interval: Duration,
}

impl ReplicaAgent {
    pub fn new(node: Arc<Node>, interval: Duration) -> Self {
        Self { node, interval }
    }

    /// One heartbeat, plus a refresh if this host is a non-leader manager.
    pub async fn tick(&self) -> ClusterResult<SyncTick> {
        if self.node.is_leader()? {
            return Ok(SyncTick::Idle);
        }
        let Some(local) = self.node.local_membership()? else {
            return Ok(SyncTick::Idle);
        };
        self.node.heartbeat().await?;
        if local.record.role != Role::Manager {
            return Ok(SyncTick::Reported);
        }
        let members = self.node.sync_members().await?;
        Ok(SyncTick::Refreshed(members.len()))
    }

    /// Run the refresh loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let hostname = self.node.hostname().to_string();
        info!(%hostname, interval = ?self.interval, "replica sync loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.tick().await {
                        Ok(SyncTick::Refreshed(members)) => {
                            debug!(%hostname, members, "replica synced");
                        }
                        Ok(SyncTick::Reported | SyncTick::Idle) => {}
                        Err(e) => {
                            warn!(%hostname, error = %e, "replica sync failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!(%hostname, "replica sync loop shutting down");
                    break;
                }
            }
        }
    }
}
