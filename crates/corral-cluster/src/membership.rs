//! Membership manager: the leader's member table.
//!
//! Wraps the `StateStore` member table with the rules the leader applies:
//! one record per hostname, ids assigned on first admission, and the
//! display order of the cluster state view.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use corral_core::{Availability, ManagerStatus, MemberStatus, Role};
use corral_state::{MembershipRecord, StateResult, StateStore};

/// Manages the authoritative member table on the leader.
pub struct MembershipManager {
    state: StateStore,
}

impl MembershipManager {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Admit a host, or return its existing record.
    ///
    /// Returns the stored record and whether it was created by this call.
    pub fn admit(
        &self,
        hostname: &str,
        address: &str,
        role: Role,
        engine_version: &str,
    ) -> StateResult<(MembershipRecord, bool)> {
        let now = epoch_secs();
        let candidate = MembershipRecord {
            node_id: generate_node_id(),
            hostname: hostname.to_string(),
            address: address.to_string(),
            role,
            availability: Availability::Active,
            manager_status: ManagerStatus::for_joined(role),
            engine_version: engine_version.to_string(),
            joined_at: now,
            last_seen: now,
            status: MemberStatus::Ready,
        };

        let (record, created) = self.state.admit_member(&candidate)?;
        if created {
            info!(node_id = %record.node_id, %hostname, %role, "node admitted to cluster");
        } else {
            debug!(node_id = %record.node_id, %hostname, "node already a member");
        }
        Ok((record, created))
    }

    /// Remove a member. Returns true if it existed.
    pub fn remove(&self, node_id: &str) -> StateResult<bool> {
        let existed = self.state.delete_member(node_id)?;
        if existed {
            info!(%node_id, "node removed from cluster");
        }
        Ok(existed)
    }

    /// Drain or re-activate a member. `None` if the node is unknown.
    pub fn set_availability(
        &self,
        node_id: &str,
        availability: Availability,
    ) -> StateResult<Option<MembershipRecord>> {
        let Some(mut record) = self.state.get_member(node_id)? else {
            return Ok(None);
        };
        if record.availability != availability {
            record.availability = availability;
            self.state.put_member(&record)?;
            info!(%node_id, %availability, "node availability changed");
        }
        Ok(Some(record))
    }

    /// Note a check-in from a member. `None` if the node is unknown or
    /// its hostname does not match.
    pub fn touch(&self, node_id: &str, hostname: &str) -> StateResult<Option<MembershipRecord>> {
        let Some(mut record) = self.state.get_member(node_id)? else {
            return Ok(None);
        };
        if record.hostname != hostname {
            return Ok(None);
        }
        record.last_seen = epoch_secs();
        self.state.put_member(&record)?;
        Ok(Some(record))
    }

    pub fn get_member(&self, node_id: &str) -> StateResult<Option<MembershipRecord>> {
        self.state.get_member(node_id)
    }

    /// All members in view order.
    pub fn list_members(&self) -> StateResult<Vec<MembershipRecord>> {
        let mut members = self.state.list_members()?;
        sort_members(&mut members);
        Ok(members)
    }
}

/// Leader first, then managers, then workers; hostname within each group.
pub fn sort_members(members: &mut [MembershipRecord]) {
    members.sort_by(|a, b| a.view_rank().cmp(&b.view_rank()));
}

/// Stamp each record's status from its last check-in. The leader's own
/// record is always ready.
pub fn apply_liveness(members: &mut [MembershipRecord], now: u64, window: Duration) {
    for member in members.iter_mut() {
        let fresh = now.saturating_sub(member.last_seen) <= window.as_secs();
        member.status = if member.manager_status == ManagerStatus::Leader || fresh {
            MemberStatus::Ready
        } else {
            MemberStatus::Down
        };
    }
}

/// Random 25-character node id.
pub(crate) fn generate_node_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(25);
    id
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
