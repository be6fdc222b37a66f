//! StateStore: redb-backed state persistence for a Corral node.
//!
//! Provides typed operations over the cluster record, join tokens,
//! membership records, idempotency markers and the host's own state. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use corral_core::Role;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [CLUSTER, TOKENS, MEMBERS, MARKERS, LOCAL] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, table: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        insert_json(&txn, table, key, value)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn remove_key(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed = remove_in(&txn, table, key)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Cluster ────────────────────────────────────────────────────

    /// The cluster this node leads, if any.
    pub fn get_cluster(&self) -> StateResult<Option<ClusterRecord>> {
        self.get_json(CLUSTER, CLUSTER_KEY)
    }

    // ── Tokens ─────────────────────────────────────────────────────

    /// Live token record for a role.
    pub fn get_token(&self, role: Role) -> StateResult<Option<TokenRecord>> {
        self.get_json(TOKENS, role.as_str())
    }

    /// Replace the token record for its role.
    pub fn put_token(&self, token: &TokenRecord) -> StateResult<()> {
        self.put_json(TOKENS, token.role.as_str(), token)?;
        debug!(role = %token.role, generation = token.generation, "token stored");
        Ok(())
    }

    // ── Members ────────────────────────────────────────────────────

    /// Insert or update a membership record.
    pub fn put_member(&self, record: &MembershipRecord) -> StateResult<()> {
        self.put_json(MEMBERS, &record.node_id, record)
    }

    /// Get a membership record by node ID.
    pub fn get_member(&self, node_id: &str) -> StateResult<Option<MembershipRecord>> {
        self.get_json(MEMBERS, node_id)
    }

    /// Find the membership record registered for a hostname.
    pub fn find_member_by_hostname(&self, hostname: &str) -> StateResult<Option<MembershipRecord>> {
        Ok(self
            .list_members()?
            .into_iter()
            .find(|m| m.hostname == hostname))
    }

    /// List all membership records.
    pub fn list_members(&self) -> StateResult<Vec<MembershipRecord>> {
        self.list_json(MEMBERS)
    }

    /// Delete a membership record. Returns true if it existed.
    pub fn delete_member(&self, node_id: &str) -> StateResult<bool> {
        let existed = self.remove_key(MEMBERS, node_id)?;
        debug!(%node_id, existed, "member deleted");
        Ok(existed)
    }

    /// Insert `record` unless a member with the same hostname exists.
    ///
    /// Returns the stored record and whether it was newly created. The
    /// lookup and insert share one write transaction.
    pub fn admit_member(&self, record: &MembershipRecord) -> StateResult<(MembershipRecord, bool)> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existing = {
            let table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            let mut found = None;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let member: MembershipRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if member.hostname == record.hostname {
                    found = Some(member);
                    break;
                }
            }
            found
        };

        if let Some(member) = existing {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok((member, false));
        }

        insert_json(&txn, MEMBERS, &record.node_id, record)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(node_id = %record.node_id, hostname = %record.hostname, "member admitted");
        Ok((record.clone(), true))
    }

    /// Replace the whole member table with `records`.
    pub fn replace_members(&self, records: &[MembershipRecord]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        replace_members_in(&txn, records)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = records.len(), "member table replaced");
        Ok(())
    }

    // ── Markers ────────────────────────────────────────────────────

    /// Get the marker for a (host, operation) pair.
    pub fn get_marker(&self, hostname: &str, operation: Operation) -> StateResult<Option<Marker>> {
        self.get_json(MARKERS, &marker_key(hostname, operation))
    }

    /// Store a marker on its own.
    pub fn put_marker(&self, marker: &Marker) -> StateResult<()> {
        self.put_json(MARKERS, &marker.table_key(), marker)
    }

    // ── Local host ─────────────────────────────────────────────────

    pub fn get_host_state(&self) -> StateResult<Option<HostState>> {
        self.get_json(LOCAL, HOST_KEY)
    }

    pub fn put_host_state(&self, state: &HostState) -> StateResult<()> {
        self.put_json(LOCAL, HOST_KEY, state)?;
        debug!(hostname = %state.hostname, status = %state.status, "host state stored");
        Ok(())
    }

    pub fn get_local_membership(&self) -> StateResult<Option<LocalMembership>> {
        self.get_json(LOCAL, LOCAL_MEMBERSHIP_KEY)
    }

    // ── Atomic multi-record commits ───────────────────────────────

    /// Persist a freshly created cluster in one transaction: cluster
    /// record, both tokens, host state, the `initialize` marker and a member
    /// table holding only the leader's own record.
    pub fn commit_initialize(
        &self,
        cluster: &ClusterRecord,
        tokens: &[TokenRecord],
        leader: &MembershipRecord,
        host: &HostState,
        marker: &Marker,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        insert_json(&txn, CLUSTER, CLUSTER_KEY, cluster)?;
        for token in tokens {
            insert_json(&txn, TOKENS, token.role.as_str(), token)?;
        }
        replace_members_in(&txn, std::slice::from_ref(leader))?;
        insert_json(&txn, LOCAL, HOST_KEY, host)?;
        insert_json(&txn, MARKERS, &marker.table_key(), marker)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = %cluster.id, "cluster initialization committed");
        Ok(())
    }

    /// Persist a successful join in one transaction: local membership,
    /// host state, the `join` marker and, for managers, the member replica.
    pub fn commit_join(
        &self,
        membership: &LocalMembership,
        host: &HostState,
        marker: &Marker,
        replica: Option<&[MembershipRecord]>,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        insert_json(&txn, LOCAL, LOCAL_MEMBERSHIP_KEY, membership)?;
        insert_json(&txn, LOCAL, HOST_KEY, host)?;
        insert_json(&txn, MARKERS, &marker.table_key(), marker)?;
        if let Some(records) = replica {
            replace_members_in(&txn, records)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = %membership.cluster_id, node_id = %membership.record.node_id, "join committed");
        Ok(())
    }

    /// Drop this host's membership: local membership, `join` marker and
    /// member replica. Host state falls back to `runtime-ready`.
    pub fn commit_leave(&self, host: &HostState) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        remove_in(&txn, LOCAL, LOCAL_MEMBERSHIP_KEY)?;
        remove_in(&txn, MARKERS, &marker_key(&host.hostname, Operation::Join))?;
        replace_members_in(&txn, &[])?;
        insert_json(&txn, LOCAL, HOST_KEY, host)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(hostname = %host.hostname, "leave committed");
        Ok(())
    }
}

fn insert_json<T: Serialize>(
    txn: &WriteTransaction,
    table: JsonTable,
    key: &str,
    value: &T,
) -> StateResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    let mut table = txn.open_table(table).map_err(map_err!(Table))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn remove_in(txn: &WriteTransaction, table: JsonTable, key: &str) -> StateResult<bool> {
    let mut table = txn.open_table(table).map_err(map_err!(Table))?;
    let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
    Ok(existed)
}

fn replace_members_in(txn: &WriteTransaction, records: &[MembershipRecord]) -> StateResult<()> {
    let mut table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
    let keys: Vec<String> = table
        .iter()
        .map_err(map_err!(Read))?
        .filter_map(|entry| {
            let (key, _) = entry.ok()?;
            Some(key.value().to_string())
        })
        .collect();
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    for record in records {
        let bytes = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        table
            .insert(record.node_id.as_str(), bytes.as_slice())
            .map_err(map_err!(Write))?;
    }
    Ok(())
}
