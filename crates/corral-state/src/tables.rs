//! redb table definitions for the Corral state store.
//!
//! Every table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// The cluster this node leads, under the single key [`CLUSTER_KEY`].
pub const CLUSTER: TableDefinition<&str, &[u8]> = TableDefinition::new("cluster");

/// Live join tokens keyed by role name (`manager`, `worker`).
pub const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");

/// Membership records keyed by `{node_id}`.
pub const MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("members");

/// Idempotency markers keyed by `{hostname}/{operation}`.
pub const MARKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("markers");

/// This host's provisioning state and membership, keyed by
/// [`HOST_KEY`] and [`LOCAL_MEMBERSHIP_KEY`].
pub const LOCAL: TableDefinition<&str, &[u8]> = TableDefinition::new("local");

pub const CLUSTER_KEY: &str = "cluster";
pub const HOST_KEY: &str = "host";
pub const LOCAL_MEMBERSHIP_KEY: &str = "membership";
