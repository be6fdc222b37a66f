//! corral-state — durable per-host state for Corral nodes.
//!
//! Backed by [redb](https://docs.rs/redb). Each node daemon keeps one
//! database holding the cluster record (leader only), the live join
//! tokens, the member table (authoritative on the leader, a replica on
//! other managers), the host's own membership, and idempotency markers.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Markers use the composite key `{hostname}/{operation}` so the guard for
//! a given (host, operation) pair is a single point lookup.
//!
//! Multi-record mutations (initialize, join, replica refresh) commit in a
//! single write transaction, so a crash never leaves half a membership.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
