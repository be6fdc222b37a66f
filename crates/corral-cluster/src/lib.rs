//! corral-cluster — cluster bootstrap and membership for Corral.
//!
//! Turns independently provisioned hosts into one cluster: one host
//! initializes and becomes leader, the leader hands out role-scoped join
//! tokens, the remaining hosts join with them, and any manager can list
//! the members.
//!
//! # Architecture
//!
//! ```text
//! Node (one per host)
//!   ├── ensure_runtime()            ← ContainerRuntime
//!   ├── initialize(advertise)       → cluster CA, tokens, leader record
//!   ├── issue_token / rotate_token  (leader)
//!   ├── join(token, role)           → LeaderLink::admit → leader.admit()
//!   ├── list_members / sync_members → LeaderLink::members
//!   └── leave / set_availability
//!
//! ReplicaAgent
//!   └── periodic sync_members() on non-leader managers
//! ```
//!
//! Every operation is idempotent per host through markers kept in
//! `corral-state`; admissions on the leader are serialized by one lock.

pub mod agent;
pub mod broker;
pub mod error;
pub mod initializer;
pub mod joiner;
pub mod leave;
pub mod link;
pub mod membership;
pub mod node;
pub mod runtime;
pub mod tls;
pub mod token;
pub mod view;

pub use agent::{ReplicaAgent, SyncTick};
pub use error::{ClusterError, ClusterResult, ErrorKind};
pub use link::{AdmitRequest, AdmitResponse, Heartbeat, InProcessNetwork, LeaderLink, LeaveRequest};
pub use membership::{MembershipManager, sort_members};
pub use node::{ClusterHandle, InitOutcome, JoinOutcome, Node, NodeIdentity};
pub use runtime::{CommandRuntime, ContainerRuntime, RuntimeInfo, StaticRuntime};
pub use token::JoinToken;
