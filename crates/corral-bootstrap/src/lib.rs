//! corral-bootstrap — turn an inventory of hosts into one cluster.
//!
//! The pipeline fans out runtime readiness to every host, initializes the
//! cluster on the leader behind a barrier, then fans out joins with the
//! role-appropriate token. Every network step is retried with bounded
//! exponential backoff, and one host failing never stops the others.
//!
//! # Architecture
//!
//! ```text
//! Pipeline::run
//!   ├── leader:    ensure_runtime → initialize → tokens → barrier Ready
//!   ├── followers: ensure_runtime → wait barrier → join (per host, JoinSet)
//!   └── await_members → leader view lists every joined host
//! ```
//!
//! Hosts are driven through [`HostControl`]: over HTTP against each node
//! daemon, or directly against in-process nodes.

pub mod control;
pub mod pipeline;
pub mod report;
pub mod retry;

pub use control::HostControl;
pub use pipeline::{Pipeline, await_members};
pub use report::{BootstrapReport, HostOutcome, HostReport};
pub use retry::{RetryPolicy, StepError};
