//! corral-metrics — observability for Corral nodes.
//!
//! Counts admission and join outcomes on a node and renders them, together
//! with gauges derived from the member table, in the Prometheus text
//! exposition format.
//!
//! # Architecture
//!
//! ```text
//! ClusterMetrics
//!   ├── record_admission() ← leader, per admit request
//!   ├── record_join()      ← joining host, per join attempt
//!   └── snapshot()         → CounterSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for the /metrics endpoint
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{AdmissionOutcome, ClusterMetrics, CounterSnapshot, JoinResult};
pub use prometheus::render_prometheus;
