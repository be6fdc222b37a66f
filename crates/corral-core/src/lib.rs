//! corral-core — shared types and configuration for Corral crates.
//!
//! Holds the host inventory format consumed by the bootstrap pipeline,
//! the per-node daemon configuration, and the small role/status enums
//! every other crate speaks.

pub mod config;
pub mod duration;
pub mod types;

pub use config::{
    ClusterSettings, ConfigError, HostSpec, Inventory, NodeConfig, RetrySettings, RuntimeSettings,
};
pub use duration::parse_duration;
pub use types::*;
