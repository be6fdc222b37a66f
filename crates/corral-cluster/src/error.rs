//! Error taxonomy for bootstrap and membership operations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use corral_state::StateError;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors raised by the initializer, broker, joiner and state view.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("host is already a member of cluster {0}")]
    AlreadyMemberOfOtherCluster(String),

    #[error("not the cluster leader: {0}")]
    NotLeader(String),

    #[error("no cluster has been initialized on this host")]
    ClusterNotInitialized,

    #[error("join token expired or rotated: {0}")]
    TokenExpiredOrRotated(String),

    #[error("leader unreachable at {0}")]
    UnreachableLeader(String),

    #[error("role mismatch: {0}")]
    RoleMismatch(String),

    #[error("operation requires a manager node")]
    NotManager,

    #[error("invalid join token: {0}")]
    InvalidToken(String),

    #[error("host is not a cluster member")]
    NotMember,

    #[error("the leader cannot leave the cluster it leads")]
    LeaderCannotLeave,

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Stable, wire-safe name of a [`ClusterError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RuntimeUnavailable,
    AlreadyMemberOfOtherCluster,
    NotLeader,
    ClusterNotInitialized,
    TokenExpiredOrRotated,
    UnreachableLeader,
    RoleMismatch,
    NotManager,
    InvalidToken,
    NotMember,
    LeaderCannotLeave,
    UnknownNode,
    Certificate,
    Remote,
    State,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RuntimeUnavailable => "runtime_unavailable",
            ErrorKind::AlreadyMemberOfOtherCluster => "already_member_of_other_cluster",
            ErrorKind::NotLeader => "not_leader",
            ErrorKind::ClusterNotInitialized => "cluster_not_initialized",
            ErrorKind::TokenExpiredOrRotated => "token_expired_or_rotated",
            ErrorKind::UnreachableLeader => "unreachable_leader",
            ErrorKind::RoleMismatch => "role_mismatch",
            ErrorKind::NotManager => "not_manager",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::NotMember => "not_member",
            ErrorKind::LeaderCannotLeave => "leader_cannot_leave",
            ErrorKind::UnknownNode => "unknown_node",
            ErrorKind::Certificate => "certificate",
            ErrorKind::Remote => "remote",
            ErrorKind::State => "state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown error kind '{s}'"))
    }
}

impl ClusterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            ClusterError::AlreadyMemberOfOtherCluster(_) => ErrorKind::AlreadyMemberOfOtherCluster,
            ClusterError::NotLeader(_) => ErrorKind::NotLeader,
            ClusterError::ClusterNotInitialized => ErrorKind::ClusterNotInitialized,
            ClusterError::TokenExpiredOrRotated(_) => ErrorKind::TokenExpiredOrRotated,
            ClusterError::UnreachableLeader(_) => ErrorKind::UnreachableLeader,
            ClusterError::RoleMismatch(_) => ErrorKind::RoleMismatch,
            ClusterError::NotManager => ErrorKind::NotManager,
            ClusterError::InvalidToken(_) => ErrorKind::InvalidToken,
            ClusterError::NotMember => ErrorKind::NotMember,
            ClusterError::LeaderCannotLeave => ErrorKind::LeaderCannotLeave,
            ClusterError::UnknownNode(_) => ErrorKind::UnknownNode,
            ClusterError::Certificate(_) => ErrorKind::Certificate,
            ClusterError::Remote(_) => ErrorKind::Remote,
            ClusterError::State(_) => ErrorKind::State,
        }
    }

    /// Transient failures the orchestrator retries with backoff.
    ///
    /// `TokenExpiredOrRotated` is retryable only after the caller
    /// re-fetches the token.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::UnreachableLeader(_) | ClusterError::TokenExpiredOrRotated(_)
        )
    }

    /// Payload of the variant without its display prefix.
    pub fn detail(&self) -> String {
        match self {
            ClusterError::RuntimeUnavailable(d)
            | ClusterError::AlreadyMemberOfOtherCluster(d)
            | ClusterError::NotLeader(d)
            | ClusterError::TokenExpiredOrRotated(d)
            | ClusterError::UnreachableLeader(d)
            | ClusterError::RoleMismatch(d)
            | ClusterError::InvalidToken(d)
            | ClusterError::UnknownNode(d)
            | ClusterError::Certificate(d)
            | ClusterError::Remote(d) => d.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuild a typed error received from a peer.
    pub fn from_kind(kind: ErrorKind, detail: String) -> Self {
        match kind {
            ErrorKind::RuntimeUnavailable => ClusterError::RuntimeUnavailable(detail),
            ErrorKind::AlreadyMemberOfOtherCluster => ClusterError::AlreadyMemberOfOtherCluster(detail),
            ErrorKind::NotLeader => ClusterError::NotLeader(detail),
            ErrorKind::ClusterNotInitialized => ClusterError::ClusterNotInitialized,
            ErrorKind::TokenExpiredOrRotated => ClusterError::TokenExpiredOrRotated(detail),
            ErrorKind::UnreachableLeader => ClusterError::UnreachableLeader(detail),
            ErrorKind::RoleMismatch => ClusterError::RoleMismatch(detail),
            ErrorKind::NotManager => ClusterError::NotManager,
            ErrorKind::InvalidToken => ClusterError::InvalidToken(detail),
            ErrorKind::NotMember => ClusterError::NotMember,
            ErrorKind::LeaderCannotLeave => ClusterError::LeaderCannotLeave,
            ErrorKind::UnknownNode => ClusterError::UnknownNode(detail),
            ErrorKind::Certificate => ClusterError::Certificate(detail),
            // Storage failures on a peer are opaque to us.
            ErrorKind::Remote | ErrorKind::State => ClusterError::Remote(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_class_errors_retry() {
        assert!(ClusterError::UnreachableLeader("10.0.0.1:2377".into()).is_retryable());
        assert!(ClusterError::TokenExpiredOrRotated("worker".into()).is_retryable());
        assert!(!ClusterError::RoleMismatch("x".into()).is_retryable());
        assert!(!ClusterError::AlreadyMemberOfOtherCluster("c".into()).is_retryable());
        assert!(!ClusterError::RuntimeUnavailable("docker".into()).is_retryable());
        assert!(!ClusterError::NotLeader("x".into()).is_retryable());
    }

    #[test]
    fn kind_survives_the_wire() {
        let original = ClusterError::RoleMismatch("token scope is worker-join".into());
        let kind: ErrorKind = original.kind().as_str().parse().unwrap();
        let rebuilt = ClusterError::from_kind(kind, original.detail());

        assert_eq!(rebuilt.kind(), ErrorKind::RoleMismatch);
        assert_eq!(rebuilt.to_string(), original.to_string());
    }

    #[test]
    fn unit_variants_rebuild_without_detail() {
        let rebuilt = ClusterError::from_kind(ErrorKind::ClusterNotInitialized, String::new());
        assert!(matches!(rebuilt, ClusterError::ClusterNotInitialized));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!("split_brain".parse::<ErrorKind>().is_err());
    }
}
