//! Join token encoding.
//!
//! A token is `CRLTKN-1-` followed by URL-safe unpadded base64 of a JSON
//! payload. It names the cluster, the role it admits, the leader to dial,
//! the CA digest to expect and the role's secret at issue time.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use corral_core::Role;

use crate::error::ClusterError;

/// Prefix of every encoded token, including the format version.
pub const TOKEN_PREFIX: &str = "CRLTKN-1-";

/// Decoded join token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinToken {
    pub cluster_id: String,
    pub role: Role,
    /// Advertise address of the leader that issued the token.
    pub leader: String,
    pub ca_digest: String,
    pub secret: String,
}

impl JoinToken {
    pub fn encode(&self) -> String {
        // Serializing a struct of strings cannot fail.
        let payload = serde_json::to_vec(self).unwrap_or_default();
        format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(payload))
    }

    pub fn decode(token: &str) -> Result<Self, ClusterError> {
        let body = token
            .trim()
            .strip_prefix(TOKEN_PREFIX)
            .ok_or_else(|| ClusterError::InvalidToken("unrecognized token format".to_string()))?;
        let payload = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| ClusterError::InvalidToken(format!("token is not valid base64: {e}")))?;
        let token: JoinToken = serde_json::from_slice(&payload)
            .map_err(|e| ClusterError::InvalidToken(format!("malformed token payload: {e}")))?;
        if token.secret.is_empty() || token.leader.is_empty() {
            return Err(ClusterError::InvalidToken("token payload is incomplete".to_string()));
        }
        Ok(token)
    }

    /// Scope string of the credential class (`manager-join`, `worker-join`).
    pub fn scope(&self) -> &'static str {
        self.role.token_scope()
    }
}

impl fmt::Display for JoinToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for JoinToken {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JoinToken::decode(s)
    }
}

/// Fresh random secret, hex-encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
