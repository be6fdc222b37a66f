//! Cluster root of trust.
//!
//! The leader generates a self-signed CA when it initializes the cluster.
//! Every admitted node receives a certificate signed by that CA, and every
//! join token carries the CA digest so a joining host can check it reached
//! the right cluster.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::error::{ClusterError, ClusterResult};

/// A generated certificate and private key pair.
#[derive(Debug, Clone)]
pub struct CertKeyPair {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

/// Lifetime of a cluster CA.
const CA_VALIDITY: Duration = Duration::days(10 * 365);
/// Lifetime of a node certificate; shorter than the CA that signs it.
const NODE_VALIDITY: Duration = Duration::days(5 * 365);

fn cert_err(e: rcgen::Error) -> ClusterError {
    ClusterError::Certificate(e.to_string())
}

fn ca_params(cluster_id: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "Corral");
    dn.push(DnType::CommonName, format!("corral-ca-{cluster_id}"));
    params.distinguished_name = dn;

    set_validity(&mut params, CA_VALIDITY);
    params
}

fn set_validity(params: &mut CertificateParams, lifetime: Duration) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::hours(1);
    params.not_after = now + lifetime;
}

/// Generate the self-signed CA certificate for a new cluster.
pub fn generate_ca(cluster_id: &str) -> ClusterResult<CertKeyPair> {
    let key_pair = KeyPair::generate().map_err(cert_err)?;
    let cert = ca_params(cluster_id).self_signed(&key_pair).map_err(cert_err)?;

    info!(%cluster_id, "generated cluster CA certificate");

    Ok(CertKeyPair {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Generate a node certificate signed by the cluster CA.
///
/// `addresses` become SANs: IPs as IP SANs, anything else as a DNS name.
/// A trailing `:port` is stripped.
pub fn generate_node_cert(
    cluster_id: &str,
    ca_key_pem: &str,
    node_id: &str,
    addresses: &[String],
) -> ClusterResult<CertKeyPair> {
    let ca_key = KeyPair::from_pem(ca_key_pem).map_err(cert_err)?;
    // Re-deriving the issuer from the same key and subject yields an
    // identical issuer name for signing.
    let ca_cert = ca_params(cluster_id).self_signed(&ca_key).map_err(cert_err)?;

    let params = node_params(node_id, addresses)?;
    let node_key = KeyPair::generate().map_err(cert_err)?;
    let node_cert = params
        .signed_by(&node_key, &ca_cert, &ca_key)
        .map_err(cert_err)?;

    info!(%node_id, sans = addresses.len(), "generated node certificate");

    Ok(CertKeyPair {
        cert_pem: node_cert.pem(),
        key_pem: node_key.serialize_pem(),
    })
}

fn node_params(node_id: &str, addresses: &[String]) -> ClusterResult<CertificateParams> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "Corral");
    dn.push(DnType::CommonName, node_id);
    params.distinguished_name = dn;

    for addr in addresses {
        let host = strip_port(addr);
        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            params.subject_alt_names.push(rcgen::SanType::IpAddress(ip));
        } else {
            let name = host.to_string().try_into().map_err(cert_err)?;
            params.subject_alt_names.push(rcgen::SanType::DnsName(name));
        }
    }

    set_validity(&mut params, NODE_VALIDITY);
    Ok(params)
}

/// Hex SHA-256 digest of a PEM certificate.
pub fn ca_digest(cert_pem: &str) -> String {
    hex::encode(Sha256::digest(cert_pem.as_bytes()))
}

fn strip_port(addr: &str) -> &str {
    // Bracketed IPv6 with port: [::1]:2377
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.rsplit_once(':') {
        // A single colon means host:port; more is a bare IPv6 address.
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => addr,
    }
}
