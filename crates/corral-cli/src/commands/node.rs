//! Single-node operations against one daemon.

use anyhow::Context;

use corral_api::NodeClient;
use corral_cluster::InitOutcome;
use corral_core::{Role, parse_duration};

pub fn connect(endpoint: &str, timeout: &str) -> anyhow::Result<NodeClient> {
    let timeout = parse_duration(timeout)
        .with_context(|| format!("invalid --timeout '{timeout}'"))?;
    Ok(NodeClient::new(endpoint).with_timeout(timeout))
}

pub async fn status(client: &NodeClient) -> anyhow::Result<()> {
    let status = client
        .status()
        .await
        .with_context(|| format!("querying {}", client.endpoint()))?;

    println!("Hostname: {}", status.hostname);
    println!("Address:  {}", status.address);
    println!("Status:   {}", status.status);
    if let Some(version) = &status.engine_version {
        println!("Engine:   {version}");
    }
    match (&status.cluster_id, status.role) {
        (Some(cluster_id), Some(role)) => {
            let leader = if status.is_leader { " (leader)" } else { "" };
            println!("Cluster:  {cluster_id}");
            println!("Role:     {role}{leader}");
        }
        _ => println!("Cluster:  none"),
    }
    Ok(())
}

pub async fn ensure_runtime(client: &NodeClient) -> anyhow::Result<()> {
    let report = client
        .ensure_runtime()
        .await
        .with_context(|| format!("ensuring runtime on {}", client.endpoint()))?;
    println!("✓ Runtime ready on {} (engine {})", report.host.hostname, report.version);
    Ok(())
}

pub async fn init(client: &NodeClient, advertise: &str) -> anyhow::Result<()> {
    let outcome = client
        .initialize(advertise)
        .await
        .with_context(|| format!("initializing cluster on {}", client.endpoint()))?;

    let handle = outcome.handle();
    match &outcome {
        InitOutcome::Initialized(_) => println!("✓ Cluster initialized"),
        InitOutcome::AlreadyInitialized(_) => println!("Cluster already initialized (no-op)"),
    }
    println!("  Cluster:   {}", handle.cluster_id);
    println!("  Leader:    {} ({})", handle.leader_node_id, handle.advertise_addr);
    println!("  CA digest: {}", handle.ca_digest);
    Ok(())
}

/// Prints only the token so the output can be captured by scripts.
pub async fn token(client: &NodeClient, role: Role, rotate: bool) -> anyhow::Result<()> {
    let token = if rotate {
        client.rotate_token(role).await
    } else {
        client.token(role).await
    }
    .with_context(|| format!("fetching {role} token from {}", client.endpoint()))?;
    println!("{token}");
    Ok(())
}

pub async fn join(client: &NodeClient, token: &str, role: Role) -> anyhow::Result<()> {
    let outcome = client
        .join(token, role)
        .await
        .with_context(|| format!("joining {} as {role}", client.endpoint()))?;

    let record = outcome.record();
    if outcome.is_noop() {
        println!("{} already joined (no-op)", record.hostname);
    } else {
        println!("✓ {} joined as {}", record.hostname, record.role);
    }
    println!("  Node ID: {}", record.node_id);
    Ok(())
}

pub async fn leave(client: &NodeClient) -> anyhow::Result<()> {
    let record = client
        .leave()
        .await
        .with_context(|| format!("leaving cluster from {}", client.endpoint()))?;
    println!("✓ {} left the cluster (was {})", record.hostname, record.node_id);
    Ok(())
}
