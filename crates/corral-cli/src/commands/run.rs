use std::path::Path;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use corral_bootstrap::Pipeline;
use corral_core::Inventory;

pub async fn run(inventory: &str, format: &str) -> anyhow::Result<()> {
    let path = Path::new(inventory);
    let inventory = Inventory::from_file(path)
        .with_context(|| format!("loading inventory {}", path.display()))?;
    let pipeline = Pipeline::over_http(&inventory).context("invalid inventory")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping after in-flight steps");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = pipeline.run(shutdown_rx).await;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print!("{}", report.render_table()),
    }

    if !report.is_success() {
        anyhow::bail!(
            "bootstrap incomplete: {} of {} hosts failed",
            report.failures().count(),
            report.hosts.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_inventory_names_the_file() {
        let err = run("/nonexistent/inventory.toml", "table").await.unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/inventory.toml"));
    }

    #[tokio::test]
    async fn invalid_inventory_is_rejected_before_any_host_is_touched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.toml");
        std::fs::write(
            &path,
            r#"
[[hosts]]
hostname = "swarm-worker-1"
address = "10.0.0.21"
role = "worker"
"#,
        )
        .unwrap();
        let err = run(path.to_str().unwrap(), "table").await.unwrap_err();
        assert!(format!("{err:#}").contains("no manager"));
    }
}
