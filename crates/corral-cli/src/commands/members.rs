use anyhow::Context;

use corral_api::NodeClient;
use corral_core::Availability;
use corral_state::MembershipRecord;

pub async fn list(client: &NodeClient, format: &str) -> anyhow::Result<()> {
    let members = client
        .members()
        .await
        .with_context(|| format!("listing members on {}", client.endpoint()))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&members)?),
        _ => print!("{}", format_table(&members)),
    }
    Ok(())
}

pub async fn set_availability(
    client: &NodeClient,
    node_id: &str,
    availability: Availability,
) -> anyhow::Result<()> {
    let record = client
        .set_availability(node_id, availability)
        .await
        .with_context(|| format!("setting {node_id} {availability}"))?;
    println!("✓ {} ({}) is now {}", record.hostname, record.node_id, record.availability);
    Ok(())
}

/// Columns: id, hostname, status, availability, manager status, engine.
pub fn format_table(members: &[MembershipRecord]) -> String {
    let headers = ["ID", "HOSTNAME", "STATUS", "AVAILABILITY", "MANAGER STATUS", "ENGINE VERSION"];
    let rows: Vec<[String; 6]> = members
        .iter()
        .map(|m| {
            [
                m.node_id.clone(),
                m.hostname.clone(),
                m.status.to_string(),
                m.availability.to_string(),
                m.manager_status.to_string(),
                m.engine_version.clone(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };
    push_row(&headers);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        push_row(&cells);
    }
    out
}
