//! Prometheus text exposition format.
//!
//! Renders the node's member view and outcome counters for scraping by a
//! Prometheus server or compatible agent.

use std::fmt::Write;

use corral_core::{ManagerStatus, Role};
use corral_state::MembershipRecord;

use crate::collector::CounterSnapshot;

/// Render membership gauges and outcome counters.
///
/// `members` is whatever view the node holds: the authoritative table on
/// the leader, the replica on other managers, empty on workers.
pub fn render_prometheus(members: &[MembershipRecord], is_leader: bool, counters: &CounterSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP corral_members Cluster members known to this node, by role.\n");
    out.push_str("# TYPE corral_members gauge\n");
    for role in Role::ALL {
        let count = members.iter().filter(|m| m.role == role).count();
        let _ = writeln!(out, "corral_members{{role=\"{role}\"}} {count}");
    }

    out.push_str("# HELP corral_managers Managers known to this node, by manager status.\n");
    out.push_str("# TYPE corral_managers gauge\n");
    for status in [ManagerStatus::Leader, ManagerStatus::Reachable] {
        let count = members
            .iter()
            .filter(|m| m.role == Role::Manager && m.manager_status == status)
            .count();
        let _ = writeln!(out, "corral_managers{{manager_status=\"{status}\"}} {count}");
    }

    out.push_str("# HELP corral_is_leader Whether this node is the cluster leader.\n");
    out.push_str("# TYPE corral_is_leader gauge\n");
    let _ = writeln!(out, "corral_is_leader {}", u8::from(is_leader));

    out.push_str("# HELP corral_admissions_total Admission requests handled by this node.\n");
    out.push_str("# TYPE corral_admissions_total counter\n");
    for (outcome, count) in &counters.admissions {
        let _ = writeln!(out, "corral_admissions_total{{outcome=\"{outcome}\"}} {count}");
    }

    out.push_str("# HELP corral_joins_total Join attempts made by this node.\n");
    out.push_str("# TYPE corral_joins_total counter\n");
    for (outcome, count) in &counters.joins {
        let _ = writeln!(out, "corral_joins_total{{outcome=\"{outcome}\"}} {count}");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{AdmissionOutcome, ClusterMetrics};
    use corral_core::{Availability, MemberStatus};

    fn member(hostname: &str, role: Role, manager_status: ManagerStatus) -> MembershipRecord {
        MembershipRecord {
            node_id: format!("node-{hostname}"),
            hostname: hostname.to_string(),
            address: "10.0.0.1:2377".to_string(),
            role,
            availability: Availability::Active,
            manager_status,
            engine_version: "27.1.1".to_string(),
            joined_at: 1000,
            last_seen: 1000,
            status: MemberStatus::Ready,
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&[], false, &CounterSnapshot::default());
        // Should still have type declarations.
        assert!(output.contains("# TYPE corral_members gauge"));
        assert!(output.contains("corral_members{role=\"manager\"} 0"));
        assert!(output.contains("corral_is_leader 0"));
    }

    #[test]
    fn render_five_node_view() {
        let members = vec![
            member("swarm-master-1", Role::Manager, ManagerStatus::Leader),
            member("swarm-master-2", Role::Manager, ManagerStatus::Reachable),
            member("swarm-master-3", Role::Manager, ManagerStatus::Reachable),
            member("swarm-worker-1", Role::Worker, ManagerStatus::NotApplicable),
            member("swarm-worker-2", Role::Worker, ManagerStatus::NotApplicable),
        ];
        let metrics = ClusterMetrics::new();
        metrics.record_admission(AdmissionOutcome::Admitted);

        let output = render_prometheus(&members, true, &metrics.snapshot());

        assert!(output.contains("corral_members{role=\"manager\"} 3"));
        assert!(output.contains("corral_members{role=\"worker\"} 2"));
        assert!(output.contains("corral_managers{manager_status=\"leader\"} 1"));
        assert!(output.contains("corral_managers{manager_status=\"reachable\"} 2"));
        assert!(output.contains("corral_is_leader 1"));
        assert!(output.contains("corral_admissions_total{outcome=\"admitted\"} 1"));
        assert!(output.contains("corral_joins_total{outcome=\"failed\"} 0"));
    }

    #[test]
    fn every_sample_line_has_a_value() {
        let output = render_prometheus(&[], true, &ClusterMetrics::new().snapshot());

        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let value = line.rsplit(' ').next().unwrap();
            assert!(value.parse::<u64>().is_ok(), "bad sample line: {line}");
        }
    }
}
