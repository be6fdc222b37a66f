//! Per-host results of one bootstrap run.

use std::fmt;

use serde::{Serialize, Serializer};

use corral_core::Role;
use corral_state::MembershipRecord;

/// What the pipeline did to one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    Initialized,
    AlreadyInitialized,
    Joined,
    AlreadyJoined,
    Failed(String),
}

impl HostOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, HostOutcome::Failed(_))
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, HostOutcome::AlreadyInitialized | HostOutcome::AlreadyJoined)
    }
}

impl fmt::Display for HostOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOutcome::Initialized => f.write_str("initialized"),
            HostOutcome::AlreadyInitialized => f.write_str("already-initialized (no-op)"),
            HostOutcome::Joined => f.write_str("joined"),
            HostOutcome::AlreadyJoined => f.write_str("already-joined (no-op)"),
            HostOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

impl Serialize for HostOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub hostname: String,
    pub role: Role,
    pub outcome: HostOutcome,
    /// Set once the host is a member.
    pub node_id: Option<String>,
}

/// Result of [`Pipeline::run`](crate::Pipeline::run).
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    /// One entry per inventory host, in inventory order.
    pub hosts: Vec<HostReport>,
    /// The leader's view after the run; empty when the leader failed.
    pub members: Vec<MembershipRecord>,
    /// Whether the leader's view lists every host that joined.
    pub converged: bool,
}

impl BootstrapReport {
    pub fn is_success(&self) -> bool {
        self.converged && !self.hosts.iter().any(|h| h.outcome.is_failure())
    }

    pub fn host(&self, hostname: &str) -> Option<&HostReport> {
        self.hosts.iter().find(|h| h.hostname == hostname)
    }

    pub fn failures(&self) -> impl Iterator<Item = &HostReport> {
        self.hosts.iter().filter(|h| h.outcome.is_failure())
    }

    pub fn render_table(&self) -> String {
        let width = self
            .hosts
            .iter()
            .map(|h| h.hostname.len())
            .max()
            .unwrap_or(0)
            .max("HOSTNAME".len());

        let mut out = String::new();
        out.push_str(&format!("{:<width$}  {:<8}  {}\n", "HOSTNAME", "ROLE", "RESULT"));
        for host in &self.hosts {
            out.push_str(&format!(
                "{:<width$}  {:<8}  {}\n",
                host.hostname,
                host.role.as_str(),
                host.outcome
            ));
        }

        let failed = self.failures().count();
        out.push_str(&format!(
            "\n{} hosts, {} failed, {} members in the leader's view{}\n",
            self.hosts.len(),
            failed,
            self.members.len(),
            if self.converged { "" } else { " (not converged)" }
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcomes: &[(&str, Role, HostOutcome)], converged: bool) -> BootstrapReport {
        BootstrapReport {
            hosts: outcomes
                .iter()
                .map(|(name, role, outcome)| HostReport {
                    hostname: name.to_string(),
                    role: *role,
                    outcome: outcome.clone(),
                    node_id: None,
                })
                .collect(),
            members: Vec::new(),
            converged,
        }
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(HostOutcome::Initialized.to_string(), "initialized");
        assert_eq!(HostOutcome::AlreadyInitialized.to_string(), "already-initialized (no-op)");
        assert_eq!(HostOutcome::AlreadyJoined.to_string(), "already-joined (no-op)");
        assert_eq!(
            HostOutcome::Failed("aborted".into()).to_string(),
            "failed: aborted"
        );
    }

    #[test]
    fn outcome_serializes_as_label() {
        let json = serde_json::to_value(HostOutcome::Failed("leader unreachable".into())).unwrap();
        assert_eq!(json, "failed: leader unreachable");
    }

    #[test]
    fn success_needs_no_failures_and_convergence() {
        let ok = report(
            &[
                ("swarm-master-1", Role::Manager, HostOutcome::Initialized),
                ("swarm-worker-1", Role::Worker, HostOutcome::Joined),
            ],
            true,
        );
        assert!(ok.is_success());

        let unconverged = BootstrapReport { converged: false, ..ok.clone() };
        assert!(!unconverged.is_success());

        let failed = report(
            &[("swarm-worker-1", Role::Worker, HostOutcome::Failed("x".into()))],
            true,
        );
        assert!(!failed.is_success());
        assert_eq!(failed.failures().count(), 1);
    }

    #[test]
    fn table_lists_hosts_in_order() {
        let table = report(
            &[
                ("swarm-master-1", Role::Manager, HostOutcome::Initialized),
                ("swarm-worker-1", Role::Worker, HostOutcome::AlreadyJoined),
            ],
            true,
        )
        .render_table();
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].starts_with("HOSTNAME"));
        assert!(lines[1].starts_with("swarm-master-1"));
        assert!(lines[1].ends_with("initialized"));
        assert!(lines[2].contains("worker"));
        assert!(lines[2].ends_with("already-joined (no-op)"));
        assert!(table.contains("2 hosts, 0 failed"));
    }
}
