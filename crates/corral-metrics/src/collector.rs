//! Outcome counters for admission and join traffic.
//!
//! Counters are plain atomics; a node only ever adds to them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::trace;

/// Result of one admission request handled by the leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted,
    AlreadyMember,
    Rejected,
}

impl AdmissionOutcome {
    pub const ALL: [AdmissionOutcome; 3] = [
        AdmissionOutcome::Admitted,
        AdmissionOutcome::AlreadyMember,
        AdmissionOutcome::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionOutcome::Admitted => "admitted",
            AdmissionOutcome::AlreadyMember => "already_member",
            AdmissionOutcome::Rejected => "rejected",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Result of one join attempt made by this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinResult {
    Joined,
    AlreadyJoined,
    Failed,
}

impl JoinResult {
    pub const ALL: [JoinResult; 3] = [JoinResult::Joined, JoinResult::AlreadyJoined, JoinResult::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            JoinResult::Joined => "joined",
            JoinResult::AlreadyJoined => "already_joined",
            JoinResult::Failed => "failed",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Point-in-time copy of all counters, labelled by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub admissions: Vec<(&'static str, u64)>,
    pub joins: Vec<(&'static str, u64)>,
}

impl CounterSnapshot {
    /// Admissions recorded with `outcome`.
    pub fn admissions_for(&self, outcome: AdmissionOutcome) -> u64 {
        lookup(&self.admissions, outcome.as_str())
    }

    /// Join attempts that ended in `result`.
    pub fn joins_for(&self, result: JoinResult) -> u64 {
        lookup(&self.joins, result.as_str())
    }
}

fn lookup(pairs: &[(&'static str, u64)], label: &str) -> u64 {
    pairs
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, v)| *v)
        .unwrap_or(0)
}

/// Counters shared by every task of a node.
#[derive(Debug, Default)]
pub struct ClusterMetrics {
    admissions: [AtomicU64; 3],
    joins: [AtomicU64; 3],
}

impl ClusterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admission(&self, outcome: AdmissionOutcome) {
        self.admissions[outcome.index()].fetch_add(1, Ordering::Relaxed);
        trace!(outcome = outcome.as_str(), "admission recorded");
    }

    pub fn record_join(&self, result: JoinResult) {
        self.joins[result.index()].fetch_add(1, Ordering::Relaxed);
        trace!(result = result.as_str(), "join recorded");
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            admissions: AdmissionOutcome::ALL
                .iter()
                .map(|o| (o.as_str(), self.admissions[o.index()].load(Ordering::Relaxed)))
                .collect(),
            joins: JoinResult::ALL
                .iter()
                .map(|r| (r.as_str(), self.joins[r.index()].load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_snapshot_is_all_zero() {
        let metrics = ClusterMetrics::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.admissions.len(), 3);
        assert_eq!(snap.joins.len(), 3);
        assert!(snap.admissions.iter().all(|(_, v)| *v == 0));
        assert!(snap.joins.iter().all(|(_, v)| *v == 0));
    }

    #[test]
    fn outcomes_count_independently() {
        let metrics = ClusterMetrics::new();
        metrics.record_admission(AdmissionOutcome::Admitted);
        metrics.record_admission(AdmissionOutcome::Admitted);
        metrics.record_admission(AdmissionOutcome::Rejected);
        metrics.record_join(JoinResult::AlreadyJoined);

        let snap = metrics.snapshot();
        assert_eq!(snap.admissions_for(AdmissionOutcome::Admitted), 2);
        assert_eq!(snap.admissions_for(AdmissionOutcome::AlreadyMember), 0);
        assert_eq!(snap.admissions_for(AdmissionOutcome::Rejected), 1);
        assert_eq!(snap.joins_for(JoinResult::AlreadyJoined), 1);
        assert_eq!(snap.joins_for(JoinResult::Joined), 0);
    }

    #[test]
    fn counters_are_shareable_across_threads() {
        let metrics = std::sync::Arc::new(ClusterMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_join(JoinResult::Joined);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().joins_for(JoinResult::Joined), 400);
    }
}
