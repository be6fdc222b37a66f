//! Pipeline runs over in-process nodes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use corral_bootstrap::{HostControl, HostOutcome, Pipeline, RetryPolicy};
use corral_cluster::{
    ClusterResult, InProcessNetwork, InitOutcome, JoinOutcome, Node, NodeIdentity, StaticRuntime,
};
use corral_core::{
    ClusterSettings, HostSpec, HostStatus, Inventory, ManagerStatus, RetrySettings, Role,
};
use corral_state::{MembershipRecord, StateStore};

const HOSTS: [(&str, &str, Role); 5] = [
    ("swarm-master-1", "10.0.0.11", Role::Manager),
    ("swarm-master-2", "10.0.0.12", Role::Manager),
    ("swarm-master-3", "10.0.0.13", Role::Manager),
    ("swarm-worker-1", "10.0.0.21", Role::Worker),
    ("swarm-worker-2", "10.0.0.22", Role::Worker),
];

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        attempt_timeout: Duration::from_secs(2),
    }
}

struct Fleet {
    network: Arc<InProcessNetwork>,
    nodes: HashMap<String, Arc<Node>>,
    inventory: Inventory,
}

impl Fleet {
    fn new() -> Self {
        Self::with_leader_runtime(StaticRuntime::ready("27.1.1"))
    }

    fn with_leader_runtime(leader_runtime: StaticRuntime) -> Self {
        let network = Arc::new(InProcessNetwork::new());
        let mut leader_runtime = Some(leader_runtime);
        let mut nodes = HashMap::new();
        let mut hosts = Vec::new();

        for (hostname, address, role) in HOSTS {
            let endpoint = format!("{address}:2377");
            let runtime = if hostname == "swarm-master-1" {
                leader_runtime.take().unwrap_or_else(|| StaticRuntime::ready("27.1.1"))
            } else {
                StaticRuntime::ready("27.1.1")
            };
            let node = Arc::new(Node::new(
                NodeIdentity::new(hostname, endpoint.clone()),
                StateStore::open_in_memory().unwrap(),
                Arc::new(runtime),
                network.clone(),
            ));
            network.register(&endpoint, &node);
            nodes.insert(hostname.to_string(), node);
            hosts.push(HostSpec {
                hostname: hostname.to_string(),
                address: address.to_string(),
                ram: Some(4096),
                cpus: Some(2),
                role,
                leader: false,
                api_port: None,
            });
        }

        let inventory = Inventory {
            cluster: ClusterSettings {
                api_port: 2377,
                advertise_port: None,
            },
            retry: RetrySettings::default(),
            hosts,
        };
        Self {
            network,
            nodes,
            inventory,
        }
    }

    fn node(&self, hostname: &str) -> Arc<Node> {
        self.nodes[hostname].clone()
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(&self.inventory, |spec| self.node(&spec.hostname) as Arc<dyn HostControl>)
            .unwrap()
            .with_policy(fast_policy())
            .with_convergence_timeout(Duration::from_secs(2))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn five_hosts_bootstrap_into_one_cluster() {
    let fleet = Fleet::new();
    let (_tx, rx) = watch::channel(false);

    let report = fleet.pipeline().run(rx).await;
    assert!(report.is_success(), "{}", report.render_table());
    assert_eq!(report.hosts[0].outcome, HostOutcome::Initialized);
    for host in &report.hosts[1..] {
        assert_eq!(host.outcome, HostOutcome::Joined);
        assert!(host.node_id.is_some());
    }

    assert_eq!(report.members.len(), 5);
    let leaders = report
        .members
        .iter()
        .filter(|m| m.manager_status == ManagerStatus::Leader)
        .count();
    assert_eq!(leaders, 1);
    assert_eq!(report.members[0].hostname, "swarm-master-1");
    let workers: Vec<&MembershipRecord> =
        report.members.iter().filter(|m| m.role == Role::Worker).collect();
    assert_eq!(workers.len(), 2);
    assert!(workers.iter().all(|m| m.manager_status == ManagerStatus::NotApplicable));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rerun_is_a_no_op() {
    let fleet = Fleet::new();
    let (_tx, rx) = watch::channel(false);

    let first = fleet.pipeline().run(rx.clone()).await;
    assert!(first.is_success());

    let second = fleet.pipeline().run(rx).await;
    assert!(second.is_success(), "{}", second.render_table());
    assert_eq!(second.hosts[0].outcome, HostOutcome::AlreadyInitialized);
    for host in &second.hosts[1..] {
        assert_eq!(host.outcome, HostOutcome::AlreadyJoined);
    }
    assert_eq!(second.members, first.members);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leader_failure_is_reported_for_every_host() {
    let fleet = Fleet::with_leader_runtime(StaticRuntime::unavailable());
    let (_tx, rx) = watch::channel(false);

    let report = fleet.pipeline().run(rx).await;
    assert!(!report.is_success());
    assert!(!report.converged);
    assert!(report.members.is_empty());
    assert_eq!(report.failures().count(), 5);
    for host in &report.hosts[1..] {
        match &host.outcome {
            HostOutcome::Failed(reason) => assert!(reason.starts_with("leader failed"), "{reason}"),
            other => panic!("{} reported {other}", host.hostname),
        }
    }
    // Followers still made their runtimes ready.
    assert_eq!(
        fleet.node("swarm-worker-1").host_state().unwrap().status,
        HostStatus::RuntimeReady
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_leader_fails_joins_until_it_recovers() {
    let fleet = Fleet::new();
    let (_tx, rx) = watch::channel(false);
    fleet.network.set_reachable("10.0.0.11:2377", false);

    let report = fleet.pipeline().run(rx.clone()).await;
    assert_eq!(report.hosts[0].outcome, HostOutcome::Initialized);
    for host in &report.hosts[1..] {
        assert!(host.outcome.is_failure(), "{} reported {}", host.hostname, host.outcome);
    }
    assert_eq!(report.members.len(), 1);

    fleet.network.set_reachable("10.0.0.11:2377", true);
    let report = fleet.pipeline().run(rx).await;
    assert!(report.is_success(), "{}", report.render_table());
    assert_eq!(report.hosts[0].outcome, HostOutcome::AlreadyInitialized);
    assert_eq!(report.members.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_reports_pending_hosts_as_aborted() {
    let fleet = Fleet::new();
    fleet.network.set_reachable("10.0.0.11:2377", false);
    let (tx, rx) = watch::channel(false);

    let pipeline = fleet
        .pipeline()
        .with_policy(RetryPolicy {
            max_attempts: 1000,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(2),
        });
    let run = tokio::spawn(async move { pipeline.run(rx).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();

    let report = run.await.unwrap();
    assert_eq!(report.hosts[0].outcome, HostOutcome::Initialized);
    for host in &report.hosts[1..] {
        assert_eq!(host.outcome, HostOutcome::Failed("aborted".into()));
    }
    assert!(!report.converged);
}

/// Leader control that rotates the worker token right after handing
/// out the first one.
struct RotatingLeader {
    node: Arc<Node>,
    rotated: AtomicBool,
    fetches: AtomicU32,
}

#[async_trait]
impl HostControl for RotatingLeader {
    async fn ensure_runtime(&self) -> ClusterResult<String> {
        HostControl::ensure_runtime(self.node.as_ref()).await
    }

    async fn initialize(&self, advertise: &str) -> ClusterResult<InitOutcome> {
        self.node.initialize(advertise).await
    }

    async fn token(&self, role: Role) -> ClusterResult<String> {
        let token = self.node.issue_token(role).await?.encode();
        if role == Role::Worker {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.rotated.swap(true, Ordering::SeqCst) {
                self.node.rotate_token(Role::Worker).await?;
            }
        }
        Ok(token)
    }

    async fn join(&self, token: &str, role: Role) -> ClusterResult<JoinOutcome> {
        self.node.join(token, role).await
    }

    async fn members(&self) -> ClusterResult<Vec<MembershipRecord>> {
        self.node.list_members()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rotated_token_is_fetched_again() {
    let fleet = Fleet::new();
    let leader = Arc::new(RotatingLeader {
        node: fleet.node("swarm-master-1"),
        rotated: AtomicBool::new(false),
        fetches: AtomicU32::new(0),
    });
    let (_tx, rx) = watch::channel(false);

    let pipeline = Pipeline::new(&fleet.inventory, |spec| {
        if spec.hostname == "swarm-master-1" {
            leader.clone() as Arc<dyn HostControl>
        } else {
            fleet.node(&spec.hostname) as Arc<dyn HostControl>
        }
    })
    .unwrap()
    .with_policy(fast_policy())
    .with_convergence_timeout(Duration::from_secs(2));

    let report = pipeline.run(rx).await;
    assert!(report.is_success(), "{}", report.render_table());
    assert_eq!(report.host("swarm-worker-1").unwrap().outcome, HostOutcome::Joined);
    assert_eq!(report.host("swarm-worker-2").unwrap().outcome, HostOutcome::Joined);
    assert_eq!(leader.fetches.load(Ordering::SeqCst), 2);
}
