//! Fan-out/fan-in bootstrap of an inventory.
//!
//! Join tasks for every follower are spawned up front. Each makes its
//! runtime ready, then parks on a barrier until the leader has initialized
//! the cluster and the pipeline holds both join tokens. A leader failure
//! releases the barrier with the reason so every follower reports it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use corral_api::NodeClient;
use corral_cluster::{ClusterError, ClusterResult, InitOutcome, JoinOutcome};
use corral_core::{ConfigError, HostSpec, Inventory, Role};
use corral_state::MembershipRecord;

use crate::control::HostControl;
use crate::report::{BootstrapReport, HostOutcome, HostReport};
use crate::retry::{RetryPolicy, StepError, cancelled};

/// Join tokens fetched from the leader, shared by every join task.
pub(crate) struct TokenCache {
    leader: Arc<dyn HostControl>,
    tokens: Mutex<HashMap<Role, String>>,
}

impl TokenCache {
    fn new(leader: Arc<dyn HostControl>) -> Self {
        Self {
            leader,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Cached token for `role`, fetched from the leader on a miss.
    async fn get(&self, role: Role) -> ClusterResult<String> {
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.get(&role) {
            return Ok(token.clone());
        }
        let token = self.leader.token(role).await?;
        tokens.insert(role, token.clone());
        Ok(token)
    }

    /// Drop `stale` so the next `get` asks the leader again. A token
    /// another task already refreshed is left alone.
    async fn invalidate(&self, role: Role, stale: &str) {
        let mut tokens = self.tokens.lock().await;
        if tokens.get(&role).is_some_and(|t| t == stale) {
            debug!(role = %role, "discarding rotated join token");
            tokens.remove(&role);
        }
    }
}

/// Leader initialization state as seen by the join tasks.
#[derive(Clone)]
enum Barrier {
    Pending,
    Ready(Arc<TokenCache>),
    Failed(String),
}

struct PlannedHost {
    spec: HostSpec,
    control: Arc<dyn HostControl>,
}

/// One bootstrap run over an inventory.
pub struct Pipeline {
    /// Inventory order.
    hosts: Vec<PlannedHost>,
    leader: usize,
    /// Address the leader advertises to joining hosts.
    advertise: String,
    policy: RetryPolicy,
    convergence_timeout: Duration,
}

impl Pipeline {
    /// Plan a run, reaching each host through `connect`.
    pub fn new<F>(inventory: &Inventory, connect: F) -> Result<Self, ConfigError>
    where
        F: Fn(&HostSpec) -> Arc<dyn HostControl>,
    {
        inventory.validate()?;
        let leader_spec = inventory.leader().ok_or(ConfigError::NoManager)?;
        let leader = inventory
            .hosts
            .iter()
            .position(|h| h.hostname == leader_spec.hostname)
            .ok_or(ConfigError::NoManager)?;

        let hosts = inventory
            .hosts
            .iter()
            .map(|spec| PlannedHost {
                spec: spec.clone(),
                control: connect(spec),
            })
            .collect();

        Ok(Self {
            hosts,
            leader,
            advertise: leader_spec.advertise_addr(&inventory.cluster),
            policy: RetryPolicy::from_settings(&inventory.retry)?,
            convergence_timeout: inventory.retry.convergence_timeout()?,
        })
    }

    /// Plan a run against every host's node daemon.
    pub fn over_http(inventory: &Inventory) -> Result<Self, ConfigError> {
        let timeout = inventory.retry.request_timeout()?;
        Self::new(inventory, |spec| {
            let client = NodeClient::new(spec.endpoint(&inventory.cluster)).with_timeout(timeout);
            Arc::new(client) as Arc<dyn HostControl>
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_convergence_timeout(mut self, timeout: Duration) -> Self {
        self.convergence_timeout = timeout;
        self
    }

    pub fn leader(&self) -> &HostSpec {
        &self.hosts[self.leader].spec
    }

    /// Drive every host until it is a member, or until its step fails.
    ///
    /// Never returns early on a host failure; the report carries one entry
    /// per inventory host.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> BootstrapReport {
        let leader = &self.hosts[self.leader];
        info!(
            hosts = self.hosts.len(),
            leader = %leader.spec.hostname,
            advertise = %self.advertise,
            "starting bootstrap"
        );

        let (barrier_tx, barrier_rx) = watch::channel(Barrier::Pending);

        let mut joins = JoinSet::new();
        let mut task_hosts = HashMap::new();
        for (index, host) in self.hosts.iter().enumerate() {
            if index == self.leader {
                continue;
            }
            let task = join_host(
                host.spec.clone(),
                host.control.clone(),
                self.policy.clone(),
                barrier_rx.clone(),
                shutdown.clone(),
            );
            let handle = joins.spawn(task);
            task_hosts.insert(handle.id(), host.spec.hostname.clone());
        }
        drop(barrier_rx);

        let mut outcomes: HashMap<String, (HostOutcome, Option<String>)> = HashMap::new();

        let leader_ok = match self.drive_leader(leader, &shutdown).await {
            Ok((outcome, cache)) => {
                let handle = outcome.handle();
                info!(
                    cluster_id = %handle.cluster_id,
                    noop = outcome.is_noop(),
                    "leader ready, releasing joins"
                );
                let reported = if outcome.is_noop() {
                    HostOutcome::AlreadyInitialized
                } else {
                    HostOutcome::Initialized
                };
                outcomes.insert(
                    leader.spec.hostname.clone(),
                    (reported, Some(handle.leader_node_id.clone())),
                );
                barrier_tx.send_replace(Barrier::Ready(cache));
                true
            }
            Err(e) => {
                error!(leader = %leader.spec.hostname, error = %e, "leader initialization failed");
                outcomes.insert(
                    leader.spec.hostname.clone(),
                    (HostOutcome::Failed(e.to_string()), None),
                );
                barrier_tx.send_replace(Barrier::Failed(e.to_string()));
                false
            }
        };

        while let Some(joined) = joins.join_next_with_id().await {
            match joined {
                Ok((id, (hostname, result))) => {
                    task_hosts.remove(&id);
                    let entry = match result {
                        Ok(outcome) => {
                            let node_id = Some(outcome.record().node_id.clone());
                            if outcome.is_noop() {
                                (HostOutcome::AlreadyJoined, node_id)
                            } else {
                                (HostOutcome::Joined, node_id)
                            }
                        }
                        Err(e) => {
                            warn!(%hostname, error = %e, "host did not join");
                            (HostOutcome::Failed(e.to_string()), None)
                        }
                    };
                    outcomes.insert(hostname, entry);
                }
                Err(e) => {
                    let hostname = task_hosts.remove(&e.id()).unwrap_or_default();
                    error!(%hostname, error = %e, "join task failed");
                    outcomes.insert(hostname, (HostOutcome::Failed(format!("join task: {e}")), None));
                }
            }
        }

        let hosts: Vec<HostReport> = self
            .hosts
            .iter()
            .map(|host| {
                let (outcome, node_id) = outcomes
                    .remove(&host.spec.hostname)
                    .unwrap_or((HostOutcome::Failed("aborted".into()), None));
                HostReport {
                    hostname: host.spec.hostname.clone(),
                    role: host.spec.role,
                    outcome,
                    node_id,
                }
            })
            .collect();

        let (members, converged) = if leader_ok {
            self.converge(leader, &hosts, &shutdown).await
        } else {
            (Vec::new(), false)
        };

        let report = BootstrapReport {
            hosts,
            members,
            converged,
        };
        info!(
            failed = report.failures().count(),
            members = report.members.len(),
            converged,
            "bootstrap finished"
        );
        report
    }

    async fn drive_leader(
        &self,
        leader: &PlannedHost,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(InitOutcome, Arc<TokenCache>), StepError> {
        let control = &leader.control;
        let hostname = leader.spec.hostname.as_str();

        let version = self
            .policy
            .run("ensure_runtime", shutdown, || control.ensure_runtime())
            .await?;
        debug!(%hostname, %version, "leader runtime ready");

        let outcome = self
            .policy
            .run("initialize", shutdown, || control.initialize(&self.advertise))
            .await?;

        let cache = Arc::new(TokenCache::new(control.clone()));
        for role in Role::ALL {
            self.policy
                .run("token", shutdown, || cache.get(role))
                .await?;
        }
        Ok((outcome, cache))
    }

    /// Wait for the leader's view to list every host that became a member.
    async fn converge(
        &self,
        leader: &PlannedHost,
        hosts: &[HostReport],
        shutdown: &watch::Receiver<bool>,
    ) -> (Vec<MembershipRecord>, bool) {
        let expected: Vec<String> = hosts
            .iter()
            .filter(|h| !h.outcome.is_failure())
            .map(|h| h.hostname.clone())
            .collect();

        match await_members(
            leader.control.as_ref(),
            &expected,
            &self.policy,
            self.convergence_timeout,
            shutdown,
        )
        .await
        {
            Ok(members) => (members, true),
            Err(e) => {
                warn!(error = %e, "leader view did not converge");
                let members = leader.control.members().await.unwrap_or_default();
                (members, false)
            }
        }
    }
}

/// Runtime readiness then join for one follower.
async fn join_host(
    spec: HostSpec,
    control: Arc<dyn HostControl>,
    policy: RetryPolicy,
    mut barrier: watch::Receiver<Barrier>,
    shutdown: watch::Receiver<bool>,
) -> (String, Result<JoinOutcome, StepError>) {
    let hostname = spec.hostname.clone();
    let result = async {
        let version = policy
            .run("ensure_runtime", &shutdown, || control.ensure_runtime())
            .await?;
        debug!(%hostname, %version, "runtime ready, waiting for leader");

        let tokens = wait_for_leader(&mut barrier, &shutdown).await?;
        let role = spec.role;
        let outcome = policy
            .run("join", &shutdown, || {
                let tokens = tokens.clone();
                let control = control.clone();
                async move {
                    let token = tokens.get(role).await?;
                    match control.join(&token, role).await {
                        Err(ClusterError::TokenExpiredOrRotated(detail)) => {
                            tokens.invalidate(role, &token).await;
                            Err(ClusterError::TokenExpiredOrRotated(detail))
                        }
                        other => other,
                    }
                }
            })
            .await?;
        info!(%hostname, role = %role, node_id = %outcome.record().node_id, noop = outcome.is_noop(), "host joined");
        Ok(outcome)
    }
    .await;
    (hostname, result)
}

async fn wait_for_leader(
    barrier: &mut watch::Receiver<Barrier>,
    shutdown: &watch::Receiver<bool>,
) -> Result<Arc<TokenCache>, StepError> {
    let released = async {
        let state = barrier
            .wait_for(|b| !matches!(b, Barrier::Pending))
            .await
            .map_err(|_| StepError::LeaderFailed("pipeline stopped".into()))?;
        match &*state {
            Barrier::Ready(tokens) => Ok(tokens.clone()),
            Barrier::Failed(reason) => Err(StepError::LeaderFailed(reason.clone())),
            Barrier::Pending => Err(StepError::LeaderFailed("pipeline stopped".into())),
        }
    };
    tokio::select! {
        result = released => result,
        _ = cancelled(shutdown.clone()) => Err(StepError::Aborted),
    }
}

/// Poll `control`'s member view with backoff until it lists every
/// hostname in `expected`, or `timeout` passes.
pub async fn await_members(
    control: &dyn HostControl,
    expected: &[String],
    policy: &RetryPolicy,
    timeout: Duration,
    shutdown: &watch::Receiver<bool>,
) -> Result<Vec<MembershipRecord>, StepError> {
    let deadline = Instant::now() + timeout;
    let mut missing = expected.to_vec();
    let mut attempt = 0;

    loop {
        if *shutdown.borrow() {
            return Err(StepError::Aborted);
        }
        attempt += 1;

        match tokio::time::timeout(policy.attempt_timeout, control.members()).await {
            Ok(Ok(members)) => {
                missing = expected
                    .iter()
                    .filter(|h| !members.iter().any(|m| &m.hostname == *h))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    return Ok(members);
                }
                debug!(attempt, missing = ?missing, "waiting for members");
            }
            Ok(Err(e)) if !e.is_retryable() => return Err(e.into()),
            Ok(Err(e)) => debug!(attempt, error = %e, "member view unavailable"),
            Err(_) => debug!(attempt, "member view timed out"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(StepError::NotConverged(missing));
        }
        let delay = policy.backoff(attempt).min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancelled(shutdown.clone()) => return Err(StepError::Aborted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::{ClusterSettings, RetrySettings};

    fn spec(hostname: &str, role: Role, leader: bool) -> HostSpec {
        HostSpec {
            hostname: hostname.into(),
            address: format!("{hostname}.lan"),
            ram: None,
            cpus: None,
            role,
            leader,
            api_port: None,
        }
    }

    struct Unused;

    #[async_trait::async_trait]
    impl HostControl for Unused {
        async fn ensure_runtime(&self) -> ClusterResult<String> {
            Err(ClusterError::RuntimeUnavailable("unused".into()))
        }
        async fn initialize(&self, _: &str) -> ClusterResult<InitOutcome> {
            Err(ClusterError::NotLeader("unused".into()))
        }
        async fn token(&self, _: Role) -> ClusterResult<String> {
            Ok("CRLTKN-1-unused".into())
        }
        async fn join(&self, _: &str, _: Role) -> ClusterResult<JoinOutcome> {
            Err(ClusterError::NotMember)
        }
        async fn members(&self) -> ClusterResult<Vec<MembershipRecord>> {
            Ok(Vec::new())
        }
    }

    fn inventory(hosts: Vec<HostSpec>) -> Inventory {
        Inventory {
            cluster: ClusterSettings {
                api_port: 2377,
                advertise_port: None,
            },
            retry: RetrySettings::default(),
            hosts,
        }
    }

    #[test]
    fn flagged_leader_advertises_its_endpoint() {
        let inv = inventory(vec![
            spec("swarm-master-1", Role::Manager, false),
            spec("swarm-master-2", Role::Manager, true),
            spec("swarm-worker-1", Role::Worker, false),
        ]);
        let pipeline = Pipeline::new(&inv, |_| Arc::new(Unused) as Arc<dyn HostControl>).unwrap();
        assert_eq!(pipeline.leader().hostname, "swarm-master-2");
        assert_eq!(pipeline.advertise, "swarm-master-2.lan:2377");
    }

    #[test]
    fn advertise_port_replaces_the_leader_port() {
        let mut inv = inventory(vec![
            spec("swarm-master-1", Role::Manager, false),
            spec("swarm-worker-1", Role::Worker, false),
        ]);
        inv.cluster.advertise_port = Some(4377);
        let pipeline = Pipeline::new(&inv, |_| Arc::new(Unused) as Arc<dyn HostControl>).unwrap();
        assert_eq!(pipeline.advertise, "swarm-master-1.lan:4377");
    }

    #[test]
    fn invalid_inventory_is_rejected() {
        let inv = inventory(vec![spec("swarm-worker-1", Role::Worker, false)]);
        let err = Pipeline::new(&inv, |_| Arc::new(Unused) as Arc<dyn HostControl>)
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::NoManager);
    }

    #[tokio::test]
    async fn token_cache_keeps_refreshed_tokens() {
        let cache = TokenCache::new(Arc::new(Unused));
        let token = cache.get(Role::Worker).await.unwrap();
        cache.tokens.lock().await.insert(Role::Worker, "CRLTKN-1-fresh".into());

        // A task holding the old token must not discard the fresh one.
        cache.invalidate(Role::Worker, &token).await;
        assert_eq!(cache.get(Role::Worker).await.unwrap(), "CRLTKN-1-fresh");

        cache.invalidate(Role::Worker, "CRLTKN-1-fresh").await;
        assert_eq!(cache.get(Role::Worker).await.unwrap(), "CRLTKN-1-unused");
    }

    #[tokio::test]
    async fn await_members_reports_missing_hosts() {
        let (_tx, rx) = watch::channel(false);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            attempt_timeout: Duration::from_secs(1),
        };
        let err = await_members(
            &Unused,
            &["swarm-worker-1".to_string()],
            &policy,
            Duration::from_millis(30),
            &rx,
        )
        .await
        .unwrap_err();
        match err {
            StepError::NotConverged(missing) => assert_eq!(missing, vec!["swarm-worker-1"]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
