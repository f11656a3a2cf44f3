//! In-memory cluster for testing.
//!
//! Simulates just enough of a storage cluster to drive every scenario:
//! - pools with a map version, free space, properties and containers
//! - a per-pool container quota that produces "no space" errors
//! - rebuilds that report `busy` for a few queries after each membership
//!   change, then `done` with one more version bump
//! - failure injection for creates, destroys, membership operations and
//!   restart steps
//!
//! Every mutating call is appended to an ordered event log so tests can
//! verify sequencing.

use super::ControlPlane;
use crate::bench::IoMode;
use async_trait::async_trait;
use harness_types::{
    ContainerLabel, ControlPlaneError, OperationResult, PoolHandle, PoolLabel, PoolStatus, Rank,
    RebuildState, RebuildStatus, DER_BUSY, DER_EXIST, DER_INVAL, DER_NONEXIST, DER_NOSPACE,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Something that happened on the mock cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// Pool created.
    PoolCreated(PoolLabel),
    /// Pool destroyed.
    PoolDestroyed(PoolLabel),
    /// Ranks stopped.
    RanksStopped(Vec<Rank>),
    /// Ranks excluded from a pool.
    Excluded(PoolLabel, Vec<Rank>),
    /// Targets of a rank drained.
    Drained(PoolLabel, Rank, Vec<u32>),
    /// Rank reintegrated.
    Reintegrated(PoolLabel, Rank),
    /// A rebuild finished on a pool.
    RebuildDone(PoolLabel),
    /// Client agents stopped.
    AgentsStopped,
    /// Servers restarted.
    ServersRestarted,
    /// Client agents started.
    AgentsStarted,
    /// A benchmark invocation started.
    IoStarted(ContainerLabel, IoMode),
    /// A benchmark invocation finished.
    IoFinished(ContainerLabel, IoMode),
}

/// A restart step, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RestartStep {
    /// `stop_agents`.
    StopAgents,
    /// `restart_servers`.
    RestartServers,
    /// `start_agents`.
    StartAgents,
}

#[derive(Debug)]
struct MockPool {
    status: PoolStatus,
    properties: BTreeMap<String, String>,
    containers: BTreeSet<ContainerLabel>,
    data: BTreeMap<ContainerLabel, u64>,
    drained: BTreeMap<Rank, BTreeSet<u32>>,
    rebuild: Option<PendingRebuild>,
    next_epoch: u64,
}

#[derive(Debug, Clone, Copy)]
struct PendingRebuild {
    stale_polls_left: u32,
    busy_polls_left: u32,
    completion_bump: u64,
}

#[derive(Debug)]
struct Inner {
    server_count: u32,
    targets_per_rank: u32,
    pool_capacity: u64,
    container_overhead: u64,
    container_quota: Option<usize>,
    rebuild_start_delay: u32,
    rebuild_busy_polls: u32,
    rebuild_completion_bump: u64,
    rebuild_stuck: bool,
    rebuild_suppressed: bool,
    rebuild_failure: Option<i32>,
    default_properties: BTreeMap<String, String>,
    pools: BTreeMap<PoolLabel, MockPool>,
    stopped: BTreeSet<Rank>,
    events: Vec<ClusterEvent>,
    create_attempts: u64,
    no_space_attempts: BTreeSet<u64>,
    unexpected_create: Option<(u64, i32)>,
    fail_destroy: BTreeSet<ContainerLabel>,
    fail_next_handle_cycle: Option<i32>,
    fail_next_membership: Option<OperationResult>,
    restart_errors: BTreeMap<RestartStep, Vec<String>>,
    handle_cycles: u64,
}

impl Default for Inner {
    fn default() -> Self {
        let mut default_properties = BTreeMap::new();
        default_properties.insert("reclaim".to_string(), "lazy".to_string());
        default_properties.insert("svc_ops_enabled".to_string(), "1".to_string());
        default_properties.insert("svc_ops_entry_age".to_string(), "0".to_string());
        Self {
            server_count: 4,
            targets_per_rank: 8,
            pool_capacity: 1 << 40,
            container_overhead: 4096,
            container_quota: None,
            rebuild_start_delay: 0,
            rebuild_busy_polls: 2,
            rebuild_completion_bump: 1,
            rebuild_stuck: false,
            rebuild_suppressed: false,
            rebuild_failure: None,
            default_properties,
            pools: BTreeMap::new(),
            stopped: BTreeSet::new(),
            events: Vec::new(),
            create_attempts: 0,
            no_space_attempts: BTreeSet::new(),
            unexpected_create: None,
            fail_destroy: BTreeSet::new(),
            fail_next_handle_cycle: None,
            fail_next_membership: None,
            restart_errors: BTreeMap::new(),
            handle_cycles: 0,
        }
    }
}

impl Inner {
    fn target_space(&self) -> u64 {
        let targets = u64::from(self.server_count.max(1) * self.targets_per_rank.max(1));
        self.pool_capacity / targets
    }

    fn validate_rank(&self, operation: &str, rank: Rank) -> Result<(), ControlPlaneError> {
        if rank.id() >= self.server_count {
            return Err(ControlPlaneError::status(
                operation,
                DER_INVAL,
                format!("invalid rank {}", rank),
            ));
        }
        Ok(())
    }

    fn pool_mut(
        &mut self,
        operation: &str,
        label: &PoolLabel,
    ) -> Result<&mut MockPool, ControlPlaneError> {
        self.pools.get_mut(label).ok_or_else(|| {
            ControlPlaneError::status(operation, DER_NONEXIST, format!("pool {} not found", label))
        })
    }

    /// Map change: bump the version now and start a rebuild that bumps it
    /// again on completion.
    fn start_rebuild(&mut self, label: &PoolLabel) {
        if self.rebuild_suppressed {
            return;
        }
        let stale_polls = self.rebuild_start_delay;
        let busy_polls = self.rebuild_busy_polls;
        let completion_bump = self.rebuild_completion_bump;
        if let Some(pool) = self.pools.get_mut(label) {
            pool.status.version += 1;
            pool.rebuild = Some(PendingRebuild {
                stale_polls_left: stale_polls,
                busy_polls_left: busy_polls,
                completion_bump,
            });
        }
    }

    fn take_membership_failure(&mut self, operation: &str) -> Option<OperationResult> {
        self.fail_next_membership.take().map(|mut result| {
            result.operation = operation.to_string();
            result
        })
    }
}

/// In-memory [`ControlPlane`].
#[derive(Debug, Default)]
pub struct MockCluster {
    inner: Arc<Mutex<Inner>>,
}

impl Clone for MockCluster {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl MockCluster {
    /// Create a four-rank cluster with eight targets per rank.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Set the number of engine ranks.
    pub fn with_server_count(self, count: u32) -> Self {
        self.lock().server_count = count;
        self
    }

    /// Allow at most `quota` containers per pool; further creates fail with
    /// "no space".
    pub fn with_container_quota(self, quota: usize) -> Self {
        self.lock().container_quota = Some(quota);
        self
    }

    /// Number of queries after a membership change that still report the
    /// previous rebuild status before the new rebuild shows as `busy`.
    pub fn with_rebuild_start_delay(self, polls: u32) -> Self {
        self.lock().rebuild_start_delay = polls;
        self
    }

    /// Number of queries a rebuild reports `busy` before finishing.
    pub fn with_rebuild_busy_polls(self, polls: u32) -> Self {
        self.lock().rebuild_busy_polls = polls;
        self
    }

    /// Version bump applied when a rebuild finishes.
    pub fn with_rebuild_completion_bump(self, bump: u64) -> Self {
        self.lock().rebuild_completion_bump = bump;
        self
    }

    /// Property every new pool starts with.
    pub fn with_default_property(self, name: &str, value: &str) -> Self {
        self.lock()
            .default_properties
            .insert(name.to_string(), value.to_string());
        self
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// Rebuilds never finish.
    pub fn stick_rebuild(&self) {
        self.lock().rebuild_stuck = true;
    }

    /// Membership changes do not start a rebuild or bump the version.
    pub fn suppress_rebuild(&self) {
        self.lock().rebuild_suppressed = true;
    }

    /// Rebuilds finish with return code `code`.
    pub fn fail_rebuild(&self, code: i32) {
        self.lock().rebuild_failure = Some(code);
    }

    /// Fail the given 1-based create attempt with "no space" regardless of
    /// quota.
    pub fn no_space_on_attempt(&self, attempt: u64) {
        self.lock().no_space_attempts.insert(attempt);
    }

    /// Fail the given 1-based create attempt with `code`.
    pub fn fail_create_on_attempt(&self, attempt: u64, code: i32) {
        self.lock().unexpected_create = Some((attempt, code));
    }

    /// Fail every destroy of `label` with a busy error.
    pub fn fail_destroy(&self, label: &ContainerLabel) {
        self.lock().fail_destroy.insert(label.clone());
    }

    /// Fail the next container handle open/close cycle with `code`.
    pub fn fail_next_handle_cycle(&self, code: i32) {
        self.lock().fail_next_handle_cycle = Some(code);
    }

    /// Return `result` from the next drain, reintegrate or exclude.
    pub fn fail_next_membership(&self, result: OperationResult) {
        self.lock().fail_next_membership = Some(result);
    }

    /// Report `errors` from a restart step.
    pub fn fail_restart_step(&self, step: RestartStep, errors: Vec<String>) {
        self.lock().restart_errors.insert(step, errors);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Every event so far, in order.
    pub fn events(&self) -> Vec<ClusterEvent> {
        self.lock().events.clone()
    }

    /// Append an event (used by [`crate::bench::MockBenchmark`]).
    pub fn record(&self, event: ClusterEvent) {
        self.lock().events.push(event);
    }

    /// Ranks currently stopped.
    pub fn stopped_ranks(&self) -> Vec<Rank> {
        self.lock().stopped.iter().copied().collect()
    }

    /// Containers currently in `pool`.
    pub fn containers(&self, pool: &PoolLabel) -> Vec<ContainerLabel> {
        self.lock()
            .pools
            .get(pool)
            .map(|p| p.containers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Pools that exist.
    pub fn pools(&self) -> Vec<PoolLabel> {
        self.lock().pools.keys().cloned().collect()
    }

    /// Charge `bytes` of data written to `container` against `pool`'s free
    /// space. The space comes back when the container is destroyed.
    pub fn consume_space(
        &self,
        pool: &PoolLabel,
        container: &ContainerLabel,
        bytes: u64,
    ) -> Result<(), ControlPlaneError> {
        let mut inner = self.lock();
        let entry = inner.pool_mut("container write", pool)?;
        if entry.status.free_space < bytes {
            return Err(ControlPlaneError::status(
                "container write",
                DER_NOSPACE,
                "No space on storage target",
            ));
        }
        entry.status.free_space -= bytes;
        *entry.data.entry(container.clone()).or_default() += bytes;
        Ok(())
    }

    /// Current status of `pool` without advancing any rebuild.
    pub fn peek(&self, pool: &PoolLabel) -> Option<PoolStatus> {
        self.lock().pools.get(pool).map(|p| p.status.clone())
    }

    /// Create attempts so far, across pools.
    pub fn create_attempts(&self) -> u64 {
        self.lock().create_attempts
    }

    /// Container opens so far.
    pub fn handle_cycles(&self) -> u64 {
        self.lock().handle_cycles
    }

    /// Whether `container` in `pool` exists.
    pub fn has_container(&self, pool: &PoolLabel, container: &ContainerLabel) -> bool {
        self.lock()
            .pools
            .get(pool)
            .is_some_and(|p| p.containers.contains(container))
    }
}

#[async_trait]
impl ControlPlane for MockCluster {
    async fn create_pool(
        &self,
        label: &PoolLabel,
        _size: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<PoolHandle, ControlPlaneError> {
        let mut inner = self.lock();
        if inner.pools.contains_key(label) {
            return Err(ControlPlaneError::status(
                "pool create",
                DER_EXIST,
                format!("pool {} exists", label),
            ));
        }
        let mut merged = inner.default_properties.clone();
        merged.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));

        let capacity = inner.pool_capacity;
        inner.pools.insert(
            label.clone(),
            MockPool {
                status: PoolStatus {
                    version: 1,
                    total_space: capacity,
                    free_space: capacity,
                    rebuild: RebuildStatus::new(RebuildState::Idle),
                },
                properties: merged,
                containers: BTreeSet::new(),
                data: BTreeMap::new(),
                drained: BTreeMap::new(),
                rebuild: None,
                next_epoch: 1,
            },
        );
        inner.events.push(ClusterEvent::PoolCreated(label.clone()));

        let svc_ranks = (0..inner.server_count.min(3)).map(Rank::new).collect();
        Ok(PoolHandle {
            label: label.clone(),
            svc_ranks,
            properties: properties.clone(),
        })
    }

    async fn destroy_pool(&self, pool: &PoolLabel) -> Result<(), ControlPlaneError> {
        let mut inner = self.lock();
        if inner.pools.remove(pool).is_none() {
            return Err(ControlPlaneError::status(
                "pool destroy",
                DER_NONEXIST,
                format!("pool {} not found", pool),
            ));
        }
        inner.events.push(ClusterEvent::PoolDestroyed(pool.clone()));
        Ok(())
    }

    async fn query_pool(&self, pool: &PoolLabel) -> Result<PoolStatus, ControlPlaneError> {
        let mut inner = self.lock();
        let stuck = inner.rebuild_stuck;
        let failure = inner.rebuild_failure;
        let entry = inner.pool_mut("pool query", pool)?;

        let mut finished = false;
        if let Some(rebuild) = entry.rebuild.as_mut() {
            if rebuild.stale_polls_left > 0 {
                rebuild.stale_polls_left -= 1;
            } else if stuck || rebuild.busy_polls_left > 0 {
                rebuild.busy_polls_left = rebuild.busy_polls_left.saturating_sub(1);
                entry.status.rebuild = RebuildStatus::new(RebuildState::Busy);
            } else {
                entry.status.version += rebuild.completion_bump;
                entry.status.rebuild = RebuildStatus {
                    state: RebuildState::Done,
                    status: failure.unwrap_or(0),
                };
                entry.rebuild = None;
                finished = true;
            }
        }
        let status = entry.status.clone();
        if finished {
            inner.events.push(ClusterEvent::RebuildDone(pool.clone()));
        }
        Ok(status)
    }

    async fn set_property(
        &self,
        pool: &PoolLabel,
        name: &str,
        value: &str,
    ) -> Result<(), ControlPlaneError> {
        let mut inner = self.lock();
        let entry = inner.pool_mut("pool set-prop", pool)?;
        entry.properties.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn get_property(
        &self,
        pool: &PoolLabel,
        name: &str,
    ) -> Result<String, ControlPlaneError> {
        let mut inner = self.lock();
        let entry = inner.pool_mut("pool get-prop", pool)?;
        entry.properties.get(name).cloned().ok_or_else(|| {
            ControlPlaneError::status(
                "pool get-prop",
                DER_NONEXIST,
                format!("property {} not set", name),
            )
        })
    }

    async fn stop_ranks(&self, ranks: &[Rank], _force: bool) -> Result<(), ControlPlaneError> {
        let mut inner = self.lock();
        for rank in ranks {
            inner.validate_rank("system stop", *rank)?;
        }
        let space = inner.target_space() * u64::from(inner.targets_per_rank);
        let newly_stopped = ranks.iter().filter(|r| inner.stopped.insert(**r)).count() as u64;
        let labels: Vec<PoolLabel> = inner.pools.keys().cloned().collect();
        for label in &labels {
            if let Some(pool) = inner.pools.get_mut(label) {
                pool.status.free_space = pool
                    .status
                    .free_space
                    .saturating_sub(space * newly_stopped);
            }
            inner.start_rebuild(label);
        }
        inner.events.push(ClusterEvent::RanksStopped(ranks.to_vec()));
        Ok(())
    }

    async fn exclude(
        &self,
        pool: &PoolLabel,
        ranks: &[Rank],
    ) -> Result<OperationResult, ControlPlaneError> {
        let mut inner = self.lock();
        for rank in ranks {
            inner.validate_rank("pool exclude", *rank)?;
        }
        if let Some(failure) = inner.take_membership_failure("pool exclude") {
            return Ok(failure);
        }
        let per_rank = inner.target_space() * u64::from(inner.targets_per_rank);
        let all_targets: BTreeSet<u32> = (0..inner.targets_per_rank).collect();
        let entry = inner.pool_mut("pool exclude", pool)?;
        for rank in ranks {
            entry.drained.insert(*rank, all_targets.clone());
        }
        entry.status.free_space = entry
            .status
            .free_space
            .saturating_sub(per_rank * ranks.len() as u64);
        inner.start_rebuild(pool);
        inner
            .events
            .push(ClusterEvent::Excluded(pool.clone(), ranks.to_vec()));
        Ok(OperationResult::ok("pool exclude", "Exclude command succeeded"))
    }

    async fn drain(
        &self,
        pool: &PoolLabel,
        rank: Rank,
        targets: Option<&[u32]>,
    ) -> Result<OperationResult, ControlPlaneError> {
        let mut inner = self.lock();
        inner.validate_rank("pool drain", rank)?;
        if let Some(failure) = inner.take_membership_failure("pool drain") {
            return Ok(failure);
        }
        let targets: Vec<u32> = match targets {
            Some(targets) => targets.to_vec(),
            None => (0..inner.targets_per_rank).collect(),
        };
        let per_target = inner.target_space();
        let entry = inner.pool_mut("pool drain", pool)?;
        let drained = entry.drained.entry(rank).or_default();
        let added = targets.iter().filter(|t| drained.insert(**t)).count() as u64;
        entry.status.free_space = entry.status.free_space.saturating_sub(per_target * added);
        inner.start_rebuild(pool);
        inner
            .events
            .push(ClusterEvent::Drained(pool.clone(), rank, targets));
        Ok(OperationResult::ok("pool drain", "Drain command succeeded"))
    }

    async fn reintegrate(
        &self,
        pool: &PoolLabel,
        rank: Rank,
        targets: Option<&[u32]>,
    ) -> Result<OperationResult, ControlPlaneError> {
        let mut inner = self.lock();
        inner.validate_rank("pool reintegrate", rank)?;
        if let Some(failure) = inner.take_membership_failure("pool reintegrate") {
            return Ok(failure);
        }
        let per_target = inner.target_space();
        let entry = inner.pool_mut("pool reintegrate", pool)?;
        let restored = match (entry.drained.get_mut(&rank), targets) {
            (Some(drained), Some(targets)) => {
                targets.iter().filter(|t| drained.remove(*t)).count() as u64
            }
            (Some(drained), None) => {
                let count = drained.len() as u64;
                drained.clear();
                count
            }
            (None, _) => 0,
        };
        entry.status.free_space += per_target * restored;
        inner.start_rebuild(pool);
        inner
            .events
            .push(ClusterEvent::Reintegrated(pool.clone(), rank));
        Ok(OperationResult::ok(
            "pool reintegrate",
            "Reintegration command succeeded",
        ))
    }

    async fn create_container(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError> {
        let mut inner = self.lock();
        inner.create_attempts += 1;
        let attempt = inner.create_attempts;
        if let Some((at, code)) = inner.unexpected_create {
            if at == attempt {
                return Err(ControlPlaneError::status(
                    "container create",
                    code,
                    "injected failure",
                ));
            }
        }
        let forced_no_space = inner.no_space_attempts.contains(&attempt);
        let quota = inner.container_quota;
        let overhead = inner.container_overhead;
        let entry = inner.pool_mut("container create", pool)?;
        if entry.containers.contains(label) {
            return Err(ControlPlaneError::status(
                "container create",
                DER_EXIST,
                format!("container {} exists", label),
            ));
        }
        let over_quota = quota.is_some_and(|q| entry.containers.len() >= q);
        if forced_no_space || over_quota || entry.status.free_space < overhead {
            return Err(ControlPlaneError::status(
                "container create",
                DER_NOSPACE,
                "No space on storage target",
            ));
        }
        entry.containers.insert(label.clone());
        entry.status.free_space -= overhead;
        Ok(())
    }

    async fn destroy_container(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError> {
        let mut inner = self.lock();
        if inner.fail_destroy.contains(label) {
            return Err(ControlPlaneError::status(
                "container destroy",
                DER_BUSY,
                format!("container {} busy", label),
            ));
        }
        let overhead = inner.container_overhead;
        let entry = inner.pool_mut("container destroy", pool)?;
        if !entry.containers.remove(label) {
            return Err(ControlPlaneError::status(
                "container destroy",
                DER_NONEXIST,
                format!("container {} not found", label),
            ));
        }
        let data = entry.data.remove(label).unwrap_or(0);
        entry.status.free_space += overhead + data;
        Ok(())
    }

    async fn cycle_container_handle(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError> {
        let mut inner = self.lock();
        if let Some(code) = inner.fail_next_handle_cycle.take() {
            return Err(ControlPlaneError::status(
                "container open/close",
                code,
                "injected failure",
            ));
        }
        let entry = inner.pool_mut("container open/close", pool)?;
        if !entry.containers.contains(label) {
            return Err(ControlPlaneError::status(
                "container open/close",
                DER_NONEXIST,
                format!("container {} not found", label),
            ));
        }
        inner.handle_cycles += 1;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<u64, ControlPlaneError> {
        let mut inner = self.lock();
        let entry = inner.pool_mut("container create-snap", pool)?;
        if !entry.containers.contains(label) {
            return Err(ControlPlaneError::status(
                "container create-snap",
                DER_NONEXIST,
                format!("container {} not found", label),
            ));
        }
        let epoch = entry.next_epoch;
        entry.next_epoch += 1;
        Ok(epoch)
    }

    async fn check_container(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError> {
        let mut inner = self.lock();
        let entry = inner.pool_mut("container check", pool)?;
        if !entry.containers.contains(label) {
            return Err(ControlPlaneError::status(
                "container check",
                DER_NONEXIST,
                format!("container {} not found", label),
            ));
        }
        Ok(())
    }

    async fn stop_agents(&self) -> Result<Vec<String>, ControlPlaneError> {
        let mut inner = self.lock();
        inner.events.push(ClusterEvent::AgentsStopped);
        Ok(inner
            .restart_errors
            .remove(&RestartStep::StopAgents)
            .unwrap_or_default())
    }

    async fn restart_servers(&self) -> Result<Vec<String>, ControlPlaneError> {
        let mut inner = self.lock();
        let errors = inner
            .restart_errors
            .remove(&RestartStep::RestartServers)
            .unwrap_or_default();
        if errors.is_empty() {
            inner.stopped.clear();
            inner.events.push(ClusterEvent::ServersRestarted);
        }
        Ok(errors)
    }

    async fn start_agents(&self) -> Result<Vec<String>, ControlPlaneError> {
        let mut inner = self.lock();
        inner.events.push(ClusterEvent::AgentsStarted);
        Ok(inner
            .restart_errors
            .remove(&RestartStep::StartAgents)
            .unwrap_or_default())
    }
}
