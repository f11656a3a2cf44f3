//! Offline drain.
//!
//! Every pool is created with `reclaim=disabled`. For each configured rank
//! a random adjacent target pair is drained, the pool must converge, its
//! version must advance by at least 2 and its free space must drop. With
//! more than one pool the same targets are reintegrated afterwards.
//!
//! Variants (see [`DrainConfig`](crate::config::DrainConfig)): write data
//! first and verify it at the end, snapshot the written containers, drain
//! while aggregation reclaims space, drain while a rank exclusion is
//! rebuilding, fill the pool to a percentage of its capacity and drain a
//! single rank.
//!
//! In the aggregation variant the whole first rank is drained and
//! reintegrated in a loop before its targets are drained, so rebuilds keep
//! running while reclaim frees the destroyed data.

use crate::capacity::CapacitySnapshot;
use crate::controller::{check_result, FaultMode};
use crate::convergence::RebuildSession;
use crate::driver::ScenarioDriver;
use crate::error::ScenarioError;
use crate::workload::{InvocationTemplate, StreamSpec};
use harness_client::{parse_size, IoMode};
use harness_core::ContainerRegistry;
use harness_types::{ContainerLabel, PoolLabel, Rank};
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Instant;

/// Highest first index of the drained target pair.
const MAX_FIRST_TARGET: u32 = 6;

/// Minimum version advance for one drain: the map change plus the rebuild.
const DRAIN_VERSION_DELTA: u64 = 2;

struct DrainPool {
    pool: PoolLabel,
    registry: ContainerRegistry,
    data: Vec<StreamSpec>,
    extra: Vec<ContainerLabel>,
    filled: bool,
}

impl ScenarioDriver {
    /// Run the offline drain scenario.
    pub async fn offline_drain(&mut self) -> Result<(), ScenarioError> {
        let drain = self.config.drain.clone();
        let first = self.rng.gen_range(0..=MAX_FIRST_TARGET);
        let targets = [first, first + 1];
        tracing::info!(?targets, "Selected drain targets");

        let mut pools = Vec::with_capacity(drain.pool_count.max(1));
        for _ in 0..drain.pool_count.max(1) {
            pools.push(self.prepare_drain_pool().await?);
        }

        for (pool_index, entry) in pools.iter_mut().enumerate() {
            for (index, rank) in drain.ranks.iter().copied().map(Rank::new).enumerate() {
                if drain.pool_fillup > 0 && index > 0 {
                    tracing::info!(%rank, "Pool was filled; skipping further drains");
                    break;
                }
                self.drain_rank(entry, pool_index, index, rank, &targets)
                    .await?;
            }
        }

        self.display_space("Pool space at the End").await?;
        self.capacity.set_aggregation(false);

        if drain.data {
            for entry in &pools {
                self.verify_drain_data(entry).await?;
            }
        }
        Ok(())
    }

    async fn prepare_drain_pool(&mut self) -> Result<DrainPool, ScenarioError> {
        let mut properties = BTreeMap::new();
        properties.insert("reclaim".to_string(), "disabled".to_string());
        let pool = self.create_pool(&properties).await?.label;
        let mut entry = DrainPool {
            registry: self.registry_for(&pool),
            pool,
            data: Vec::new(),
            extra: Vec::new(),
            filled: false,
        };

        let drain = self.config.drain.clone();
        if !drain.data {
            return Ok(entry);
        }

        let stream = if drain.pool_fillup > 0 {
            entry.filled = true;
            self.fill_pool(&mut entry, drain.pool_fillup).await?
        } else {
            let block_size = self.config.workload.block_size.clone();
            let stream = self.drain_write(&mut entry.registry, block_size);
            self.run_streams(&mut entry.registry, vec![stream.clone()])
                .await?;
            stream
        };

        if drain.with_snapshot {
            for label in stream.labels() {
                let epoch = self
                    .control
                    .create_snapshot(&entry.pool, &label)
                    .await
                    .map_err(|e| ScenarioError::unexpected("container create-snap", e))?;
                tracing::info!(container = %label, epoch, "Created container snapshot");
            }
        }
        entry.data.push(stream);

        if drain.during_aggregation {
            let block_size = self.config.workload.block_size.clone();
            let extra = self.drain_write(&mut entry.registry, block_size);
            entry.extra = extra.labels();
            self.run_streams(&mut entry.registry, vec![extra]).await?;
        }
        Ok(entry)
    }

    /// Write one container until `percent` of the pool's capacity is in use.
    async fn fill_pool(
        &self,
        entry: &mut DrainPool,
        percent: u32,
    ) -> Result<StreamSpec, ScenarioError> {
        let status = self
            .control
            .query_pool(&entry.pool)
            .await
            .map_err(|e| ScenarioError::unexpected("pool query", e))?;
        let bytes = status.bytes_to_fill(percent);
        tracing::info!(
            pool = %entry.pool,
            used_percent = status.used_percent(),
            target_percent = percent,
            bytes,
            "Filling pool"
        );

        let block_size = self.fill_block_size(bytes)?;
        let stream = self.drain_write(&mut entry.registry, block_size);
        self.run_streams(&mut entry.registry, vec![stream.clone()])
            .await?;

        let status = self
            .control
            .query_pool(&entry.pool)
            .await
            .map_err(|e| ScenarioError::unexpected("pool query", e))?;
        tracing::info!(pool = %entry.pool, used_percent = status.used_percent(), "Pool filled");
        if status.used_percent() < f64::from(percent) {
            return Err(ScenarioError::invariant(
                "pool fill",
                format!(
                    "pool {} is {:.1}% used, expected at least {}%",
                    entry.pool,
                    status.used_percent(),
                    percent
                ),
            ));
        }
        Ok(stream)
    }

    /// Per-process block size covering `bytes`, in whole transfers.
    fn fill_block_size(&self, bytes: u64) -> Result<String, ScenarioError> {
        let workload = &self.config.workload;
        let transfer = parse_size(&workload.transfer_size)
            .filter(|t| *t > 0)
            .ok_or_else(|| {
                ScenarioError::invariant(
                    "pool fill",
                    format!("unreadable transfer size {:?}", workload.transfer_size),
                )
            })?;
        let per_process = bytes.div_ceil(u64::from(workload.processes.max(1)));
        Ok((per_process.div_ceil(transfer).max(1) * transfer).to_string())
    }

    fn drain_write(&self, registry: &mut ContainerRegistry, block_size: String) -> StreamSpec {
        let workload = &self.config.workload;
        let template = InvocationTemplate {
            pool: registry.pool().clone(),
            mode: IoMode::Write,
            flags: workload.write_flags.clone(),
            oclass: Some(
                self.config
                    .drain
                    .oclass
                    .clone()
                    .unwrap_or_else(|| workload.oclass.clone()),
            ),
            transfer_size: Some(workload.transfer_size.clone()),
            block_size: Some(block_size),
            processes: workload.processes,
        };
        StreamSpec {
            stream_index: 0,
            items: vec![template.for_container(registry.reserve())],
        }
    }

    async fn drain_rank(
        &mut self,
        entry: &mut DrainPool,
        pool_index: usize,
        index: usize,
        rank: Rank,
        targets: &[u32],
    ) -> Result<(), ScenarioError> {
        let drain = self.config.drain.clone();
        let pool = entry.pool.clone();
        let before = self.query_snapshot(&pool).await?;
        tracing::info!(pool = %pool, version = before.version, "Pool version at the beginning");

        if drain.during_aggregation && index == 0 {
            tracing::info!(pool = %pool, "Enabling aggregation before drain");
            self.control
                .set_property(&pool, "reclaim", "time")
                .await
                .map_err(|e| ScenarioError::unexpected("pool set-prop", e))?;
            for label in std::mem::take(&mut entry.extra) {
                self.lifecycle
                    .destroy_one(&mut entry.registry, &label)
                    .await?;
            }
            self.capacity.set_aggregation(true);
            self.cycle_rank(&pool, rank).await?;
        }

        let excluded = drain.during_rebuild && pool_index == 0 && index == 0;
        if excluded {
            let rebuild_rank = Rank::new(drain.rebuild_rank);
            let mut session = self
                .controller
                .inject_fault(&pool, &[rebuild_rank], FaultMode::Exclude, false)
                .await?;
            self.waiter
                .wait_for_start(&mut session, self.config.convergence.start_timeout())
                .await?;
        }

        let baseline = self.query_snapshot(&pool).await?.version;
        let result = self.controller.drain(&pool, rank, Some(targets)).await?;
        check_result(&result)?;
        self.wait_settled(&pool, rank, baseline).await?;

        let after = self.query_snapshot(&pool).await?;
        tracing::info!(pool = %pool, version = after.version, "Pool version after drain");
        self.capacity
            .check_version_advanced(&before, &after, DRAIN_VERSION_DELTA)
            .into_result()?;
        self.capacity
            .check_space_decreased(&before, &after)
            .into_result()?;

        if drain.pool_count > 1 {
            self.reintegrate_and_check(&pool, rank, Some(targets), &after)
                .await?;
        }
        if excluded {
            self.reintegrate_and_check(&pool, Rank::new(drain.rebuild_rank), None, &after)
                .await?;
        }
        Ok(())
    }

    /// Drain and reintegrate the whole of `rank` until the aggregation cycle
    /// time has passed. At least one cycle runs.
    async fn cycle_rank(&self, pool: &PoolLabel, rank: Rank) -> Result<(), ScenarioError> {
        let deadline = Instant::now() + self.config.drain.aggregation_cycle();
        let mut cycles = 0u32;
        loop {
            let baseline = self.query_snapshot(pool).await?.version;
            let result = self.controller.drain(pool, rank, None).await?;
            check_result(&result)?;
            self.wait_settled(pool, rank, baseline).await?;

            let baseline = self.query_snapshot(pool).await?.version;
            let result = self.controller.reintegrate(pool, rank, None).await?;
            check_result(&result)?;
            self.wait_settled(pool, rank, baseline).await?;

            cycles += 1;
            if Instant::now() >= deadline {
                break;
            }
        }
        tracing::info!(pool = %pool, %rank, cycles, "Finished drain cycles during aggregation");
        Ok(())
    }

    async fn wait_settled(
        &self,
        pool: &PoolLabel,
        rank: Rank,
        baseline: u64,
    ) -> Result<(), ScenarioError> {
        let mut session = RebuildSession::new(pool.clone(), vec![rank], baseline);
        self.waiter
            .wait_for_rebuild(&mut session, &self.config.convergence)
            .await
    }

    async fn reintegrate_and_check(
        &self,
        pool: &PoolLabel,
        rank: Rank,
        targets: Option<&[u32]>,
        drained: &CapacitySnapshot,
    ) -> Result<(), ScenarioError> {
        let baseline = self.query_snapshot(pool).await?.version;
        let result = self.controller.reintegrate(pool, rank, targets).await?;
        check_result(&result)?;
        self.wait_settled(pool, rank, baseline).await?;

        let reintegrated = self.query_snapshot(pool).await?;
        tracing::info!(
            pool = %pool,
            %rank,
            free_space = reintegrated.total_space,
            "Pool space after reintegration"
        );
        self.capacity
            .check_space_increased(drained, &reintegrated)
            .into_result()
    }

    async fn verify_drain_data(&self, entry: &DrainPool) -> Result<(), ScenarioError> {
        let read: Vec<StreamSpec> = entry
            .data
            .iter()
            .filter_map(|s| s.to_read(&self.config.workload.read_flags, 0))
            .collect();
        self.workloads.run(read).await?;
        if entry.filled {
            return Ok(());
        }

        for label in entry.data.iter().flat_map(|s| s.labels()) {
            tracing::info!(pool = %entry.pool, container = %label, "Checking container");
            self.control
                .check_container(&entry.pool, &label)
                .await
                .map_err(|e| ScenarioError::unexpected("container check", e))?;
        }
        Ok(())
    }

    async fn query_snapshot(&self, pool: &PoolLabel) -> Result<CapacitySnapshot, ScenarioError> {
        self.capacity
            .snapshot(pool)
            .await
            .map_err(|e| ScenarioError::unexpected("pool query", e))
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::ScenarioKind;
    use crate::scenarios::support::{fast_config, mock_driver};
    use harness_client::{ClusterEvent, IoMode, MockCluster};
    use harness_types::{OperationResult, Rank};

    fn drained(events: &[ClusterEvent]) -> Vec<(Rank, Vec<u32>)> {
        events
            .iter()
            .filter_map(|e| match e {
                ClusterEvent::Drained(_, rank, targets) => Some((*rank, targets.clone())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn drain_advances_version_and_reads_back() {
        let cluster = MockCluster::new();
        let mut config = fast_config();
        config.drain.with_snapshot = true;
        let (mut driver, bench) = mock_driver(cluster.clone(), config);

        let report = driver.run(ScenarioKind::OfflineDrain).await;
        assert!(report.passed, "{}", report);

        let drains = drained(&cluster.events());
        assert_eq!(drains.len(), 1);
        let (rank, targets) = &drains[0];
        assert_eq!(*rank, Rank::new(1));
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1], targets[0] + 1);
        assert!(targets[0] <= 6);

        let modes: Vec<IoMode> = bench.invocations().iter().map(|i| i.mode).collect();
        assert_eq!(modes, vec![IoMode::Write, IoMode::Read]);
    }

    #[tokio::test]
    async fn same_seed_drains_same_targets() {
        let first = MockCluster::new();
        let second = MockCluster::new();
        let (mut a, _) = mock_driver(first.clone(), fast_config());
        let (mut b, _) = mock_driver(second.clone(), fast_config());
        assert!(a.run(ScenarioKind::OfflineDrain).await.passed);
        assert!(b.run(ScenarioKind::OfflineDrain).await.passed);
        assert_eq!(drained(&first.events()), drained(&second.events()));
    }

    #[tokio::test]
    async fn single_version_bump_fails_drain() {
        let cluster = MockCluster::new().with_rebuild_completion_bump(0);
        let (mut driver, _bench) = mock_driver(cluster.clone(), fast_config());
        let report = driver.run(ScenarioKind::OfflineDrain).await;
        assert!(!report.passed);
        assert!(report.messages[0].contains("version"), "{}", report);
        assert!(cluster.pools().is_empty());
    }

    #[tokio::test]
    async fn multiple_pools_reintegrate_drained_targets() {
        let cluster = MockCluster::new();
        let mut config = fast_config();
        config.drain.pool_count = 2;
        config.drain.ranks = vec![1, 2];
        let (mut driver, _bench) = mock_driver(cluster.clone(), config);

        let report = driver.run(ScenarioKind::OfflineDrain).await;
        assert!(report.passed, "{}", report);

        let events = cluster.events();
        assert_eq!(drained(&events).len(), 4);
        let reintegrated = events
            .iter()
            .filter(|e| matches!(e, ClusterEvent::Reintegrated(..)))
            .count();
        assert_eq!(reintegrated, 4);
    }

    #[tokio::test]
    async fn drain_during_rebuild_excludes_then_reintegrates() {
        let cluster = MockCluster::new();
        let mut config = fast_config();
        config.drain.during_rebuild = true;
        let (mut driver, _bench) = mock_driver(cluster.clone(), config);

        let report = driver.run(ScenarioKind::OfflineDrain).await;
        assert!(report.passed, "{}", report);

        let events = cluster.events();
        let excluded = events
            .iter()
            .position(|e| matches!(e, ClusterEvent::Excluded(_, ranks) if ranks == &[Rank::new(3)]))
            .unwrap();
        let drain = events
            .iter()
            .position(|e| matches!(e, ClusterEvent::Drained(..)))
            .unwrap();
        let reintegrated = events
            .iter()
            .position(|e| matches!(e, ClusterEvent::Reintegrated(_, rank) if *rank == Rank::new(3)))
            .unwrap();
        assert!(excluded < drain && drain < reintegrated);
    }

    #[tokio::test]
    async fn drain_during_aggregation_destroys_extra_data() {
        let cluster = MockCluster::new();
        let mut config = fast_config();
        config.drain.during_aggregation = true;
        let (mut driver, bench) = mock_driver(cluster.clone(), config);

        let report = driver.run(ScenarioKind::OfflineDrain).await;
        assert!(report.passed, "{}", report);

        let invocations = bench.invocations();
        let writes: Vec<_> = invocations
            .iter()
            .filter(|i| i.mode == IoMode::Write)
            .collect();
        let reads: Vec<_> = invocations
            .iter()
            .filter(|i| i.mode == IoMode::Read)
            .collect();
        assert_eq!(writes.len(), 2);
        // Only the original dataset is read back.
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].container, writes[0].container);
        assert!(!driver.capacity.aggregating());
    }

    #[tokio::test]
    async fn filled_pool_drains_first_rank_and_reads_fill_back() {
        let cluster = MockCluster::new();
        let mut config = fast_config();
        config.drain.pool_fillup = 50;
        config.drain.ranks = vec![1, 2];
        let (mut driver, bench) = mock_driver(cluster.clone(), config);

        let report = driver.run(ScenarioKind::OfflineDrain).await;
        assert!(report.passed, "{}", report);
        assert_eq!(drained(&cluster.events()).len(), 1);

        // An empty 1 TiB pool needs 512 GiB in whole 256K transfers.
        let invocations = bench.invocations();
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0].mode, IoMode::Write);
        assert_eq!(
            invocations[0].block_size.as_deref(),
            Some((1u64 << 39).to_string().as_str())
        );
        assert_eq!(invocations[1].mode, IoMode::Read);
        assert_eq!(invocations[1].container, invocations[0].container);
        assert_eq!(invocations[1].block_size, invocations[0].block_size);
    }

    #[tokio::test]
    async fn unreadable_transfer_size_stops_fill() {
        let cluster = MockCluster::new();
        let mut config = fast_config();
        config.drain.pool_fillup = 50;
        config.workload.transfer_size = "lots".into();
        let (mut driver, bench) = mock_driver(cluster.clone(), config);

        let report = driver.run(ScenarioKind::OfflineDrain).await;
        assert!(!report.passed);
        assert!(report.messages[0].contains("unreadable transfer size"), "{}", report);
        assert!(bench.invocations().is_empty());
        assert!(drained(&cluster.events()).is_empty());
    }

    #[tokio::test]
    async fn aggregation_cycles_whole_rank_before_target_drain() {
        let cluster = MockCluster::new();
        let mut config = fast_config();
        config.drain.during_aggregation = true;
        let (mut driver, _bench) = mock_driver(cluster.clone(), config);

        let report = driver.run(ScenarioKind::OfflineDrain).await;
        assert!(report.passed, "{}", report);

        let events = cluster.events();
        let membership: Vec<&ClusterEvent> = events
            .iter()
            .filter(|e| matches!(e, ClusterEvent::Drained(..) | ClusterEvent::Reintegrated(..)))
            .collect();
        assert_eq!(membership.len(), 3);
        assert!(
            matches!(membership[0], ClusterEvent::Drained(_, rank, targets) if *rank == Rank::new(1) && targets.len() == 8)
        );
        assert!(matches!(membership[1], ClusterEvent::Reintegrated(_, rank) if *rank == Rank::new(1)));
        assert!(
            matches!(membership[2], ClusterEvent::Drained(_, rank, targets) if *rank == Rank::new(1) && targets.len() == 2)
        );
    }

    #[tokio::test]
    async fn failed_drain_does_not_leave_aggregation_enabled() {
        let cluster = MockCluster::new();
        let mut config = fast_config();
        config.drain.during_aggregation = true;
        let (mut driver, _bench) = mock_driver(cluster.clone(), config);

        cluster.fail_next_membership(OperationResult {
            operation: String::new(),
            status: -1003,
            error: Some("DER_INVAL".into()),
            output: String::new(),
        });
        let report = driver.run(ScenarioKind::OfflineDrain).await;
        assert!(!report.passed);
        assert!(report.messages[0].starts_with("pool drain failed"), "{}", report);
        assert!(!driver.capacity.aggregating());
    }

    #[tokio::test]
    async fn drain_failure_marker_stops_scenario() {
        let cluster = MockCluster::new();
        cluster.fail_next_membership(OperationResult {
            operation: String::new(),
            status: -1003,
            error: Some("DER_INVAL".into()),
            output: String::new(),
        });
        let (mut driver, bench) = mock_driver(cluster.clone(), fast_config());

        let report = driver.run(ScenarioKind::OfflineDrain).await;
        assert!(!report.passed);
        assert!(report.messages[0].starts_with("pool drain failed"), "{}", report);
        assert!(bench
            .invocations()
            .iter()
            .all(|i| i.mode == IoMode::Write));
        assert!(cluster.pools().is_empty());
    }
}
