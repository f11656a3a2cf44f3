//! Simulated benchmark for testing.
//!
//! Writes create the target container on the [`MockCluster`], take
//! `block_size * processes` bytes of pool space and remember the object
//! class. Reads fail if nothing was written to the container, or
//! if more ranks are stopped than the written object class tolerates.

use super::{fault_tolerance, parse_size, BenchError, BenchInvocation, BenchOutput, Benchmark, IoMode};
use crate::control::{ClusterEvent, ControlPlane, MockCluster};
use async_trait::async_trait;
use harness_types::{ContainerLabel, PoolLabel, DER_EXIST};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BenchInner {
    written: BTreeMap<(PoolLabel, ContainerLabel), Option<String>>,
    fail_on: BTreeSet<(ContainerLabel, IoMode)>,
    hang_on: BTreeSet<ContainerLabel>,
    delay: Duration,
    invocations: Vec<BenchInvocation>,
}

/// In-memory [`Benchmark`] bound to a [`MockCluster`].
#[derive(Debug, Clone)]
pub struct MockBenchmark {
    cluster: MockCluster,
    inner: Arc<Mutex<BenchInner>>,
}

impl MockBenchmark {
    /// Create a benchmark that records into `cluster`'s event log.
    pub fn new(cluster: MockCluster) -> Self {
        Self {
            cluster,
            inner: Arc::new(Mutex::new(BenchInner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BenchInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep this long inside every invocation.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = delay;
        self
    }

    /// Fail every `mode` invocation against `container`.
    pub fn fail_on(&self, container: &ContainerLabel, mode: IoMode) {
        self.lock().fail_on.insert((container.clone(), mode));
    }

    /// Never complete invocations against `container`.
    pub fn hang_on(&self, container: &ContainerLabel) {
        self.lock().hang_on.insert(container.clone());
    }

    /// Every invocation so far, in start order.
    pub fn invocations(&self) -> Vec<BenchInvocation> {
        self.lock().invocations.clone()
    }

    /// True if data was written to `container` in `pool`.
    pub fn has_data(&self, pool: &PoolLabel, container: &ContainerLabel) -> bool {
        self.lock()
            .written
            .contains_key(&(pool.clone(), container.clone()))
    }

    fn failed(invocation: &BenchInvocation, detail: impl Into<String>) -> BenchError {
        BenchError::Failed {
            mode: invocation.mode,
            container: invocation.container.clone(),
            exit_code: 1,
            detail: detail.into(),
        }
    }

    async fn execute(&self, invocation: &BenchInvocation) -> Result<String, BenchError> {
        let (delay, hang, fail) = {
            let mut inner = self.lock();
            inner.invocations.push(invocation.clone());
            (
                inner.delay,
                inner.hang_on.contains(&invocation.container),
                inner
                    .fail_on
                    .contains(&(invocation.container.clone(), invocation.mode)),
            )
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(Self::failed(invocation, "injected failure"));
        }

        let key = (invocation.pool.clone(), invocation.container.clone());
        match invocation.mode {
            IoMode::Write => {
                if let Err(e) = self
                    .cluster
                    .create_container(&invocation.pool, &invocation.container)
                    .await
                {
                    if e.code() != Some(DER_EXIST) {
                        return Err(Self::failed(invocation, e.to_string()));
                    }
                }
                let bytes = invocation
                    .block_size
                    .as_deref()
                    .and_then(parse_size)
                    .unwrap_or(0)
                    .saturating_mul(u64::from(invocation.processes));
                self.cluster
                    .consume_space(&invocation.pool, &invocation.container, bytes)
                    .map_err(|e| Self::failed(invocation, e.to_string()))?;
                self.lock().written.insert(key, invocation.oclass.clone());
                Ok(format!("Max Write: wrote {}", invocation.container))
            }
            IoMode::Read => {
                let oclass = self
                    .lock()
                    .written
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| Self::failed(invocation, "no data written"))?;
                let tolerance = oclass.as_deref().map(fault_tolerance).unwrap_or(0);
                let stopped = self.cluster.stopped_ranks().len() as u32;
                if stopped > tolerance {
                    return Err(Self::failed(
                        invocation,
                        format!(
                            "data verification failed: {} ranks down, object class tolerates {}",
                            stopped, tolerance
                        ),
                    ));
                }
                Ok(format!("Max Read: verified {}", invocation.container))
            }
        }
    }
}

#[async_trait]
impl Benchmark for MockBenchmark {
    async fn run(&self, invocation: &BenchInvocation) -> Result<BenchOutput, BenchError> {
        let start = Instant::now();
        self.cluster.record(ClusterEvent::IoStarted(
            invocation.container.clone(),
            invocation.mode,
        ));
        let result = self.execute(invocation).await;
        self.cluster.record(ClusterEvent::IoFinished(
            invocation.container.clone(),
            invocation.mode,
        ));
        result.map(|stdout| BenchOutput {
            stdout,
            elapsed: start.elapsed(),
        })
    }
}
