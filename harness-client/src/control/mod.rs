//! Storage control plane abstraction.
//!
//! The harness never manages storage itself. Everything it does to the
//! cluster goes through [`ControlPlane`]:
//! - pool lifecycle, query and properties
//! - membership changes (stop ranks, exclude, drain, reintegrate)
//! - container lifecycle, handle open/close cycles, snapshot, consistency
//!   check
//! - client agent and server restarts
//!
//! Failures carry a structured return code ([`ControlPlaneError::code`]) so
//! callers can tell "no space" apart from everything else without looking at
//! message text.

mod dmg;
mod mock;

pub use dmg::{DmgConfig, DmgControlPlane};
pub use mock::{ClusterEvent, MockCluster, RestartStep};

use async_trait::async_trait;
use harness_types::{
    ContainerLabel, ControlPlaneError, OperationResult, PoolHandle, PoolLabel, PoolStatus, Rank,
};
use std::collections::BTreeMap;

/// Operations the harness needs from the storage control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // =========================================================================
    // Pools
    // =========================================================================

    /// Create a pool with the given size (e.g. `"80G"` or `"50%"`) and
    /// properties.
    async fn create_pool(
        &self,
        label: &PoolLabel,
        size: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<PoolHandle, ControlPlaneError>;

    /// Destroy a pool and everything in it.
    async fn destroy_pool(&self, pool: &PoolLabel) -> Result<(), ControlPlaneError>;

    /// Query pool version, space and rebuild progress.
    async fn query_pool(&self, pool: &PoolLabel) -> Result<PoolStatus, ControlPlaneError>;

    /// Total free space (scm + nvme) in bytes, freshly queried.
    async fn total_space(&self, pool: &PoolLabel) -> Result<u64, ControlPlaneError> {
        Ok(self.query_pool(pool).await?.free_space)
    }

    /// Pool map version, freshly queried.
    async fn version(&self, pool: &PoolLabel) -> Result<u64, ControlPlaneError> {
        Ok(self.query_pool(pool).await?.version)
    }

    /// Set a pool property.
    async fn set_property(
        &self,
        pool: &PoolLabel,
        name: &str,
        value: &str,
    ) -> Result<(), ControlPlaneError>;

    /// Read a pool property.
    async fn get_property(&self, pool: &PoolLabel, name: &str)
        -> Result<String, ControlPlaneError>;

    // =========================================================================
    // Membership
    // =========================================================================

    /// Stop engine ranks. Returns once the request is accepted; rebuild may
    /// not have started yet.
    async fn stop_ranks(&self, ranks: &[Rank], force: bool) -> Result<(), ControlPlaneError>;

    /// Exclude ranks from a pool.
    async fn exclude(
        &self,
        pool: &PoolLabel,
        ranks: &[Rank],
    ) -> Result<OperationResult, ControlPlaneError>;

    /// Drain targets of a rank, or all of its targets when `None`.
    async fn drain(
        &self,
        pool: &PoolLabel,
        rank: Rank,
        targets: Option<&[u32]>,
    ) -> Result<OperationResult, ControlPlaneError>;

    /// Reintegrate targets of a rank, or all of its targets when `None`.
    async fn reintegrate(
        &self,
        pool: &PoolLabel,
        rank: Rank,
        targets: Option<&[u32]>,
    ) -> Result<OperationResult, ControlPlaneError>;

    // =========================================================================
    // Containers
    // =========================================================================

    /// Create a container.
    async fn create_container(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError>;

    /// Destroy a container.
    async fn destroy_container(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError>;

    /// Open a handle on a container and close it again. Each call adds one
    /// open and one close to the pool's operation history.
    async fn cycle_container_handle(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError>;

    /// Snapshot a container. Returns the snapshot epoch.
    async fn create_snapshot(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<u64, ControlPlaneError>;

    /// Run a consistency check on a container.
    async fn check_container(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError>;

    // =========================================================================
    // System restart
    // =========================================================================
    //
    // Each step returns the per-host errors it collected. An empty list means
    // every host succeeded; `Err` is reserved for failures that prevented the
    // step from running at all.

    /// Stop the client agents.
    async fn stop_agents(&self) -> Result<Vec<String>, ControlPlaneError>;

    /// Stop and start every server without reformatting storage.
    async fn restart_servers(&self) -> Result<Vec<String>, ControlPlaneError>;

    /// Start the client agents.
    async fn start_agents(&self) -> Result<Vec<String>, ControlPlaneError>;
}
