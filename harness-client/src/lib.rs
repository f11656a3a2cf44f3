//! # pool-harness-client
//!
//! External collaborator seams for the pool fault-injection harness.
//!
//! The harness talks to two things it does not implement:
//!
//! - **[`ControlPlane`]**: pool, container and membership operations on the
//!   storage cluster. [`DmgControlPlane`] drives the `dmg`/`daos` tools,
//!   [`MockCluster`] simulates a cluster in memory.
//! - **[`Benchmark`]**: the parallel I/O tool used to write and verify data.
//!   [`IorBenchmark`] runs IOR under `mpirun`, [`MockBenchmark`] simulates it
//!   against a [`MockCluster`].
//!
//! ## Example
//!
//! ```ignore
//! use harness_client::{ControlPlane, MockCluster};
//!
//! let cluster = MockCluster::new().with_container_quota(950);
//! let pool = cluster.create_pool(&label, "1G", &props).await?;
//! let status = cluster.query_pool(&pool.label).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bench;
pub mod control;
pub mod exec;
pub mod ssh;

pub use bench::{
    fault_tolerance, parse_size, BenchError, BenchInvocation, BenchOutput, Benchmark, IoMode,
    IorBenchmark, IorCommand, MockBenchmark,
};
pub use control::{
    ClusterEvent, ControlPlane, DmgConfig, DmgControlPlane, MockCluster, RestartStep,
};
pub use exec::ExecResult;
pub use ssh::{SshError, SshTarget};
