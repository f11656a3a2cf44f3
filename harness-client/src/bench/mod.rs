//! I/O benchmark abstraction.
//!
//! Workload streams drive a parallel I/O benchmark (IOR) against one
//! container per invocation. [`Benchmark`] is the seam: [`IorBenchmark`]
//! runs the real tool under `mpirun`, [`MockBenchmark`] simulates it.

mod ior;
mod mock;

pub use ior::{IorBenchmark, IorCommand};
pub use mock::MockBenchmark;

use async_trait::async_trait;
use harness_types::{ContainerLabel, PoolLabel};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Direction of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IoMode {
    /// Write (and optionally verify) data.
    Write,
    /// Read back and verify data.
    Read,
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoMode::Write => write!(f, "write"),
            IoMode::Read => write!(f, "read"),
        }
    }
}

/// Parameters of one benchmark invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchInvocation {
    /// Target pool.
    pub pool: PoolLabel,
    /// Target container.
    pub container: ContainerLabel,
    /// Write or read.
    pub mode: IoMode,
    /// Tool flags (e.g. `-w -W -k -G 1`).
    pub flags: String,
    /// Object class for files and directories.
    pub oclass: Option<String>,
    /// Transfer size (e.g. `1M`).
    pub transfer_size: Option<String>,
    /// Block size (e.g. `64M`).
    pub block_size: Option<String>,
    /// Number of processes.
    pub processes: u32,
}

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchOutput {
    /// Tool standard output.
    pub stdout: String,
    /// Wall time of the invocation.
    pub elapsed: Duration,
}

/// Benchmark failures.
#[derive(Debug, Error)]
pub enum BenchError {
    /// The benchmark could not be started.
    #[error("benchmark spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    /// The benchmark exited non-zero.
    #[error("{mode} on container {container} failed: exit={exit_code}, {detail}")]
    Failed {
        /// Mode of the failed run.
        mode: IoMode,
        /// Target container.
        container: ContainerLabel,
        /// Exit code.
        exit_code: i32,
        /// stderr or stdout tail.
        detail: String,
    },
}

/// Runs benchmark invocations.
#[async_trait]
pub trait Benchmark: Send + Sync {
    /// Run one invocation to completion.
    async fn run(&self, invocation: &BenchInvocation) -> Result<BenchOutput, BenchError>;
}

/// Number of simultaneous rank failures an object class survives.
///
/// `EC_<k>P<p>G<g>` survives `p`, `RP_<n>G<g>` survives `n - 1`, anything
/// else (e.g. `SX`) survives none.
pub fn fault_tolerance(oclass: &str) -> u32 {
    let upper = oclass.to_ascii_uppercase();
    if let Some(rest) = upper.strip_prefix("EC_") {
        return rest
            .split_once('P')
            .map(|(_, tail)| leading_number(tail))
            .unwrap_or(0);
    }
    if let Some(rest) = upper.strip_prefix("RP_") {
        return leading_number(rest).saturating_sub(1);
    }
    0
}

/// Parse a benchmark size such as `64M` into bytes. `K`, `M`, `G` and `T`
/// are binary multiples; a bare number is bytes.
pub fn parse_size(size: &str) -> Option<u64> {
    let size = size.trim();
    let (digits, shift) = match size.chars().last()?.to_ascii_uppercase() {
        'K' => (&size[..size.len() - 1], 10),
        'M' => (&size[..size.len() - 1], 20),
        'G' => (&size[..size.len() - 1], 30),
        'T' => (&size[..size.len() - 1], 40),
        _ => (size, 0),
    };
    digits.parse::<u64>().ok()?.checked_mul(1 << shift)
}

fn leading_number(s: &str) -> u32 {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}
