//! Observed cluster state: pool status, rebuild progress, operation results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{PoolLabel, Rank};

/// Lines in an operation's output that mark a failed rebuild even when the
/// command itself returned success.
const FAILURE_MARKERS: [&str; 2] = ["rebuild failed", "rebuild aborted"];

/// A pool created by the harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolHandle {
    /// Pool label.
    pub label: PoolLabel,
    /// Ranks running the pool service replicas.
    pub svc_ranks: Vec<Rank>,
    /// Properties the pool was created with.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl PoolHandle {
    /// Create a handle with no service ranks and no properties.
    pub fn new(label: PoolLabel) -> Self {
        Self {
            label,
            svc_ranks: Vec::new(),
            properties: BTreeMap::new(),
        }
    }
}

/// State of the most recent rebuild as reported by a pool query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildState {
    /// No rebuild has run for this pool.
    Idle,
    /// A rebuild is in progress.
    Busy,
    /// The most recent rebuild has completed.
    Done,
}

/// Rebuild progress reported by a pool query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildStatus {
    /// Current rebuild state.
    pub state: RebuildState,
    /// Return code of the rebuild (0 = healthy).
    #[serde(default)]
    pub status: i32,
}

impl RebuildStatus {
    /// A rebuild status in the given state with a healthy return code.
    pub fn new(state: RebuildState) -> Self {
        Self { state, status: 0 }
    }
}

/// A point-in-time pool query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Pool map version.
    pub version: u64,
    /// Total capacity across tiers (scm + nvme), in bytes.
    pub total_space: u64,
    /// Free capacity across tiers (scm + nvme), in bytes.
    pub free_space: u64,
    /// Rebuild progress.
    pub rebuild: RebuildStatus,
}

impl PoolStatus {
    /// Share of the total capacity in use, in percent.
    pub fn used_percent(&self) -> f64 {
        if self.total_space == 0 {
            return 0.0;
        }
        self.total_space.saturating_sub(self.free_space) as f64 * 100.0 / self.total_space as f64
    }

    /// Bytes still to write before `percent` of the total capacity is in
    /// use. Zero once the pool is at or above it.
    pub fn bytes_to_fill(&self, percent: u32) -> u64 {
        let target = u128::from(self.total_space) * u128::from(percent.min(100)) / 100;
        let used = u128::from(self.total_space.saturating_sub(self.free_space));
        u64::try_from(target.saturating_sub(used)).unwrap_or(u64::MAX)
    }
}

/// Textual/structured result of a membership operation (drain, reintegrate,
/// exclude).
///
/// A result can describe a failure even when the command was accepted; call
/// [`OperationResult::failure_reason`] before proceeding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Operation name (e.g. `pool drain`).
    pub operation: String,
    /// Return code (0 = success).
    pub status: i32,
    /// Error string reported by the control plane.
    pub error: Option<String>,
    /// Raw command output.
    pub output: String,
}

impl OperationResult {
    /// A successful result with the given output.
    pub fn ok(operation: &str, output: impl Into<String>) -> Self {
        Self {
            operation: operation.to_string(),
            status: 0,
            error: None,
            output: output.into(),
        }
    }

    /// Describe why this result is a failure, or `None` if it is clean.
    pub fn failure_reason(&self) -> Option<String> {
        if self.status != 0 {
            return Some(format!(
                "{} returned rc {}: {}",
                self.operation,
                self.status,
                self.error.as_deref().unwrap_or("no error detail")
            ));
        }
        if let Some(error) = &self.error {
            return Some(format!("{} reported error: {}", self.operation, error));
        }
        let lowered = self.output.to_lowercase();
        FAILURE_MARKERS
            .iter()
            .find(|marker| lowered.contains(*marker))
            .map(|marker| format!("{} output contains '{}'", self.operation, marker))
    }
}
