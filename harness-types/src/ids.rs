//! Identity types for pools, containers and engine ranks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An addressable storage engine process within the cluster.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(u32);

impl Rank {
    /// Create a rank from its numeric id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the numeric id.
    pub const fn id(self) -> u32 {
        self.0
    }

    /// Render a rank list the way the control plane expects it (`"1,3,5"`).
    pub fn join(ranks: &[Rank]) -> String {
        ranks
            .iter()
            .map(|r| r.0.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rank({})", self.0)
    }
}

impl From<u32> for Rank {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Label of a pool.
///
/// Generated labels carry a random suffix so concurrent harness runs against
/// the same system never collide.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolLabel(String);

impl PoolLabel {
    /// Wrap an existing pool label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Generate a unique label: `<prefix>-<8 hex chars>`.
    pub fn generate(prefix: &str) -> Self {
        let suffix = uuid::Uuid::new_v4().as_simple().to_string();
        Self(format!("{}-{}", prefix, &suffix[..8]))
    }

    /// Get the label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PoolLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolLabel({})", self.0)
    }
}

/// Label of a container within a pool.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerLabel(String);

impl ContainerLabel {
    /// Wrap an existing container label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Label for the `index`-th container created from `prefix`.
    pub fn indexed(prefix: &str, index: u64) -> Self {
        Self(format!("{}_{}", prefix, index))
    }

    /// Label for item `item` of workload stream `stream` (`cont_<stream>_<item>`).
    pub fn for_stream(stream: usize, item: usize) -> Self {
        Self(format!("cont_{}_{}", stream, item))
    }

    /// Get the label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContainerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerLabel({})", self.0)
    }
}
