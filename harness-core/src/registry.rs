//! Pool-scoped container registry.
//!
//! Every container the harness creates or plans to create in a pool is
//! recorded here with its lifecycle state. Labels are handed out from a
//! monotonic counter and records are never removed, so a label is never
//! reused within one run, even after its container was destroyed.

use harness_types::{ContainerLabel, PoolLabel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// Label reserved, create not yet confirmed.
    Requested,
    /// Create succeeded.
    Created,
    /// Destroy succeeded.
    Destroyed,
    /// Create failed with the no-space code.
    FailedNoSpace,
    /// Create failed with any other error.
    FailedUnexpected,
}

/// Errors from registry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The label was already registered in this pool.
    #[error("container label {label} already used in pool {pool}")]
    Duplicate {
        /// Pool the registry belongs to.
        pool: PoolLabel,
        /// Offending label.
        label: ContainerLabel,
    },

    /// The label was never registered.
    #[error("container {label} is not registered in pool {pool}")]
    Unknown {
        /// Pool the registry belongs to.
        pool: PoolLabel,
        /// Offending label.
        label: ContainerLabel,
    },

    /// The requested state change is not allowed.
    #[error("container {label}: invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Container label.
        label: ContainerLabel,
        /// Current state.
        from: ContainerState,
        /// Requested state.
        to: ContainerState,
    },
}

/// Arena of containers belonging to one pool.
#[derive(Debug, Clone)]
pub struct ContainerRegistry {
    pool: PoolLabel,
    prefix: String,
    next_index: u64,
    records: HashMap<ContainerLabel, Record>,
    next_created: u64,
    /// Created and not yet destroyed, keyed by creation sequence.
    live: BTreeMap<u64, ContainerLabel>,
}

#[derive(Debug, Clone, Copy)]
struct Record {
    state: ContainerState,
    created: Option<u64>,
}

impl Record {
    fn requested() -> Self {
        Self {
            state: ContainerState::Requested,
            created: None,
        }
    }
}

impl ContainerRegistry {
    /// Create an empty registry for `pool`. Reserved labels are
    /// `<prefix>_<n>`.
    pub fn new(pool: PoolLabel, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            next_index: 0,
            records: HashMap::new(),
            next_created: 0,
            live: BTreeMap::new(),
        }
    }

    /// Pool this registry belongs to.
    pub fn pool(&self) -> &PoolLabel {
        &self.pool
    }

    /// Reserve a fresh label in the `Requested` state.
    pub fn reserve(&mut self) -> ContainerLabel {
        loop {
            let label = ContainerLabel::indexed(&self.prefix, self.next_index);
            self.next_index += 1;
            if !self.records.contains_key(&label) {
                self.records.insert(label.clone(), Record::requested());
                return label;
            }
        }
    }

    /// Register a caller-chosen label in the `Requested` state.
    pub fn register(&mut self, label: ContainerLabel) -> Result<(), RegistryError> {
        if self.records.contains_key(&label) {
            return Err(RegistryError::Duplicate {
                pool: self.pool.clone(),
                label,
            });
        }
        self.records.insert(label, Record::requested());
        Ok(())
    }

    /// Record a successful create.
    pub fn mark_created(&mut self, label: &ContainerLabel) -> Result<(), RegistryError> {
        let seq = self.next_created;
        self.transition(label, ContainerState::Requested, ContainerState::Created)?
            .created = Some(seq);
        self.next_created += 1;
        self.live.insert(seq, label.clone());
        Ok(())
    }

    /// Record a failed create.
    pub fn mark_failed(
        &mut self,
        label: &ContainerLabel,
        no_space: bool,
    ) -> Result<(), RegistryError> {
        let to = if no_space {
            ContainerState::FailedNoSpace
        } else {
            ContainerState::FailedUnexpected
        };
        self.transition(label, ContainerState::Requested, to)?;
        Ok(())
    }

    /// Record a successful destroy.
    pub fn mark_destroyed(&mut self, label: &ContainerLabel) -> Result<(), RegistryError> {
        let created = self
            .transition(label, ContainerState::Created, ContainerState::Destroyed)?
            .created;
        if let Some(seq) = created {
            self.live.remove(&seq);
        }
        Ok(())
    }

    /// State of a label, if registered.
    pub fn state(&self, label: &ContainerLabel) -> Option<ContainerState> {
        self.records.get(label).map(|r| r.state)
    }

    /// Live containers in creation order.
    pub fn live(&self) -> impl Iterator<Item = &ContainerLabel> + '_ {
        self.live.values()
    }

    /// Number of live containers.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of records in `state`.
    pub fn count_in(&self, state: ContainerState) -> usize {
        self.records.values().filter(|r| r.state == state).count()
    }

    /// Total labels ever registered.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no label was ever registered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn transition(
        &mut self,
        label: &ContainerLabel,
        expected: ContainerState,
        to: ContainerState,
    ) -> Result<&mut Record, RegistryError> {
        let record = self
            .records
            .get_mut(label)
            .ok_or_else(|| RegistryError::Unknown {
                pool: self.pool.clone(),
                label: label.clone(),
            })?;
        if record.state != expected {
            return Err(RegistryError::InvalidTransition {
                label: label.clone(),
                from: record.state,
                to,
            });
        }
        record.state = to;
        Ok(record)
    }
}
