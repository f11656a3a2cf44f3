//! Capacity-exhaustion loop state.
//!
//! [`FillupState`] is the bookkeeping the fillup loop mutates on every
//! container create attempt:
//! - consecutive "no space" failures (reset by any success)
//! - success/failure edges, reported so the caller can log them
//! - the Growing → Draining phase switch
//!
//! [`FillupBounds`] is the post-condition on the number of containers the
//! Growing phase produced.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phase of a fillup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FillupPhase {
    /// Creating containers until metadata space runs out.
    Growing,
    /// Destroying a subset of what was created.
    Draining,
}

/// A change between "creates succeed" and "creates fail with no space".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillupEdge {
    /// First no-space failure after a run of successes.
    SpaceExhausted {
        /// 1-based attempt number that failed.
        attempt: u64,
    },
    /// First success after one or more no-space failures.
    SpaceRecovered {
        /// 1-based attempt number that succeeded.
        attempt: u64,
        /// Consecutive failures that preceded it.
        after_failures: u32,
    },
}

/// Mutable state of one fillup loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillupState {
    phase: FillupPhase,
    sequential_fail_counter: u32,
    in_failure: bool,
    created_count: u64,
    attempts: u64,
}

impl Default for FillupState {
    fn default() -> Self {
        Self::new()
    }
}

impl FillupState {
    /// Fresh state in the Growing phase.
    pub fn new() -> Self {
        Self {
            phase: FillupPhase::Growing,
            sequential_fail_counter: 0,
            in_failure: false,
            created_count: 0,
            attempts: 0,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> FillupPhase {
        self.phase
    }

    /// Consecutive no-space failures since the last success.
    pub fn sequential_fail_counter(&self) -> u32 {
        self.sequential_fail_counter
    }

    /// True while the most recent attempt failed with no space.
    pub fn in_failure(&self) -> bool {
        self.in_failure
    }

    /// Containers created so far.
    pub fn created_count(&self) -> u64 {
        self.created_count
    }

    /// Create attempts so far (successes and no-space failures).
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Record a successful create.
    pub fn record_success(&mut self) -> Option<FillupEdge> {
        self.attempts += 1;
        self.created_count += 1;
        let after_failures = self.sequential_fail_counter;
        self.sequential_fail_counter = 0;
        if self.in_failure {
            self.in_failure = false;
            return Some(FillupEdge::SpaceRecovered {
                attempt: self.attempts,
                after_failures,
            });
        }
        None
    }

    /// Record a create that failed with the no-space code.
    pub fn record_no_space(&mut self) -> Option<FillupEdge> {
        self.attempts += 1;
        self.sequential_fail_counter = self.sequential_fail_counter.saturating_add(1);
        if !self.in_failure {
            self.in_failure = true;
            return Some(FillupEdge::SpaceExhausted {
                attempt: self.attempts,
            });
        }
        None
    }

    /// True once `max` consecutive no-space failures have been recorded.
    pub fn exhausted(&self, max: u32) -> bool {
        self.sequential_fail_counter >= max
    }

    /// Switch to the Draining phase.
    pub fn begin_draining(&mut self) {
        self.phase = FillupPhase::Draining;
    }
}

/// Bounds check failure for a fillup run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundsViolation {
    /// Created at least as many containers as the configured limit.
    #[error("created too many containers: {count} >= {limit}")]
    TooMany {
        /// Containers created.
        count: u64,
        /// Exclusive upper bound.
        limit: u64,
    },
    /// Created fewer containers than the configured minimum.
    #[error("created too few containers: {count} < {min}")]
    TooFew {
        /// Containers created.
        count: u64,
        /// Inclusive lower bound.
        min: u64,
    },
}

/// Expected range `[min, limit)` for the number of containers a full
/// metadata store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillupBounds {
    /// Inclusive minimum.
    pub min: u64,
    /// Exclusive limit.
    pub limit: u64,
}

impl FillupBounds {
    /// Create bounds.
    pub fn new(min: u64, limit: u64) -> Self {
        Self { min, limit }
    }

    /// Check a final container count.
    pub fn check(&self, count: u64) -> Result<(), BoundsViolation> {
        if count >= self.limit {
            return Err(BoundsViolation::TooMany {
                count,
                limit: self.limit,
            });
        }
        if count < self.min {
            return Err(BoundsViolation::TooFew {
                count,
                min: self.min,
            });
        }
        Ok(())
    }
}
