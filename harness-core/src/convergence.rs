//! Rebuild convergence state machine.
//!
//! Pure, side-effect-free tracking of a pool's rebuild lifecycle after a
//! disruption:
//!
//! ```text
//! Stable -> RebuildPending -> RebuildActive -> Stable
//!      \___________________________/^
//! ```
//!
//! The tracker consumes [`PoolStatus`] observations produced by the caller's
//! polling loop and reports phase transitions. Polling, sleeping and timeouts
//! are the caller's concern.
//!
//! A `done` rebuild status read while pending may belong to the previous
//! rebuild: the map version moves as soon as the disruption lands, but the
//! status is only replaced once the new rebuild is scheduled. Such a `done`
//! only counts once the map has also taken the completion update, i.e. it is
//! at least [`COMPLETED_MAP_ADVANCE`] versions past the baseline.

use harness_types::{PoolStatus, RebuildState};
use std::fmt;

/// Map versions a finished rebuild adds to the baseline: one for the
/// disruption and one for the completion update.
pub const COMPLETED_MAP_ADVANCE: u64 = 2;

/// Convergence phase of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvergencePhase {
    /// No rebuild outstanding for the tracked pool map version.
    Stable,
    /// The pool map changed but no rebuild has been seen running yet.
    RebuildPending,
    /// A rebuild is running.
    RebuildActive,
}

impl fmt::Display for ConvergencePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergencePhase::Stable => write!(f, "Stable"),
            ConvergencePhase::RebuildPending => write!(f, "RebuildPending"),
            ConvergencePhase::RebuildActive => write!(f, "RebuildActive"),
        }
    }
}

/// A phase change produced by an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Phase before the observation.
    pub from: ConvergencePhase,
    /// Phase after the observation.
    pub to: ConvergencePhase,
    /// Pool map version in the observation.
    pub version: u64,
}

/// Tracks one pool's convergence relative to a baseline map version.
#[derive(Debug, Clone)]
pub struct ConvergenceTracker {
    phase: ConvergencePhase,
    baseline_version: u64,
    left_stable: bool,
    rebuild_error: Option<i32>,
}

impl ConvergenceTracker {
    /// Start tracking from `baseline_version`, the map version observed
    /// before the disruption was requested.
    pub fn new(baseline_version: u64) -> Self {
        Self {
            phase: ConvergencePhase::Stable,
            baseline_version,
            left_stable: false,
            rebuild_error: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ConvergencePhase {
        self.phase
    }

    /// Map version the tracker compares observations against.
    pub fn baseline_version(&self) -> u64 {
        self.baseline_version
    }

    /// True once any observation moved the tracker out of `Stable`.
    pub fn has_started(&self) -> bool {
        self.left_stable
    }

    /// True once the tracker left `Stable` and came back.
    pub fn has_converged(&self) -> bool {
        self.left_stable && self.phase == ConvergencePhase::Stable
    }

    /// Non-zero rebuild return code seen when the rebuild finished.
    pub fn rebuild_error(&self) -> Option<i32> {
        self.rebuild_error
    }

    /// Feed one pool query result. Returns the transition, if any.
    pub fn observe(&mut self, status: &PoolStatus) -> Option<Transition> {
        let map_changed = status.version > self.baseline_version;
        let completed = status.version >= self.baseline_version + COMPLETED_MAP_ADVANCE;
        let next = match (self.phase, status.rebuild.state) {
            (ConvergencePhase::Stable, RebuildState::Busy) => ConvergencePhase::RebuildActive,
            (ConvergencePhase::Stable, _) if map_changed => ConvergencePhase::RebuildPending,
            (ConvergencePhase::Stable, _) => ConvergencePhase::Stable,

            (ConvergencePhase::RebuildPending, RebuildState::Busy) => {
                ConvergencePhase::RebuildActive
            }
            (ConvergencePhase::RebuildPending, RebuildState::Done) if completed => {
                ConvergencePhase::Stable
            }
            (ConvergencePhase::RebuildPending, _) => ConvergencePhase::RebuildPending,

            (ConvergencePhase::RebuildActive, RebuildState::Busy) => {
                ConvergencePhase::RebuildActive
            }
            (ConvergencePhase::RebuildActive, _) => ConvergencePhase::Stable,
        };

        if next == self.phase {
            return None;
        }

        let transition = Transition {
            from: self.phase,
            to: next,
            version: status.version,
        };
        self.phase = next;

        if next == ConvergencePhase::Stable {
            // Later observations compare against the converged map.
            self.baseline_version = status.version;
            if status.rebuild.status != 0 {
                self.rebuild_error = Some(status.rebuild.status);
            }
        } else {
            self.left_stable = true;
        }

        Some(transition)
    }
}
