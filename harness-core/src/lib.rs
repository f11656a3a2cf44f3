//! # pool-harness-core
//!
//! Pure logic for the pool fault-injection harness (no I/O, instant tests).
//!
//! This crate holds the state machines and bookkeeping the harness drives
//! while it disrupts a storage cluster, without touching the cluster itself.
//!
//! ## Design Philosophy
//!
//! Every module here is **pure**: it takes observations and produces state
//! or verdicts without side effects. Polling, sleeping, command execution and
//! logging happen in `chaos-tests`, which feeds observations into these
//! types and acts on what they report.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod convergence;
pub mod fillup;
pub mod registry;
pub mod variation;
pub mod workload;

pub use backoff::PollBackoff;
pub use convergence::{ConvergencePhase, ConvergenceTracker, Transition};
pub use fillup::{BoundsViolation, FillupBounds, FillupEdge, FillupPhase, FillupState};
pub use registry::{ContainerRegistry, ContainerState, RegistryError};
pub use variation::{LoopVariation, VariationReport};
pub use workload::{
    aggregate, AggregateWorkloadError, InvocationRecord, StreamReport, StreamStatus,
    WorkloadResult,
};
