//! # harness-types
//!
//! Shared types for the pool fault-injection harness.
//!
//! This crate provides the foundational types used across all harness crates:
//! - [`Rank`], [`PoolLabel`], [`ContainerLabel`] - Identity types
//! - [`PoolStatus`], [`RebuildStatus`], [`OperationResult`] - Observed cluster state
//! - [`ControlPlaneError`] - Errors reported by the storage control plane

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod status;

pub use error::{
    ControlPlaneError, DER_BUSY, DER_EXIST, DER_INVAL, DER_NONEXIST, DER_NOSPACE, DER_TIMEDOUT,
};
pub use ids::{ContainerLabel, PoolLabel, Rank};
pub use status::{OperationResult, PoolHandle, PoolStatus, RebuildState, RebuildStatus};
