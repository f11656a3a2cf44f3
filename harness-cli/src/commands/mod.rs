//! CLI command implementations.

pub mod config;
pub mod query;
pub mod run;
