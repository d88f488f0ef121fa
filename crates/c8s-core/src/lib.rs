//! Domain types and pure reconciliation logic for the c8s CI operator.
//!
//! This crate has no I/O: no cluster client, no object store, no clock
//! other than what callers pass in. Everything here is safe to unit test
//! without a cluster and safe to share across concurrent reconciles.

pub mod aggregate;
pub mod error;
pub mod labels;
pub mod mask;
pub mod matrix;
pub mod pipeline;
pub mod plan;
pub mod run;
pub mod timeout;

pub use error::{Error, Result};
