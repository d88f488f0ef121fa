//! The reconciler and its supporting I/O: log collection, the shared log
//! buffer manager, and the matrix coordinator's run-creation half.
//!
//! Everything pure (planning, masking, aggregation) lives in `c8s_core`;
//! this crate is where that logic meets `kube::Client` and the object
//! store.

pub mod buffer;
pub mod context;
pub mod logs;
pub mod matrix;
pub mod reconciler;

pub use buffer::LogBufferManager;
pub use context::Context;
pub use reconciler::{error_policy, reconcile, ReconcileError};
