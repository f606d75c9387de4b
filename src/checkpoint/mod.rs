//! Checkpoint module for resumable job execution.
//!
//! Provides:
//! - `CheckpointStore`: Persistence and loading of per-job records
//! - `CheckpointInspector`: Status reporting and reset over a store

mod inspector;
mod store;

pub use inspector::*;
pub use store::*;
