//! blendrun - Resumable batch orchestration for long-running video blending jobs.
//!
//! ## Architecture
//!
//! - **CheckpointStore**: One JSON record per input video, written at every stage
//! - **StageExecutor**: Drives a job through setup → loading → processing → encoding
//! - **BatchDriver**: Runs every video in a source directory, one after another
//! - **CheckpointInspector**: Lists or clears persisted records
//!
//! ## Resumption
//!
//! Jobs resume at whole-job granularity. A `completed` job is skipped; any
//! other job, including one that failed, reruns from `setup` with the settings
//! it was first created with. The blending engine exposes no progress, so
//! there is nothing finer to resume from.

pub mod checkpoint;
pub mod media;
pub mod models;
pub mod pipeline;

// Re-exports for convenience
pub use checkpoint::{CheckpointInspector, CheckpointStore};
pub use media::{BlendRunners, FfmpegEncoder, FfprobeSource};
pub use models::{BlendrunError, Config, JobRecord, Result, RunSummary, Settings, Stage};
pub use pipeline::{BatchDriver, JobOutcome, StageExecutor};
