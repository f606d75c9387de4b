//! Core data models for blendrun.
//!
//! - `config`: startup configuration and parameter presets
//! - `error`: crate error type and failure classification
//! - `job`: job records, stages and run summaries

mod config;
mod error;
mod job;

pub use config::*;
pub use error::*;
pub use job::*;
