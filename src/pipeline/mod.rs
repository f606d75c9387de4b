//! Pipeline module - per-job stage execution and the batch driver.

mod batch;
mod executor;

pub use batch::*;
pub use executor::*;
