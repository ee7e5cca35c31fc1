//! Data models for Opswatch

mod incident;
mod metrics;
mod report;

pub use incident::*;
pub use metrics::*;
pub use report::*;
