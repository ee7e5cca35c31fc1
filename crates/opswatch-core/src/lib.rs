//! # Opswatch
//!
//! Threshold alerting for host resources and critical HTTP endpoints.
//!
//! Opswatch samples CPU, memory, and disk usage, probes configured endpoints,
//! and turns threshold breaches into deduplicated incidents with email and
//! webhook notifications, optional automatic remediation, and a SQLite history.
//!
//! ## Architecture
//!
//! - **Collector**: procfs host metrics and bounded-concurrency HTTP probes
//! - **Alerting**: evaluator, active incident set, notifier, remediation, history
//! - **Monitor**: periodic cycle driver with a cooperative stop flag
//!
//! ## Quick Start
//!
//! ```bash
//! # Write the default configuration
//! opswatch init-config
//!
//! # One pass, print the status report
//! opswatch check
//!
//! # Continuous monitoring until Ctrl+C
//! opswatch run
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]

pub mod alerting;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod error;
pub mod models;
pub mod monitor;

pub use config::Config;
pub use error::{Error, Result};
pub use monitor::{CycleReport, Monitor};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertEvaluator, IncidentStore, Notifier, RemediationHandler};
    pub use crate::catalog::ThresholdCatalog;
    pub use crate::collector::{ApiProbeSource, MetricBatch, SystemMetricSource};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::monitor::Monitor;
}
