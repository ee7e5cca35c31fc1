//! Metric sources
//!
//! Host resource metrics come from [`HostCollector`] and endpoint health from
//! [`HttpProber`]. Both isolate failures per item: a metric that cannot be
//! read is reported in [`MetricBatch::errors`] and the rest of the batch is
//! still returned.

mod host;
mod probe;

pub use host::HostCollector;
pub use probe::HttpProber;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::ProbeResult;

/// A metric or probe sample that could not be obtained
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollectionError {
    #[error("failed to read {source_name}: {reason}")]
    Read { source_name: String, reason: String },

    #[error("failed to parse {metric}: {reason}")]
    Parse { metric: String, reason: String },
}

impl CollectionError {
    pub(crate) fn read(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Read {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn parse(metric: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            metric: metric.into(),
            reason: reason.to_string(),
        }
    }
}

/// One collection pass over host metrics
#[derive(Debug, Clone, Default)]
pub struct MetricBatch {
    /// Metric name to value
    pub samples: HashMap<String, f64>,
    /// Metrics that failed this pass
    pub errors: Vec<CollectionError>,
}

impl MetricBatch {
    /// Record the outcome of collecting one metric
    pub fn record(&mut self, name: &str, result: Result<f64, CollectionError>) {
        match result {
            Ok(value) => {
                self.samples.insert(name.to_string(), value);
            }
            Err(e) => self.errors.push(e),
        }
    }
}

/// Produces the system metric batch
#[async_trait]
pub trait SystemMetricSource: Send + Sync {
    async fn collect(&self) -> MetricBatch;
}

/// Produces the API probe batch
#[async_trait]
pub trait ApiProbeSource: Send + Sync {
    async fn check_all(&self) -> Vec<ProbeResult>;
}
