//! Status report models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::incident::Severity;

/// One active alert as shown in the status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlertSummary {
    pub metric: String,
    pub severity: Severity,
    pub current_value: f64,
    pub message: String,
    /// Seconds since the incident opened
    pub active_duration_seconds: f64,
}

/// Point-in-time view of system metrics and active alerts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// When the report was generated
    pub timestamp: DateTime<Utc>,

    /// Latest system metric values
    pub system_metrics: BTreeMap<String, f64>,

    /// Active alerts keyed by alert key
    pub active_alerts: BTreeMap<String, ActiveAlertSummary>,

    /// Number of active critical alerts
    pub total_critical: usize,

    /// Number of active warning alerts
    pub total_warning: usize,

    /// True when no critical alert is active
    pub system_healthy: bool,
}
