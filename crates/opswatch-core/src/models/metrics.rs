//! Metric definitions and samples

use serde::{Deserialize, Serialize};

use super::incident::Severity;

/// Which batch a metric belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricClass {
    /// Host resource metric, evaluated from the system batch
    System,
    /// Endpoint metric, evaluated from the API batch
    Api,
    /// Custom metric, persisted but not evaluated by either batch
    Custom,
}

/// Classification of a single sample against its thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    /// Below the warning threshold (or not configured)
    #[default]
    Normal,
    /// At or above warning, below critical
    Warning,
    /// At or above critical
    Critical,
}

impl MetricStatus {
    /// Severity an incident would carry for this status, `None` for normal
    pub fn severity(self) -> Option<Severity> {
        match self {
            Self::Normal => None,
            Self::Warning => Some(Severity::Warning),
            Self::Critical => Some(Severity::Critical),
        }
    }

    /// Lowercase label stored in metric history
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remediation actions a metric definition may name
///
/// Tags are resolved when the configuration is deserialized, so an unknown tag
/// is a configuration error instead of a silent no-op at alert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    /// Restart services that are safe to bounce
    RestartNonCriticalServices,
    /// Drop page cache
    ClearCache,
    /// Remove old log files
    CleanOldLogs,
    /// Scale out serving instances
    ScaleInstances,
}

impl RemediationAction {
    /// Configuration tag for this action
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RestartNonCriticalServices => "restart_non_critical_services",
            Self::ClearCache => "clear_cache",
            Self::CleanOldLogs => "clean_old_logs",
            Self::ScaleInstances => "scale_instances",
        }
    }
}

impl std::fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured metric with its alert thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Unique metric name (e.g., "cpu_percentage")
    pub name: String,

    /// Batch the metric is evaluated in
    pub class: MetricClass,

    /// Value at or above which the metric is critical
    pub critical_threshold: f64,

    /// Value at or above which the metric is a warning
    pub warning_threshold: f64,

    /// Display unit
    pub unit: String,

    /// Human-readable description, used as the alert message prefix
    pub description: String,

    /// Action fired when a new incident opens for this metric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_action: Option<RemediationAction>,
}

impl MetricDefinition {
    /// Create a definition without a remediation action
    pub fn new(
        name: impl Into<String>,
        class: MetricClass,
        critical_threshold: f64,
        warning_threshold: f64,
        unit: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            class,
            critical_threshold,
            warning_threshold,
            unit: unit.into(),
            description: description.into(),
            remediation_action: None,
        }
    }

    /// Attach a remediation action
    #[must_use]
    pub fn with_remediation(mut self, action: RemediationAction) -> Self {
        self.remediation_action = Some(action);
        self
    }

    /// Classify a value against this definition's thresholds
    pub fn classify(&self, value: f64) -> MetricStatus {
        if value >= self.critical_threshold {
            MetricStatus::Critical
        } else if value >= self.warning_threshold {
            MetricStatus::Warning
        } else {
            MetricStatus::Normal
        }
    }

    /// The threshold that a given severity crossed
    pub fn threshold_for(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical_threshold,
            Severity::Warning => self.warning_threshold,
        }
    }
}

/// Result of a single endpoint probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Configured probe name
    pub name: String,

    /// Whether the endpoint answered 200 OK within its timeout
    pub available: bool,

    /// HTTP status code, 0 when no response was received
    pub status_code: u16,

    /// Round-trip time in milliseconds
    pub response_time_ms: f64,

    /// Response body size in kilobytes
    #[serde(default)]
    pub response_size_kb: f64,

    /// Transport error, if the request failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    /// A successful probe
    pub fn up(name: impl Into<String>, status_code: u16, response_time_ms: f64) -> Self {
        Self {
            name: name.into(),
            available: status_code == 200,
            status_code,
            response_time_ms,
            response_size_kb: 0.0,
            error: None,
        }
    }

    /// A probe that never got a response
    pub fn down(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: false,
            status_code: 0,
            response_time_ms: 0.0,
            response_size_kb: 0.0,
            error: Some(error.into()),
        }
    }
}
