//! Incident data models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Incident severity level
///
/// Ordering follows severity rank, so `Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Warning threshold crossed
    Warning,
    /// Critical threshold crossed
    Critical,
}

impl Severity {
    /// Ordinal used for escalation-only re-notification
    pub fn rank(self) -> u8 {
        match self {
            Self::Warning => 1,
            Self::Critical => 2,
        }
    }

    /// Lowercase label
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Parse a stored label
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Stable identifier, kept across escalation
    pub id: Uuid,

    /// Deduplication identity (metric name, or `api_<probe>`)
    pub alert_key: String,

    /// When the incident first opened
    pub opened_at: DateTime<Utc>,

    /// Display label for the affected metric
    pub metric: String,

    /// Value that opened or last escalated the incident
    pub current_value: f64,

    /// Threshold that was crossed
    pub threshold: f64,

    /// Current severity
    pub severity: Severity,

    /// Rendered human-readable message
    pub message: String,

    /// Whether the incident has been resolved
    pub resolved: bool,

    /// When the incident was resolved
    pub resolved_at: Option<DateTime<Utc>>,

    /// When the incident was last escalated or re-raised
    pub escalated_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Open a new incident at `now`
    pub fn open(
        alert_key: impl Into<String>,
        metric: impl Into<String>,
        current_value: f64,
        threshold: f64,
        severity: Severity,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_key: alert_key.into(),
            opened_at: now,
            metric: metric.into(),
            current_value,
            threshold,
            severity,
            message: message.into(),
            resolved: false,
            resolved_at: None,
            escalated_at: None,
        }
    }

    /// Time from open to resolution, if resolved
    pub fn duration(&self) -> Option<Duration> {
        self.resolved_at.map(|resolved_at| resolved_at - self.opened_at)
    }

    /// Time of the event an open notification reports: the last escalation, else the opening
    pub fn notified_at(&self) -> DateTime<Utc> {
        self.escalated_at.unwrap_or(self.opened_at)
    }

    /// Time the incident has been open as of `now`
    pub fn active_duration(&self, now: DateTime<Utc>) -> Duration {
        now - self.opened_at
    }
}
