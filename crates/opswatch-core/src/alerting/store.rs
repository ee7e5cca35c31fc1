//! Active incident set
//!
//! Owns the map of alert key to the single active incident for that key. All
//! operations here are synchronous decisions; side effects (persistence,
//! notification, remediation) are carried out by the caller from the returned
//! [`Transition`].

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::{Incident, RemediationAction, Severity};

/// A threshold breach ready to be applied to the active set
#[derive(Debug, Clone)]
pub struct Breach {
    pub alert_key: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub message: String,
    /// Action to fire if this breach opens a new incident
    pub remediation: Option<RemediationAction>,
}

/// A state change of the active set
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// A new incident was opened
    Opened {
        incident: Incident,
        remediation: Option<RemediationAction>,
    },
    /// An active incident was overwritten with a new reading and must be re-notified
    Escalated {
        incident: Incident,
        previous: Severity,
    },
    /// An already-critical incident was raised again at the same severity and must be re-notified
    Reraised { incident: Incident },
    /// An active incident returned to normal and left the set
    Resolved { incident: Incident },
}

impl Transition {
    /// The incident this transition carries
    pub fn incident(&self) -> &Incident {
        match self {
            Self::Opened { incident, .. }
            | Self::Escalated { incident, .. }
            | Self::Reraised { incident }
            | Self::Resolved { incident } => incident,
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Opened { .. } => "opened",
            Self::Escalated { .. } => "escalated",
            Self::Reraised { .. } => "reraised",
            Self::Resolved { .. } => "resolved",
        }
    }
}

/// Map of alert key to active incident
#[derive(Debug, Default)]
pub struct ActiveAlertSet {
    alerts: HashMap<String, Incident>,
}

impl ActiveAlertSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active incident for a key
    pub fn get(&self, alert_key: &str) -> Option<&Incident> {
        self.alerts.get(alert_key)
    }

    pub fn contains(&self, alert_key: &str) -> bool {
        self.alerts.contains_key(alert_key)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Iterate active incidents
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Incident)> {
        self.alerts.iter()
    }

    /// Count of active incidents at the given severity
    pub fn count(&self, severity: Severity) -> usize {
        self.alerts
            .values()
            .filter(|incident| incident.severity == severity)
            .count()
    }

    /// Open a new incident, or escalate the active one if severity strictly increased
    ///
    /// Equal or lower severity for an active key is dropped: no update, no transition.
    /// Escalation keeps the incident id and `opened_at` so the eventual resolution
    /// reports the full outage duration.
    pub fn open_or_escalate(&mut self, breach: Breach, now: DateTime<Utc>) -> Option<Transition> {
        if let Some(existing) = self.alerts.get_mut(&breach.alert_key) {
            if breach.severity.rank() <= existing.severity.rank() {
                return None;
            }

            let previous = existing.severity;
            overwrite(existing, breach, now);

            return Some(Transition::Escalated {
                incident: existing.clone(),
                previous,
            });
        }

        Some(self.insert_new(breach, now))
    }

    /// Unconditionally raise a critical incident, re-notifying even if one is active
    ///
    /// Used for unavailable endpoints. No remediation is attached to an overwrite.
    /// An active warning becomes `Escalated`; an active critical becomes `Reraised`.
    pub fn raise_critical(&mut self, mut breach: Breach, now: DateTime<Utc>) -> Transition {
        breach.severity = Severity::Critical;

        if let Some(existing) = self.alerts.get_mut(&breach.alert_key) {
            let previous = existing.severity;
            overwrite(existing, breach, now);

            let incident = existing.clone();
            return if previous == Severity::Critical {
                Transition::Reraised { incident }
            } else {
                Transition::Escalated { incident, previous }
            };
        }

        self.insert_new(breach, now)
    }

    /// Resolve and remove the active incident for a key
    ///
    /// Returns `None` when nothing is active, which makes resolution edge-triggered.
    pub fn resolve(&mut self, alert_key: &str, now: DateTime<Utc>) -> Option<Transition> {
        let mut incident = self.alerts.remove(alert_key)?;
        incident.resolved = true;
        incident.resolved_at = Some(now);

        Some(Transition::Resolved { incident })
    }

    fn insert_new(&mut self, breach: Breach, now: DateTime<Utc>) -> Transition {
        let remediation = breach.remediation;
        let incident = Incident::open(
            breach.alert_key.clone(),
            breach.metric,
            breach.value,
            breach.threshold,
            breach.severity,
            breach.message,
            now,
        );

        self.alerts.insert(breach.alert_key, incident.clone());

        Transition::Opened {
            incident,
            remediation,
        }
    }
}

fn overwrite(incident: &mut Incident, breach: Breach, now: DateTime<Utc>) {
    incident.metric = breach.metric;
    incident.current_value = breach.value;
    incident.threshold = breach.threshold;
    incident.severity = breach.severity;
    incident.message = breach.message;
    incident.escalated_at = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn breach(severity: Severity, value: f64) -> Breach {
        Breach {
            alert_key: "cpu_percentage".to_string(),
            metric: "cpu_percentage".to_string(),
            value,
            threshold: if severity == Severity::Critical { 85.0 } else { 70.0 },
            severity,
            message: format!("CPU {value:.2}"),
            remediation: Some(RemediationAction::RestartNonCriticalServices),
        }
    }

    #[test]
    fn test_first_breach_opens_incident_with_remediation() {
        let mut set = ActiveAlertSet::new();
        let now = Utc::now();

        let transition = set.open_or_escalate(breach(Severity::Warning, 72.0), now).unwrap();

        match transition {
            Transition::Opened { incident, remediation } => {
                assert_eq!(incident.severity, Severity::Warning);
                assert_eq!(incident.opened_at, now);
                assert_eq!(remediation, Some(RemediationAction::RestartNonCriticalServices));
            }
            other => panic!("expected Opened, got {other:?}"),
        }
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_same_or_lower_severity_is_dropped_without_update() {
        let mut set = ActiveAlertSet::new();
        let now = Utc::now();
        set.open_or_escalate(breach(Severity::Critical, 90.0), now);

        assert!(set.open_or_escalate(breach(Severity::Critical, 99.0), now).is_none());
        assert!(set.open_or_escalate(breach(Severity::Warning, 75.0), now).is_none());

        let active = set.get("cpu_percentage").unwrap();
        assert_eq!(active.current_value, 90.0);
        assert_eq!(active.severity, Severity::Critical);
    }

    #[test]
    fn test_escalation_preserves_identity_and_opened_at() {
        let mut set = ActiveAlertSet::new();
        let opened = Utc::now();
        let later = opened + Duration::seconds(120);

        let Transition::Opened { incident: first, .. } =
            set.open_or_escalate(breach(Severity::Warning, 72.0), opened).unwrap()
        else {
            panic!("expected Opened");
        };

        let transition = set.open_or_escalate(breach(Severity::Critical, 91.0), later).unwrap();
        let Transition::Escalated { incident, previous } = transition else {
            panic!("expected Escalated");
        };

        assert_eq!(previous, Severity::Warning);
        assert_eq!(incident.id, first.id);
        assert_eq!(incident.opened_at, opened);
        assert_eq!(incident.escalated_at, Some(later));
        assert_eq!(incident.current_value, 91.0);
        assert_eq!(incident.threshold, 85.0);
    }

    #[test]
    fn test_resolve_is_edge_triggered() {
        let mut set = ActiveAlertSet::new();
        let opened = Utc::now();
        set.open_or_escalate(breach(Severity::Critical, 90.0), opened);

        let resolved_at = opened + Duration::seconds(30);
        let Some(Transition::Resolved { incident }) = set.resolve("cpu_percentage", resolved_at)
        else {
            panic!("expected Resolved");
        };

        assert!(incident.resolved);
        assert_eq!(incident.duration(), Some(Duration::seconds(30)));
        assert!(set.is_empty());
        assert!(set.resolve("cpu_percentage", resolved_at).is_none());
    }

    #[test]
    fn test_raise_critical_always_transitions() {
        let mut set = ActiveAlertSet::new();
        let now = Utc::now();
        let mut down = breach(Severity::Critical, 0.0);
        down.alert_key = "api_Main API".to_string();
        down.remediation = None;

        let first = set.raise_critical(down.clone(), now);
        let second = set.raise_critical(down, now + Duration::seconds(60));

        assert_eq!(first.kind(), "opened");
        assert_eq!(second.kind(), "reraised");
        assert_eq!(second.incident().opened_at, now);
        assert_eq!(set.count(Severity::Critical), 1);
    }

    #[test]
    fn test_raise_critical_over_warning_is_an_escalation() {
        let mut set = ActiveAlertSet::new();
        let now = Utc::now();
        let mut slow = breach(Severity::Warning, 2500.0);
        slow.alert_key = "api_Search".to_string();
        set.open_or_escalate(slow.clone(), now);

        let transition = set.raise_critical(slow, now + Duration::seconds(60));

        let Transition::Escalated { incident, previous } = transition else {
            panic!("expected Escalated");
        };
        assert_eq!(previous, Severity::Warning);
        assert_eq!(incident.severity, Severity::Critical);
    }
}
