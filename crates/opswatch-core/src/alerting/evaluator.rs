//! Alert evaluation engine
//!
//! Classifies samples against the threshold catalog and drives the active
//! incident set through open, escalate, and resolve transitions.
//!
//! Policy:
//! - System metrics and API response times re-notify only when severity
//!   strictly increases. A critical incident that drops back to warning stays
//!   silent until it fully resolves.
//! - An unavailable API re-raises a critical incident on every reading.
//! - Resolution fires once per active-to-normal transition.
//!
//! Decisions are made while holding the active-set lock; persistence,
//! notification, and remediation run after it is released.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::catalog::ThresholdCatalog;
use crate::models::{
    ActiveAlertSummary, Incident, MetricClass, MetricDefinition, MetricStatus, ProbeResult,
    RemediationAction, Severity, StatusReport,
};

use super::notifier::Notifier;
use super::remediation::RemediationRegistry;
use super::repository::IncidentStore;
use super::store::{ActiveAlertSet, Breach, Transition};

/// A sample that could not be evaluated
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("{metric} produced a non-finite value ({value})")]
    NonFinite { metric: String, value: f64 },
}

/// Outcome counts of one evaluation pass
#[derive(Debug, Default)]
pub struct EvaluationSummary {
    /// Samples classified against a definition
    pub evaluated: usize,
    /// Samples with no applicable definition
    pub skipped: usize,
    pub opened: usize,
    pub escalated: usize,
    /// Critical incidents raised again for an unavailable endpoint
    pub reraised: usize,
    pub resolved: usize,
    /// Items that failed evaluation
    pub errors: Vec<EvaluationError>,
    /// Incident writes that failed
    pub persistence_failures: usize,
}

impl EvaluationSummary {
    /// Number of incident transitions
    pub fn transitions(&self) -> usize {
        self.opened + self.escalated + self.reraised + self.resolved
    }

    fn count(&mut self, transition: &Transition) {
        match transition {
            Transition::Opened { .. } => self.opened += 1,
            Transition::Escalated { .. } => self.escalated += 1,
            Transition::Reraised { .. } => self.reraised += 1,
            Transition::Resolved { .. } => self.resolved += 1,
        }
    }
}

/// Result of deciding a single sample
enum Decision {
    Skip,
    Evaluated(Option<Transition>),
}

/// Alert evaluator over the active incident set
pub struct AlertEvaluator {
    catalog: Arc<ThresholdCatalog>,
    alerts: Mutex<ActiveAlertSet>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn IncidentStore>,
    remediation: RemediationRegistry,
    automatic_actions: bool,
}

impl AlertEvaluator {
    /// Create an evaluator with remediation disabled
    pub fn new(
        catalog: Arc<ThresholdCatalog>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn IncidentStore>,
    ) -> Self {
        Self {
            catalog,
            alerts: Mutex::new(ActiveAlertSet::new()),
            notifier,
            store,
            remediation: RemediationRegistry::new(),
            automatic_actions: false,
        }
    }

    /// Enable remediation through `registry` when `automatic_actions` is set
    #[must_use]
    pub fn with_remediation(mut self, registry: RemediationRegistry, automatic_actions: bool) -> Self {
        self.remediation = registry;
        self.automatic_actions = automatic_actions;
        self
    }

    /// The catalog in use
    pub fn catalog(&self) -> &ThresholdCatalog {
        &self.catalog
    }

    /// Evaluate one batch of system metric samples
    pub async fn evaluate_system_batch(&self, samples: &HashMap<String, f64>) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();
        let now = Utc::now();

        let transitions = {
            let mut alerts = self.alerts.lock();
            let mut transitions = Vec::new();

            for (name, &value) in samples {
                match self.decide_system(&mut alerts, name, value, now) {
                    Ok(Decision::Skip) => summary.skipped += 1,
                    Ok(Decision::Evaluated(transition)) => {
                        summary.evaluated += 1;
                        transitions.extend(transition);
                    }
                    Err(e) => {
                        warn!(error = %e, "Skipping sample");
                        summary.errors.push(e);
                    }
                }
            }

            transitions
        };

        self.apply(transitions, &mut summary).await;
        summary
    }

    /// Evaluate one batch of API probe results
    pub async fn evaluate_api_batch(&self, results: &[ProbeResult]) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();
        let now = Utc::now();

        let transitions = {
            let mut alerts = self.alerts.lock();
            let mut transitions = Vec::new();

            for result in results {
                match self.decide_api(&mut alerts, result, now) {
                    Ok(Decision::Skip) => summary.skipped += 1,
                    Ok(Decision::Evaluated(transition)) => {
                        summary.evaluated += 1;
                        transitions.extend(transition);
                    }
                    Err(e) => {
                        warn!(error = %e, "Skipping probe result");
                        summary.errors.push(e);
                    }
                }
            }

            transitions
        };

        self.apply(transitions, &mut summary).await;
        summary
    }

    /// Resolve the active incident for `alert_key`, if any
    ///
    /// Returns the resolved incident; a second call for the same key is a no-op.
    pub async fn resolve(&self, alert_key: &str) -> Option<Incident> {
        let transition = self.alerts.lock().resolve(alert_key, Utc::now())?;
        let incident = transition.incident().clone();

        let mut summary = EvaluationSummary::default();
        self.apply(vec![transition], &mut summary).await;
        Some(incident)
    }

    fn decide_system(
        &self,
        alerts: &mut ActiveAlertSet,
        name: &str,
        value: f64,
        now: chrono::DateTime<Utc>,
    ) -> Result<Decision, EvaluationError> {
        let Some(def) = self
            .catalog
            .lookup(name)
            .filter(|def| def.class == MetricClass::System)
        else {
            return Ok(Decision::Skip);
        };

        if !value.is_finite() {
            return Err(EvaluationError::NonFinite {
                metric: name.to_string(),
                value,
            });
        }

        let transition = match def.classify(value).severity() {
            None => alerts.resolve(name, now),
            Some(severity) => {
                let threshold = def.threshold_for(severity);
                let breach = Breach {
                    alert_key: name.to_string(),
                    metric: name.to_string(),
                    value,
                    threshold,
                    severity,
                    message: format!(
                        "{}: {value:.2}{unit} (threshold: {threshold}{unit})",
                        def.description,
                        unit = def.unit
                    ),
                    remediation: def.remediation_action,
                };
                alerts.open_or_escalate(breach, now)
            }
        };

        Ok(Decision::Evaluated(transition))
    }

    fn decide_api(
        &self,
        alerts: &mut ActiveAlertSet,
        result: &ProbeResult,
        now: chrono::DateTime<Utc>,
    ) -> Result<Decision, EvaluationError> {
        let alert_key = api_alert_key(&result.name);
        let metric = format!("API {}", result.name);

        if !result.available {
            let detail = match (&result.error, result.status_code) {
                (Some(error), _) => error.clone(),
                (None, 0) => "No response".to_string(),
                (None, status) => format!("HTTP {status}"),
            };
            let breach = Breach {
                alert_key,
                metric,
                value: 0.0,
                threshold: 0.0,
                severity: Severity::Critical,
                message: format!("API not available - {detail}"),
                remediation: None,
            };
            return Ok(Decision::Evaluated(Some(alerts.raise_critical(breach, now))));
        }

        // Without a response-time definition, reaching the endpoint is enough to be normal
        let Some(def) = self.catalog.api_response_time() else {
            return Ok(Decision::Evaluated(alerts.resolve(&alert_key, now)));
        };

        let value = result.response_time_ms;
        if !value.is_finite() {
            return Err(EvaluationError::NonFinite {
                metric: alert_key,
                value,
            });
        }

        let transition = match def.classify(value).severity() {
            None => alerts.resolve(&alert_key, now),
            Some(severity) => {
                let breach = response_time_breach(def, alert_key, metric, value, severity);
                alerts.open_or_escalate(breach, now)
            }
        };

        Ok(Decision::Evaluated(transition))
    }

    /// Carry out the side effects of each transition
    async fn apply(&self, transitions: Vec<Transition>, summary: &mut EvaluationSummary) {
        for transition in transitions {
            summary.count(&transition);
            metrics::counter!("opswatch_incident_transitions_total", "kind" => transition.kind())
                .increment(1);

            if let Err(e) = self.store.save_incident(transition.incident()).await {
                warn!(
                    alert_key = %transition.incident().alert_key,
                    error = %e,
                    "Failed to persist incident"
                );
                summary.persistence_failures += 1;
            }

            match transition {
                Transition::Opened {
                    incident,
                    remediation,
                } => {
                    warn!(
                        alert_key = %incident.alert_key,
                        severity = %incident.severity,
                        "ALERT {}: {}",
                        incident.severity.as_str().to_uppercase(),
                        incident.message
                    );
                    self.notifier.notify_open(&incident).await;
                    if let Some(action) = remediation {
                        self.fire_remediation(action, incident);
                    }
                }
                Transition::Escalated { incident, previous } => {
                    warn!(
                        alert_key = %incident.alert_key,
                        from = %previous,
                        to = %incident.severity,
                        "ALERT {}: {}",
                        incident.severity.as_str().to_uppercase(),
                        incident.message
                    );
                    self.notifier.notify_open(&incident).await;
                }
                Transition::Reraised { incident } => {
                    warn!(
                        alert_key = %incident.alert_key,
                        "ALERT CRITICAL: {}",
                        incident.message
                    );
                    self.notifier.notify_open(&incident).await;
                }
                Transition::Resolved { incident } => {
                    info!(
                        alert_key = %incident.alert_key,
                        duration_secs = incident.duration().map_or(0, |d| d.num_seconds()),
                        "Alert resolved: {}",
                        incident.metric
                    );
                    self.notifier.notify_resolved(&incident).await;
                }
            }
        }
    }

    fn fire_remediation(&self, action: RemediationAction, incident: Incident) {
        if !self.automatic_actions {
            debug!(action = %action, "Automatic actions disabled");
            return;
        }

        let Some(handler) = self.remediation.handler(action) else {
            warn!(action = %action, "No handler registered for remediation action");
            return;
        };

        info!(action = %action, alert_key = %incident.alert_key, "Executing automatic action");
        tokio::spawn(async move {
            if let Err(e) = handler.trigger(&incident).await {
                error!(action = %action, error = %e, "Error executing automatic action");
            }
        });
    }

    /// Snapshot of the active incidents
    pub fn active_alerts(&self) -> Vec<Incident> {
        self.alerts
            .lock()
            .iter()
            .map(|(_, incident)| incident.clone())
            .collect()
    }

    /// The active incident for a key
    pub fn active_alert(&self, alert_key: &str) -> Option<Incident> {
        self.alerts.lock().get(alert_key).cloned()
    }

    /// Active (critical, warning) counts
    pub fn alert_counts(&self) -> (usize, usize) {
        let alerts = self.alerts.lock();
        (alerts.count(Severity::Critical), alerts.count(Severity::Warning))
    }

    /// Build the status report for the given system metrics
    pub fn status_report(&self, system_metrics: BTreeMap<String, f64>) -> StatusReport {
        let now = Utc::now();
        let alerts = self.alerts.lock();

        let active_alerts: BTreeMap<String, ActiveAlertSummary> = alerts
            .iter()
            .map(|(key, incident)| {
                let active = incident.active_duration(now);
                (
                    key.clone(),
                    ActiveAlertSummary {
                        metric: incident.metric.clone(),
                        severity: incident.severity,
                        current_value: incident.current_value,
                        message: incident.message.clone(),
                        active_duration_seconds: active.num_milliseconds() as f64 / 1000.0,
                    },
                )
            })
            .collect();

        let total_critical = alerts.count(Severity::Critical);
        let total_warning = alerts.count(Severity::Warning);

        StatusReport {
            timestamp: now,
            system_metrics,
            active_alerts,
            total_critical,
            total_warning,
            system_healthy: total_critical == 0,
        }
    }
}

/// Alert key used for an API probe
pub fn api_alert_key(probe_name: &str) -> String {
    format!("api_{probe_name}")
}

/// Catalog status used when persisting a sample
pub fn sample_status(catalog: &ThresholdCatalog, name: &str, value: f64) -> MetricStatus {
    if value.is_finite() {
        catalog.classify(name, value)
    } else {
        MetricStatus::Normal
    }
}

fn response_time_breach(
    def: &MetricDefinition,
    alert_key: String,
    metric: String,
    value: f64,
    severity: Severity,
) -> Breach {
    let threshold = def.threshold_for(severity);
    Breach {
        alert_key,
        metric,
        value,
        threshold,
        severity,
        message: format!(
            "High response time: {value:.2}{unit} (threshold: {threshold}{unit})",
            unit = def.unit
        ),
        remediation: def.remediation_action,
    }
}
