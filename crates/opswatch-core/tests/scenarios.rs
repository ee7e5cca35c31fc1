//! End-to-end alert lifecycle scenarios

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;

use opswatch::alerting::{AlertEvaluator, IncidentStore, Notifier, SqliteRepository};
use opswatch::catalog::ThresholdCatalog;
use opswatch::collector::{ApiProbeSource, MetricBatch, SystemMetricSource};
use opswatch::models::{
    Incident, MetricClass, MetricDefinition, MetricStatus, ProbeResult, Severity,
};
use opswatch::{Monitor, Result};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Open(String, Severity),
    Resolved(String),
}

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<Call>>,
}

impl RecordingNotifier {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_open(&self, incident: &Incident) {
        self.calls
            .lock()
            .push(Call::Open(incident.alert_key.clone(), incident.severity));
    }

    async fn notify_resolved(&self, incident: &Incident) {
        self.calls.lock().push(Call::Resolved(incident.alert_key.clone()));
    }
}

#[derive(Default)]
struct RecordingStore {
    metrics: Mutex<Vec<(String, f64, MetricStatus)>>,
    incidents: Mutex<Vec<Incident>>,
}

#[async_trait]
impl IncidentStore for RecordingStore {
    async fn save_metric(&self, metric: &str, value: f64, status: MetricStatus) -> Result<()> {
        self.metrics.lock().push((metric.to_string(), value, status));
        Ok(())
    }

    async fn save_incident(&self, incident: &Incident) -> Result<()> {
        self.incidents.lock().push(incident.clone());
        Ok(())
    }
}

struct StaticSystem(HashMap<String, f64>);

#[async_trait]
impl SystemMetricSource for StaticSystem {
    async fn collect(&self) -> MetricBatch {
        MetricBatch {
            samples: self.0.clone(),
            errors: Vec::new(),
        }
    }
}

struct StaticProbes(Vec<ProbeResult>);

#[async_trait]
impl ApiProbeSource for StaticProbes {
    async fn check_all(&self) -> Vec<ProbeResult> {
        self.0.clone()
    }
}

fn cpu_catalog() -> Arc<ThresholdCatalog> {
    let cpu = MetricDefinition::new("cpu", MetricClass::System, 85.0, 70.0, "%", "CPU usage");
    Arc::new(ThresholdCatalog::new(vec![cpu]).unwrap())
}

fn evaluator(
    catalog: Arc<ThresholdCatalog>,
) -> (AlertEvaluator, Arc<RecordingNotifier>, Arc<RecordingStore>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(RecordingStore::default());
    let evaluator = AlertEvaluator::new(catalog, notifier.clone(), store.clone());
    (evaluator, notifier, store)
}

fn sample(name: &str, value: f64) -> HashMap<String, f64> {
    HashMap::from([(name.to_string(), value)])
}

#[tokio::test]
async fn critical_sample_opens_incident_then_normal_sample_resolves_it() {
    let (evaluator, notifier, store) = evaluator(cpu_catalog());

    evaluator.evaluate_system_batch(&sample("cpu", 90.0)).await;

    let incident = evaluator.active_alert("cpu").unwrap();
    assert_eq!(incident.severity, Severity::Critical);
    assert_eq!(incident.threshold, 85.0);
    assert!(incident.message.contains("90.00"));
    assert!(incident.message.contains("85"));
    assert_eq!(notifier.calls(), vec![Call::Open("cpu".into(), Severity::Critical)]);

    evaluator.evaluate_system_batch(&sample("cpu", 60.0)).await;

    assert!(evaluator.active_alerts().is_empty());
    assert_eq!(
        notifier.calls(),
        vec![
            Call::Open("cpu".into(), Severity::Critical),
            Call::Resolved("cpu".into()),
        ]
    );

    let persisted = store.incidents.lock().clone();
    assert_eq!(persisted.len(), 2);
    assert_eq!(persisted[0].id, persisted[1].id);
    assert!(persisted[1].resolved);
}

#[tokio::test]
async fn unavailable_api_is_renotified_on_every_failing_probe() {
    let (evaluator, notifier, _) = evaluator(Arc::new(ThresholdCatalog::default()));
    let failing = ProbeResult::down("Main API", "connection refused");

    evaluator.evaluate_api_batch(&[failing.clone()]).await;
    evaluator.evaluate_api_batch(&[failing]).await;

    let key = "api_Main API".to_string();
    assert_eq!(
        notifier.calls(),
        vec![
            Call::Open(key.clone(), Severity::Critical),
            Call::Open(key.clone(), Severity::Critical),
        ]
    );
    assert_eq!(evaluator.active_alerts().len(), 1);

    evaluator
        .evaluate_api_batch(&[ProbeResult::up("Main API", 200, 80.0)])
        .await;
    assert_eq!(notifier.calls().last(), Some(&Call::Resolved(key)));
}

#[tokio::test]
async fn escalation_is_monotonic_and_keeps_the_opening_time() {
    let (evaluator, notifier, store) = evaluator(cpu_catalog());

    evaluator.evaluate_system_batch(&sample("cpu", 72.0)).await;
    let opened = evaluator.active_alert("cpu").unwrap();

    evaluator.evaluate_system_batch(&sample("cpu", 88.0)).await;
    evaluator.evaluate_system_batch(&sample("cpu", 74.0)).await;
    evaluator.evaluate_system_batch(&sample("cpu", 99.0)).await;

    assert_eq!(
        notifier.calls(),
        vec![
            Call::Open("cpu".into(), Severity::Warning),
            Call::Open("cpu".into(), Severity::Critical),
        ]
    );

    let escalated = evaluator.active_alert("cpu").unwrap();
    assert_eq!(escalated.id, opened.id);
    assert_eq!(escalated.opened_at, opened.opened_at);
    assert_eq!(escalated.current_value, 88.0);
    assert!(escalated.escalated_at.is_some());

    // one row per transition, none for the dropped readings
    assert_eq!(store.incidents.lock().len(), 2);
}

#[tokio::test]
async fn second_normal_sample_does_not_resolve_again() {
    let (evaluator, notifier, _) = evaluator(cpu_catalog());

    evaluator.evaluate_system_batch(&sample("cpu", 75.0)).await;
    evaluator.evaluate_system_batch(&sample("cpu", 10.0)).await;
    evaluator.evaluate_system_batch(&sample("cpu", 10.0)).await;

    let resolutions = notifier
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Resolved(_)))
        .count();
    assert_eq!(resolutions, 1);
}

#[tokio::test]
async fn unconfigured_metric_is_recorded_as_normal_without_alerting() {
    let catalog = cpu_catalog();
    let (evaluator, notifier, _) = evaluator(catalog);
    let store = Arc::new(RecordingStore::default());

    let monitor = Monitor::new(
        Arc::new(StaticSystem(sample("queue_depth", 1000.0))),
        Arc::new(StaticProbes(Vec::new())),
        Arc::new(evaluator),
        store.clone(),
    );

    let report = monitor.run_cycle().await;

    assert_eq!(
        store.metrics.lock().clone(),
        vec![("queue_depth".to_string(), 1000.0, MetricStatus::Normal)]
    );
    assert_eq!(report.system.skipped, 1);
    assert!(notifier.calls().is_empty());
    assert!(monitor.last_status_report().system_healthy);
}

#[tokio::test]
async fn cycle_history_lands_in_sqlite() {
    let repository = SqliteRepository::in_memory().await.unwrap();
    repository.migrate().await.unwrap();
    let repository = Arc::new(repository);

    let notifier = Arc::new(RecordingNotifier::default());
    let evaluator = AlertEvaluator::new(cpu_catalog(), notifier.clone(), repository.clone());

    let monitor = Monitor::new(
        Arc::new(StaticSystem(sample("cpu", 91.0))),
        Arc::new(StaticProbes(vec![ProbeResult::up("Billing", 503, 15.0)])),
        Arc::new(evaluator),
        repository.clone(),
    );

    let report = monitor.run_cycle().await;
    assert_eq!(report.total_critical, 2);

    let metrics = repository.metric_history("cpu", 10).await.unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].status, "critical");

    let incidents = repository.recent_incidents(10).await.unwrap();
    let mut keys: Vec<_> = incidents.iter().map(|r| r.alert_key.clone()).collect();
    keys.sort();
    assert_eq!(keys, vec!["api_Billing".to_string(), "cpu".to_string()]);
}
