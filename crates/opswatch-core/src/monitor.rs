//! Monitoring cycle driver
//!
//! One pass collects host metrics and probes endpoints concurrently, records the
//! samples, and feeds both batches to the evaluator. [`Monitor::run`] repeats the
//! pass every interval until the stop flag is raised.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::alerting::{
    sample_status, AlertEvaluator, EvaluationSummary, IncidentStore, NotificationDispatcher,
    RemediationRegistry, SqliteRepository,
};
use crate::collector::{ApiProbeSource, HostCollector, HttpProber, SystemMetricSource};
use crate::config::Config;
use crate::error::Result;
use crate::models::StatusReport;

/// Outcome of one monitoring pass
#[derive(Debug, Default)]
pub struct CycleReport {
    pub system: EvaluationSummary,
    pub api: EvaluationSummary,
    /// Metrics that could not be collected
    pub collection_errors: usize,
    /// Samples that could not be recorded
    pub persistence_failures: usize,
    pub total_critical: usize,
    pub total_warning: usize,
}

/// Periodic driver over the metric sources and the evaluator
#[derive(Clone)]
pub struct Monitor {
    system: Arc<dyn SystemMetricSource>,
    probes: Arc<dyn ApiProbeSource>,
    evaluator: Arc<AlertEvaluator>,
    store: Arc<dyn IncidentStore>,
    interval: Duration,
    backoff: Duration,
    last_metrics: Arc<Mutex<BTreeMap<String, f64>>>,
}

impl Monitor {
    /// Create a monitor with a 60s interval and 30s backoff
    pub fn new(
        system: Arc<dyn SystemMetricSource>,
        probes: Arc<dyn ApiProbeSource>,
        evaluator: Arc<AlertEvaluator>,
        store: Arc<dyn IncidentStore>,
    ) -> Self {
        Self {
            system,
            probes,
            evaluator,
            store,
            interval: Duration::from_secs(60),
            backoff: Duration::from_secs(30),
            last_metrics: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Set the cycle interval and the delay after a failed cycle
    #[must_use]
    pub fn with_timing(mut self, interval: Duration, backoff: Duration) -> Self {
        self.interval = interval;
        self.backoff = backoff;
        self
    }

    /// Wire the production sources, store, and notifier from configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        let catalog = Arc::new(config.catalog()?);

        let remediation = RemediationRegistry::simulated();
        remediation.validate_against(&catalog)?;

        let repository = SqliteRepository::connect(&config.database_url).await?;
        repository.migrate().await?;
        let store: Arc<dyn IncidentStore> = Arc::new(repository);

        let notifier = Arc::new(NotificationDispatcher::from_config(config)?);
        let evaluator = AlertEvaluator::new(catalog, notifier, store.clone())
            .with_remediation(remediation, config.automatic_actions);

        let prober = HttpProber::new(config.critical_apis.clone(), config.probe_concurrency)?;

        Ok(Self::new(
            Arc::new(HostCollector::new()),
            Arc::new(prober),
            Arc::new(evaluator),
            store,
        )
        .with_timing(
            Duration::from_secs(config.monitoring_interval_seconds),
            Duration::from_secs(config.retry_backoff_seconds),
        ))
    }

    /// The evaluator driven by this monitor
    pub fn evaluator(&self) -> &AlertEvaluator {
        &self.evaluator
    }

    /// Run one monitoring pass
    pub async fn run_cycle(&self) -> CycleReport {
        debug!("Starting monitoring cycle");

        let (batch, probes) = tokio::join!(self.system.collect(), self.probes.check_all());

        for e in &batch.errors {
            warn!(error = %e, "Metric collection failed");
        }

        let mut persistence_failures = 0;
        for (name, &value) in &batch.samples {
            let status = sample_status(self.evaluator.catalog(), name, value);
            if let Err(e) = self.store.save_metric(name, value, status).await {
                warn!(metric = %name, error = %e, "Failed to record metric");
                persistence_failures += 1;
            }
        }

        *self.last_metrics.lock() = batch
            .samples
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect();

        let system = self.evaluator.evaluate_system_batch(&batch.samples).await;
        let api = self.evaluator.evaluate_api_batch(&probes).await;
        let (total_critical, total_warning) = self.evaluator.alert_counts();

        info!(
            samples = batch.samples.len(),
            probes = probes.len(),
            transitions = system.transitions() + api.transitions(),
            "Monitoring completed - Active alerts: {total_critical} critical, {total_warning} warnings"
        );

        CycleReport {
            persistence_failures: persistence_failures
                + system.persistence_failures
                + api.persistence_failures,
            system,
            api,
            collection_errors: batch.errors.len(),
            total_critical,
            total_warning,
        }
    }

    /// Run one pass in its own task; a panic comes back as a `JoinError`
    pub async fn run_cycle_guarded(&self) -> std::result::Result<CycleReport, JoinError> {
        let monitor = self.clone();
        tokio::spawn(async move { monitor.run_cycle().await }).await
    }

    /// Run cycles until `shutdown` becomes true or its sender is dropped
    ///
    /// The flag is observed between cycles and while waiting; a running cycle is
    /// never interrupted. A cycle that panics is logged and followed by the backoff.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = %humantime::format_duration(self.interval),
            "Monitoring started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_cycle_guarded().await {
                Ok(report) => {
                    metrics::counter!("opswatch_cycles_total", "outcome" => "ok").increment(1);
                    debug!(
                        opened = report.system.opened + report.api.opened,
                        resolved = report.system.resolved + report.api.resolved,
                        collection_errors = report.collection_errors,
                        persistence_failures = report.persistence_failures,
                        "Cycle finished"
                    );
                    self.interval
                }
                Err(e) => {
                    metrics::counter!("opswatch_cycles_total", "outcome" => "failed").increment(1);
                    error!(
                        error = %e,
                        retry_in = %humantime::format_duration(self.backoff),
                        "Error in monitoring cycle"
                    );
                    self.backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Monitoring stopped");
    }

    /// Status report with freshly collected system metrics
    pub async fn status_report(&self) -> StatusReport {
        let batch = self.system.collect().await;
        for e in &batch.errors {
            warn!(error = %e, "Metric collection failed");
        }

        let metrics: BTreeMap<String, f64> = batch.samples.into_iter().collect();
        *self.last_metrics.lock() = metrics.clone();
        self.evaluator.status_report(metrics)
    }

    /// Status report with the metrics of the last cycle
    pub fn last_status_report(&self) -> StatusReport {
        let metrics = self.last_metrics.lock().clone();
        self.evaluator.status_report(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::Notifier;
    use crate::catalog::ThresholdCatalog;
    use crate::collector::MetricBatch;
    use crate::models::{Incident, MetricStatus, ProbeResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        samples: HashMap<String, f64>,
        calls: AtomicUsize,
        panic_on_first: bool,
    }

    impl FixedSource {
        fn new(samples: &[(&str, f64)]) -> Self {
            Self {
                samples: samples.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                calls: AtomicUsize::new(0),
                panic_on_first: false,
            }
        }
    }

    #[async_trait]
    impl SystemMetricSource for FixedSource {
        async fn collect(&self) -> MetricBatch {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_first && call == 0 {
                panic!("collector blew up");
            }
            MetricBatch {
                samples: self.samples.clone(),
                errors: Vec::new(),
            }
        }
    }

    struct NoProbes;

    #[async_trait]
    impl ApiProbeSource for NoProbes {
        async fn check_all(&self) -> Vec<ProbeResult> {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify_open(&self, _: &Incident) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }

        async fn notify_resolved(&self, _: &Incident) {}
    }

    #[derive(Default)]
    struct MemoryStore {
        metrics: Mutex<Vec<(String, f64, MetricStatus)>>,
    }

    #[async_trait]
    impl IncidentStore for MemoryStore {
        async fn save_metric(&self, metric: &str, value: f64, status: MetricStatus) -> Result<()> {
            self.metrics.lock().push((metric.to_string(), value, status));
            Ok(())
        }

        async fn save_incident(&self, _: &Incident) -> Result<()> {
            Ok(())
        }
    }

    fn monitor(source: Arc<FixedSource>) -> (Monitor, Arc<MemoryStore>, Arc<CountingNotifier>) {
        let store = Arc::new(MemoryStore::default());
        let notifier = Arc::new(CountingNotifier::default());
        let evaluator = AlertEvaluator::new(
            Arc::new(ThresholdCatalog::default()),
            notifier.clone(),
            store.clone(),
        );
        let monitor = Monitor::new(source, Arc::new(NoProbes), Arc::new(evaluator), store.clone())
            .with_timing(Duration::from_millis(10), Duration::from_millis(10));
        (monitor, store, notifier)
    }

    #[tokio::test]
    async fn test_cycle_records_every_sample_with_status() {
        let source = Arc::new(FixedSource::new(&[
            ("cpu_percentage", 90.0),
            ("memory_percentage", 80.0),
            ("queue_depth", 1000.0),
        ]));
        let (monitor, store, notifier) = monitor(source);

        let report = monitor.run_cycle().await;

        let mut recorded = store.metrics.lock().clone();
        recorded.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            recorded,
            vec![
                ("cpu_percentage".to_string(), 90.0, MetricStatus::Critical),
                ("memory_percentage".to_string(), 80.0, MetricStatus::Warning),
                ("queue_depth".to_string(), 1000.0, MetricStatus::Normal),
            ]
        );
        assert_eq!(report.total_critical, 1);
        assert_eq!(report.total_warning, 1);
        assert_eq!(report.system.skipped, 1);
        assert_eq!(notifier.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_flag() {
        let source = Arc::new(FixedSource::new(&[("cpu_percentage", 10.0)]));
        let (monitor, _, _) = monitor(source.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { monitor.run(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(source.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_run_survives_panicking_cycle() {
        let mut source = FixedSource::new(&[("cpu_percentage", 95.0)]);
        source.panic_on_first = true;
        let source = Arc::new(source);
        let (monitor, _, notifier) = monitor(source.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { monitor.run(rx).await });
        tokio::time::timeout(Duration::from_secs(2), async {
            while notifier.opened.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(source.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_guarded_cycle_reports_panic_as_error() {
        let mut source = FixedSource::new(&[("cpu_percentage", 95.0)]);
        source.panic_on_first = true;
        let (monitor, _, notifier) = monitor(Arc::new(source));

        assert!(monitor.run_cycle_guarded().await.unwrap_err().is_panic());

        let report = monitor.run_cycle_guarded().await.unwrap();
        assert_eq!(report.total_critical, 1);
        assert_eq!(notifier.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_cycle_waits_backoff_not_interval() {
        let mut source = FixedSource::new(&[("cpu_percentage", 10.0)]);
        source.panic_on_first = true;
        let source = Arc::new(source);
        let (monitor, _, _) = monitor(source.clone());
        let monitor = monitor.with_timing(Duration::from_millis(10), Duration::from_secs(30));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { monitor.run(rx).await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_successful_cycle_waits_interval_not_backoff() {
        let source = Arc::new(FixedSource::new(&[("cpu_percentage", 10.0)]));
        let (monitor, _, _) = monitor(source.clone());
        let monitor = monitor.with_timing(Duration::from_secs(30), Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { monitor.run(rx).await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_report_uses_fresh_metrics() {
        let source = Arc::new(FixedSource::new(&[("cpu_percentage", 42.0)]));
        let (monitor, _, _) = monitor(source);

        let report = monitor.status_report().await;

        assert_eq!(report.system_metrics["cpu_percentage"], 42.0);
        assert!(report.system_healthy);
        assert_eq!(monitor.last_status_report().system_metrics.len(), 1);
    }
}
