//! Threshold catalog
//!
//! Read-only set of metric definitions consulted by the evaluator. Metrics
//! without a definition are informational: they are persisted as `normal`
//! and never alert.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::models::{MetricClass, MetricDefinition, MetricStatus, RemediationAction};

/// Name of the single definition shared by every API probe's response time
pub const API_RESPONSE_TIME: &str = "api_response_time";

/// Definitions used when the configuration does not override them
pub fn default_definitions() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new(
            "cpu_percentage",
            MetricClass::System,
            85.0,
            70.0,
            "%",
            "Server CPU usage",
        )
        .with_remediation(RemediationAction::RestartNonCriticalServices),
        MetricDefinition::new(
            "memory_percentage",
            MetricClass::System,
            90.0,
            75.0,
            "%",
            "RAM memory usage",
        )
        .with_remediation(RemediationAction::ClearCache),
        MetricDefinition::new(
            "disk_percentage",
            MetricClass::System,
            85.0,
            70.0,
            "%",
            "Disk space utilization",
        )
        .with_remediation(RemediationAction::CleanOldLogs),
        MetricDefinition::new(
            API_RESPONSE_TIME,
            MetricClass::Api,
            5000.0,
            2000.0,
            "ms",
            "Critical API response time",
        )
        .with_remediation(RemediationAction::ScaleInstances),
    ]
}

/// Validated lookup table of metric definitions
#[derive(Debug, Clone)]
pub struct ThresholdCatalog {
    definitions: HashMap<String, MetricDefinition>,
}

impl ThresholdCatalog {
    /// Build a catalog, rejecting malformed definitions
    pub fn new(definitions: Vec<MetricDefinition>) -> Result<Self> {
        let mut map = HashMap::with_capacity(definitions.len());

        for def in definitions {
            validate_definition(&def)?;
            if map.contains_key(&def.name) {
                return Err(Error::validation(format!(
                    "duplicate metric definition '{}'",
                    def.name
                )));
            }
            map.insert(def.name.clone(), def);
        }

        Ok(Self { definitions: map })
    }

    /// Look up a definition by metric name
    pub fn lookup(&self, name: &str) -> Option<&MetricDefinition> {
        self.definitions.get(name)
    }

    /// Classify a sample; unconfigured metrics are always normal
    pub fn classify(&self, name: &str, value: f64) -> MetricStatus {
        self.lookup(name)
            .map_or(MetricStatus::Normal, |def| def.classify(value))
    }

    /// The shared response-time definition for API probes
    pub fn api_response_time(&self) -> Option<&MetricDefinition> {
        self.lookup(API_RESPONSE_TIME)
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Iterate definitions in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.values()
    }
}

impl Default for ThresholdCatalog {
    fn default() -> Self {
        Self {
            definitions: default_definitions()
                .into_iter()
                .map(|def| (def.name.clone(), def))
                .collect(),
        }
    }
}

fn validate_definition(def: &MetricDefinition) -> Result<()> {
    if def.name.trim().is_empty() {
        return Err(Error::validation("metric definition with empty name"));
    }

    if !def.critical_threshold.is_finite() || !def.warning_threshold.is_finite() {
        return Err(Error::validation(format!(
            "metric '{}' has a non-finite threshold",
            def.name
        )));
    }

    if def.critical_threshold < def.warning_threshold {
        return Err(Error::validation(format!(
            "metric '{}': critical threshold {} is below warning threshold {}",
            def.name, def.critical_threshold, def.warning_threshold
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn cpu() -> MetricDefinition {
        MetricDefinition::new("cpu", MetricClass::System, 85.0, 70.0, "%", "CPU")
    }

    #[rstest]
    #[case(10.0, MetricStatus::Normal)]
    #[case(69.99, MetricStatus::Normal)]
    #[case(70.0, MetricStatus::Warning)]
    #[case(84.9, MetricStatus::Warning)]
    #[case(85.0, MetricStatus::Critical)]
    #[case(120.0, MetricStatus::Critical)]
    fn test_classify_boundaries(#[case] value: f64, #[case] expected: MetricStatus) {
        let catalog = ThresholdCatalog::new(vec![cpu()]).unwrap();
        assert_eq!(catalog.classify("cpu", value), expected);
    }

    #[test]
    fn test_unconfigured_metric_is_normal() {
        let catalog = ThresholdCatalog::default();
        assert!(catalog.lookup("queue_depth").is_none());
        assert_eq!(catalog.classify("queue_depth", 1000.0), MetricStatus::Normal);
    }

    #[test]
    fn test_default_catalog_has_shared_api_definition() {
        let catalog = ThresholdCatalog::default();
        assert_eq!(catalog.len(), 4);

        let api = catalog.api_response_time().unwrap();
        assert_eq!(api.class, MetricClass::Api);
        assert_eq!(api.critical_threshold, 5000.0);
        assert_eq!(api.remediation_action, Some(RemediationAction::ScaleInstances));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut def = cpu();
        def.critical_threshold = 50.0;

        let err = ThresholdCatalog::new(vec![def]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_rejects_duplicates_and_nan() {
        assert!(ThresholdCatalog::new(vec![cpu(), cpu()]).is_err());

        let mut def = cpu();
        def.warning_threshold = f64::NAN;
        assert!(ThresholdCatalog::new(vec![def]).is_err());
    }

    #[test]
    fn test_equal_thresholds_are_accepted() {
        let mut def = cpu();
        def.warning_threshold = 85.0;

        let catalog = ThresholdCatalog::new(vec![def]).unwrap();
        assert_eq!(catalog.classify("cpu", 85.0), MetricStatus::Critical);
    }

    #[test]
    fn test_unknown_remediation_tag_fails_to_parse() {
        let json = r#"{
            "name": "cpu",
            "class": "system",
            "critical_threshold": 85.0,
            "warning_threshold": 70.0,
            "unit": "%",
            "description": "CPU",
            "remediation_action": "reboot_the_world"
        }"#;
        assert!(serde_json::from_str::<MetricDefinition>(json).is_err());
    }

    proptest! {
        #[test]
        fn prop_status_never_decreases_as_value_grows(
            warning in 0.0f64..1000.0,
            gap in 0.0f64..1000.0,
            a in -100.0f64..3000.0,
            b in -100.0f64..3000.0,
        ) {
            let def = MetricDefinition::new(
                "m", MetricClass::System, warning + gap, warning, "", "m",
            );
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(def.classify(lo) <= def.classify(hi));
        }
    }
}
