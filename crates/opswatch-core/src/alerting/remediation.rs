//! Automatic remediation
//!
//! Each [`RemediationAction`] maps to a handler resolved once at startup.
//! Handlers fire only when a new incident opens; their outcome never feeds
//! back into alerting state.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::catalog::ThresholdCatalog;
use crate::error::{Error, Result};
use crate::models::{Incident, RemediationAction};

/// Remediation errors
#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    #[error("{action} failed: {reason}")]
    Failed {
        action: RemediationAction,
        reason: String,
    },
}

/// Capability invoked for a newly opened incident
#[async_trait]
pub trait RemediationHandler: Send + Sync {
    /// Carry out the action for `incident`
    async fn trigger(&self, incident: &Incident) -> std::result::Result<(), RemediationError>;
}

/// Handler that only logs what it would do
#[derive(Debug, Clone, Copy)]
pub struct SimulatedRemediation {
    action: RemediationAction,
}

impl SimulatedRemediation {
    pub fn new(action: RemediationAction) -> Self {
        Self { action }
    }
}

#[async_trait]
impl RemediationHandler for SimulatedRemediation {
    async fn trigger(&self, incident: &Incident) -> std::result::Result<(), RemediationError> {
        let what = match self.action {
            RemediationAction::RestartNonCriticalServices => "restart of non-critical services",
            RemediationAction::ClearCache => "cache cleanup",
            RemediationAction::CleanOldLogs => "old log cleanup",
            RemediationAction::ScaleInstances => "instance scale-out",
        };

        info!(
            action = %self.action,
            alert_key = %incident.alert_key,
            "Simulating {what}"
        );

        Ok(())
    }
}

/// Lookup from action to handler
#[derive(Clone, Default)]
pub struct RemediationRegistry {
    handlers: HashMap<RemediationAction, Arc<dyn RemediationHandler>>,
}

impl RemediationRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a simulated handler for every known action
    pub fn simulated() -> Self {
        let mut registry = Self::new();
        for action in [
            RemediationAction::RestartNonCriticalServices,
            RemediationAction::ClearCache,
            RemediationAction::CleanOldLogs,
            RemediationAction::ScaleInstances,
        ] {
            registry.register(action, Arc::new(SimulatedRemediation::new(action)));
        }
        registry
    }

    /// Register or replace the handler for an action
    pub fn register(&mut self, action: RemediationAction, handler: Arc<dyn RemediationHandler>) {
        self.handlers.insert(action, handler);
    }

    /// Handler for an action
    pub fn handler(&self, action: RemediationAction) -> Option<Arc<dyn RemediationHandler>> {
        self.handlers.get(&action).cloned()
    }

    /// Ensure every action named by the catalog has a handler
    pub fn validate_against(&self, catalog: &ThresholdCatalog) -> Result<()> {
        for def in catalog.iter() {
            if let Some(action) = def.remediation_action {
                if !self.handlers.contains_key(&action) {
                    return Err(Error::config(format!(
                        "metric '{}' names remediation '{action}' with no handler",
                        def.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_registry_covers_default_catalog() {
        let registry = RemediationRegistry::simulated();
        assert!(registry.validate_against(&ThresholdCatalog::default()).is_ok());
    }

    #[test]
    fn test_missing_handler_is_a_config_error() {
        let registry = RemediationRegistry::new();
        let err = registry
            .validate_against(&ThresholdCatalog::default())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
