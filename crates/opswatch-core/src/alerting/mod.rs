//! Alert lifecycle for opswatch
//!
//! Threshold evaluation, incident deduplication and escalation, notification
//! delivery, remediation, and the incident history.

mod evaluator;
mod notifier;
mod remediation;
mod repository;
mod store;

pub use evaluator::{api_alert_key, sample_status, AlertEvaluator, EvaluationError, EvaluationSummary};
pub use notifier::{
    alert_email, alert_webhook_payload, resolution_email, resolution_webhook_payload,
    DispatchError, EmailContent, EmailTransport, NotificationDispatcher, NotificationResult,
    Notifier, Transport, WebhookPayload, WebhookTransport,
};
pub use remediation::{RemediationError, RemediationHandler, RemediationRegistry, SimulatedRemediation};
pub use repository::{IncidentRecord, IncidentStore, MetricRecord, SqliteRepository};
pub use store::{ActiveAlertSet, Breach, Transition};
