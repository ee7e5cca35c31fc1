//! Notification delivery for incidents
//!
//! The evaluator only sees the [`Notifier`] contract. [`NotificationDispatcher`]
//! fans each event out to every configured transport (one email transport per
//! recipient plus an optional webhook); a failed transport is logged and does
//! not affect the others.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{Config, EmailConfig};
use crate::error::{Error, Result};
use crate::models::{Incident, Severity};

/// Contract the evaluator dispatches through
///
/// Both calls are best-effort and never fail towards the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// An incident opened, escalated, or was re-raised
    async fn notify_open(&self, incident: &Incident);

    /// An incident resolved
    async fn notify_resolved(&self, incident: &Incident);
}

/// Result of sending a notification
#[derive(Debug, Clone)]
pub struct NotificationResult {
    pub channel_type: String,
    pub success: bool,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{target} returned {status}: {body}")]
    Rejected {
        target: String,
        status: u16,
        body: String,
    },

    #[error("Email error: {0}")]
    Email(String),
}

/// A single delivery destination
#[async_trait]
pub trait Transport: Send + Sync {
    /// Channel type for logs and results
    fn channel_type(&self) -> &'static str;

    async fn send_open(&self, incident: &Incident) -> std::result::Result<(), DispatchError>;

    async fn send_resolved(&self, incident: &Incident) -> std::result::Result<(), DispatchError>;
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Open,
    Resolved,
}

/// Fans incidents out to every configured transport
#[derive(Default)]
pub struct NotificationDispatcher {
    transports: Vec<Arc<dyn Transport>>,
}

impl NotificationDispatcher {
    /// Create a dispatcher over explicit transports
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { transports }
    }

    /// Build email and webhook transports from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut transports: Vec<Arc<dyn Transport>> = Vec::new();

        match (&config.email, config.email_recipients.is_empty()) {
            (Some(email), false) => {
                let mailer = Arc::new(build_mailer(email)?);
                let from = parse_mailbox(email.from.as_deref().unwrap_or(&email.user))?;
                for recipient in &config.email_recipients {
                    transports.push(Arc::new(EmailTransport {
                        mailer: mailer.clone(),
                        from: from.clone(),
                        to: parse_mailbox(recipient)?,
                    }));
                }
            }
            (None, false) => warn!("Email configuration not available, email alerts disabled"),
            (_, true) => {}
        }

        match &config.webhook_url {
            Some(url) if !url.is_empty() => {
                transports.push(Arc::new(WebhookTransport::new(url.clone())?));
            }
            _ => warn!("Webhook URL not configured, webhook alerts disabled"),
        }

        info!(transports = transports.len(), "Notification dispatcher ready");
        Ok(Self::new(transports))
    }

    /// Number of transports
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    /// Whether no transport is configured
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Deliver an open event to all transports
    pub async fn dispatch_open(&self, incident: &Incident) -> Vec<NotificationResult> {
        self.dispatch(Event::Open, incident).await
    }

    /// Deliver a resolution event to all transports
    pub async fn dispatch_resolved(&self, incident: &Incident) -> Vec<NotificationResult> {
        self.dispatch(Event::Resolved, incident).await
    }

    async fn dispatch(&self, event: Event, incident: &Incident) -> Vec<NotificationResult> {
        let sends = self.transports.iter().map(|transport| async move {
            let sent_at = Utc::now();
            let result = match event {
                Event::Open => transport.send_open(incident).await,
                Event::Resolved => transport.send_resolved(incident).await,
            };

            if let Err(e) = &result {
                error!(
                    channel = transport.channel_type(),
                    alert_key = %incident.alert_key,
                    error = %e,
                    "Notification failed"
                );
                metrics::counter!("opswatch_notification_failures_total",
                    "channel" => transport.channel_type())
                .increment(1);
            }

            NotificationResult {
                channel_type: transport.channel_type().to_string(),
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
                sent_at,
            }
        });

        join_all(sends).await
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    async fn notify_open(&self, incident: &Incident) {
        self.dispatch_open(incident).await;
    }

    async fn notify_resolved(&self, incident: &Incident) {
        self.dispatch_resolved(incident).await;
    }
}

fn build_mailer(email: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&email.server)
        .map_err(|e| Error::config(format!("invalid SMTP server '{}': {e}", email.server)))?
        .port(email.port)
        .credentials(Credentials::new(email.user.clone(), email.password.clone()))
        .timeout(Some(Duration::from_secs(30)))
        .build();
    Ok(mailer)
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| Error::config(format!("invalid email address '{address}': {e}")))
}

/// Sends HTML email to one recipient
pub struct EmailTransport {
    mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailTransport {
    async fn send(&self, content: EmailContent) -> std::result::Result<(), DispatchError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(content.subject)
            .header(ContentType::TEXT_HTML)
            .body(content.html)
            .map_err(|e| DispatchError::Email(e.to_string()))?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| DispatchError::Email(e.to_string()))?;

        info!(recipient = %self.to, "Email sent");
        Ok(())
    }
}

#[async_trait]
impl Transport for EmailTransport {
    fn channel_type(&self) -> &'static str {
        "email"
    }

    async fn send_open(&self, incident: &Incident) -> std::result::Result<(), DispatchError> {
        self.send(alert_email(incident)).await
    }

    async fn send_resolved(&self, incident: &Incident) -> std::result::Result<(), DispatchError> {
        self.send(resolution_email(incident)).await
    }
}

/// Posts Slack-compatible JSON to a webhook
pub struct WebhookTransport {
    client: Client,
    url: String,
}

impl WebhookTransport {
    /// Create a webhook transport with a 10 second timeout
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, payload: &WebhookPayload) -> std::result::Result<(), DispatchError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                target: "Webhook".to_string(),
                status,
                body,
            });
        }

        info!(url = %self.url, "Webhook sent successfully");
        Ok(())
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn channel_type(&self) -> &'static str {
        "webhook"
    }

    async fn send_open(&self, incident: &Incident) -> std::result::Result<(), DispatchError> {
        self.post(&alert_webhook_payload(incident)).await
    }

    async fn send_resolved(&self, incident: &Incident) -> std::result::Result<(), DispatchError> {
        self.post(&resolution_webhook_payload(incident)).await
    }
}

/// Rendered email subject and HTML body
#[derive(Debug, Clone, PartialEq)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#FF0000",
        Severity::Warning => "#FFA500",
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Email for an open or escalated incident
pub fn alert_email(incident: &Incident) -> EmailContent {
    let severity = incident.severity.as_str().to_uppercase();
    let color = severity_color(incident.severity);

    let html = format!(
        r#"<html>
<body>
  <div style="border-left: 4px solid {color}; padding: 20px; background-color: #f9f9f9;">
    <h2 style="color: {color};">🚨 ALERT {severity}</h2>
    <table style="width: 100%; border-collapse: collapse;">
      <tr><td><strong>Metric:</strong></td><td>{metric}</td></tr>
      <tr><td><strong>Current Value:</strong></td><td>{value:.2}</td></tr>
      <tr><td><strong>Threshold:</strong></td><td>{threshold:.2}</td></tr>
      <tr><td><strong>Timestamp:</strong></td><td>{at}</td></tr>
      <tr><td><strong>Message:</strong></td><td>{message}</td></tr>
    </table>
    <p style="margin-top: 20px; font-size: 12px; color: #666;">Opswatch</p>
  </div>
</body>
</html>"#,
        metric = escape_html(&incident.metric),
        value = incident.current_value,
        threshold = incident.threshold,
        at = timestamp(incident.notified_at()),
        message = escape_html(&incident.message),
    );

    EmailContent {
        subject: format!("🚨 ALERT {severity}: {}", incident.metric),
        html,
    }
}

/// Email for a resolved incident
pub fn resolution_email(incident: &Incident) -> EmailContent {
    let duration = incident
        .duration()
        .and_then(|d| d.to_std().ok())
        .map(|d| Duration::from_secs(d.as_secs()))
        .unwrap_or_default();
    let resolved_at = incident.resolved_at.map(timestamp).unwrap_or_default();

    let html = format!(
        r#"<h3>✅ Alert Resolved</h3>
<p><strong>Metric:</strong> {metric}</p>
<p><strong>Duration:</strong> {duration}</p>
<p><strong>Resolved at:</strong> {resolved_at}</p>"#,
        metric = escape_html(&incident.metric),
        duration = humantime::format_duration(duration),
    );

    EmailContent {
        subject: format!("✅ RESOLVED: {}", incident.metric),
        html,
    }
}

// Slack-compatible webhook payload
#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    text: String,
    event: &'static str,
    attachments: Vec<WebhookAttachment>,
}

#[derive(Debug, Serialize)]
struct WebhookAttachment {
    color: &'static str,
    fields: Vec<WebhookField>,
    footer: &'static str,
    ts: i64,
}

#[derive(Debug, Serialize)]
struct WebhookField {
    title: &'static str,
    value: String,
    short: bool,
}

fn field(title: &'static str, value: String, short: bool) -> WebhookField {
    WebhookField { title, value, short }
}

/// Webhook body for an open or escalated incident
pub fn alert_webhook_payload(incident: &Incident) -> WebhookPayload {
    let at = incident.notified_at();

    WebhookPayload {
        text: format!("🚨 ALERT {}", incident.severity.as_str().to_uppercase()),
        event: "alert",
        attachments: vec![WebhookAttachment {
            color: match incident.severity {
                Severity::Critical => "danger",
                Severity::Warning => "warning",
            },
            fields: vec![
                field("Metric", incident.metric.clone(), true),
                field("Current Value", format!("{:.2}", incident.current_value), true),
                field("Threshold", format!("{:.2}", incident.threshold), true),
                field("Severity", incident.severity.to_string(), true),
                field("Timestamp", timestamp(at), true),
                field("Message", incident.message.clone(), false),
            ],
            footer: "Opswatch",
            ts: at.timestamp(),
        }],
    }
}

/// Webhook body for a resolved incident
pub fn resolution_webhook_payload(incident: &Incident) -> WebhookPayload {
    let resolved_at = incident.resolved_at.unwrap_or_else(Utc::now);
    let duration_seconds = incident
        .duration()
        .map_or(0.0, |d| d.num_milliseconds() as f64 / 1000.0);

    WebhookPayload {
        text: format!("✅ RESOLVED: {}", incident.metric),
        event: "resolved",
        attachments: vec![WebhookAttachment {
            color: "good",
            fields: vec![
                field("Metric", incident.metric.clone(), true),
                field("Duration (s)", format!("{duration_seconds:.0}"), true),
                field("Resolved At", timestamp(resolved_at), true),
            ],
            footer: "Opswatch",
            ts: resolved_at.timestamp(),
        }],
    }
}
