//! Configuration management for Opswatch
//!
//! Defaults are merged with an optional JSON file and `OPSWATCH_*` environment
//! overrides. A missing file is created with the defaults.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::catalog::{default_definitions, ThresholdCatalog};
use crate::error::{Error, Result};
use crate::models::MetricDefinition;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between monitoring cycles
    pub monitoring_interval_seconds: u64,

    /// Recipients of alert and resolution emails
    pub email_recipients: Vec<String>,

    /// Endpoints probed every cycle
    pub critical_apis: Vec<ApiEndpointConfig>,

    /// Whether remediation actions fire on new incidents
    pub automatic_actions: bool,

    /// Webhook (Slack, Teams, ...) receiving alert payloads
    pub webhook_url: Option<String>,

    /// SMTP settings; email is disabled when absent
    pub email: Option<EmailConfig>,

    /// Log level
    pub log_level: String,

    /// Optional log file, written in addition to stderr
    pub log_file: Option<String>,

    /// Database URL for metric and incident history
    pub database_url: String,

    /// Delay before retrying after a failed cycle
    pub retry_backoff_seconds: u64,

    /// Maximum number of probes in flight
    pub probe_concurrency: usize,

    /// Threshold catalog
    pub metrics: Vec<MetricDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitoring_interval_seconds: 60,
            email_recipients: vec!["admin@company.com".to_string()],
            critical_apis: vec![ApiEndpointConfig {
                name: "Main API".to_string(),
                url: "https://api.company.com/health".to_string(),
                timeout: 10,
                headers: HashMap::new(),
            }],
            automatic_actions: true,
            webhook_url: None,
            email: None,
            log_level: "info".to_string(),
            log_file: None,
            database_url: "sqlite://opswatch.db".to_string(),
            retry_backoff_seconds: 30,
            probe_concurrency: 10,
            metrics: default_definitions(),
        }
    }
}

/// A probed HTTP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpointConfig {
    /// Display name, also used in the alert key
    pub name: String,
    /// URL to GET
    pub url: String,
    /// Timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub timeout: u64,
    /// Extra request headers
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

fn default_probe_timeout() -> u64 {
    10
}

/// SMTP configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP relay host
    pub server: String,
    /// SMTP port (STARTTLS)
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Login user, also the sender when `from` is unset
    pub user: String,
    /// Login password
    pub password: String,
    /// Sender address
    #[serde(default)]
    pub from: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

impl Config {
    /// Load configuration from `path`, creating it with defaults if missing
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let defaults = serde_json::to_string_pretty(&Self::default())?;
            std::fs::write(path, defaults)?;
            info!(path = %path.display(), "Configuration file created");
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Json))
            .add_source(config::Environment::with_prefix("OPSWATCH").try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;

        info!(
            path = %path.display(),
            interval_secs = config.monitoring_interval_seconds,
            apis = config.critical_apis.len(),
            recipients = config.email_recipients.len(),
            automatic_actions = config.automatic_actions,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Write the default configuration to `path`, overwriting it
    pub fn write_default(path: impl AsRef<Path>) -> Result<()> {
        let defaults = serde_json::to_string_pretty(&Self::default())?;
        std::fs::write(path, defaults)?;
        Ok(())
    }

    /// Check invariants the rest of the system relies on
    pub fn validate(&self) -> Result<()> {
        if self.monitoring_interval_seconds == 0 {
            return Err(Error::config("monitoring_interval_seconds must be positive"));
        }

        if self.probe_concurrency == 0 {
            return Err(Error::config("probe_concurrency must be positive"));
        }

        let mut names = HashSet::new();
        for api in &self.critical_apis {
            if api.timeout == 0 {
                return Err(Error::config(format!("API '{}' has a zero timeout", api.name)));
            }
            if !names.insert(api.name.as_str()) {
                return Err(Error::config(format!("duplicate API name '{}'", api.name)));
            }
        }

        self.catalog()
            .map_err(|e| Error::config(e.to_string()))
            .map(|_| ())
    }

    /// Build the threshold catalog from the configured definitions
    pub fn catalog(&self) -> Result<ThresholdCatalog> {
        ThresholdCatalog::new(self.metrics.clone())
    }
}
