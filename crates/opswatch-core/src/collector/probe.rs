//! HTTP endpoint probes

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::ApiProbeSource;
use crate::config::ApiEndpointConfig;
use crate::error::Result;
use crate::models::ProbeResult;

/// Probes configured endpoints with bounded concurrency
pub struct HttpProber {
    client: Client,
    apis: Vec<ApiEndpointConfig>,
    concurrency: usize,
}

impl HttpProber {
    /// Create a prober for `apis`, with at most `concurrency` requests in flight
    pub fn new(apis: Vec<ApiEndpointConfig>, concurrency: usize) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("opswatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            apis,
            concurrency: concurrency.max(1),
        })
    }

    /// Probe a single endpoint; any failure, including timeout, is `available = false`
    pub async fn check(&self, api: &ApiEndpointConfig) -> ProbeResult {
        let started = Instant::now();

        let mut request = self
            .client
            .get(&api.url)
            .timeout(Duration::from_secs(api.timeout));
        for (name, value) in &api.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(api = %api.name, error = %e, "API check failed");
                return ProbeResult::down(&api.name, e.to_string());
            }
        };

        let status_code = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(api = %api.name, error = %e, "API response body failed");
                return ProbeResult::down(&api.name, e.to_string());
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut result = ProbeResult::up(&api.name, status_code, elapsed_ms);
        result.response_size_kb = body.len() as f64 / 1024.0;

        debug!(
            api = %api.name,
            status = status_code,
            response_time_ms = elapsed_ms,
            "API checked"
        );
        result
    }
}

#[async_trait]
impl ApiProbeSource for HttpProber {
    async fn check_all(&self) -> Vec<ProbeResult> {
        let checks: Vec<_> = self.apis.iter().map(|api| self.check(api)).collect();
        stream::iter(checks)
            .buffered(self.concurrency)
            .collect()
            .await
    }
}
