//! HTTP forwarding of order updates to the orders API.

use std::time::Duration;

use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use super::order::{prepare, PreparedUpdate, StatusPolicy};
use crate::backoff::Backoff;
use crate::config::Config;
use crate::error::HandleError;

/// Tunables for a [`Forwarder`].
#[derive(Debug, Clone)]
pub struct ForwardOptions {
    pub status_policy: StatusPolicy,
    /// Bound on one request, response body included.
    pub timeout: Duration,
    /// Treat any non-2xx response as a failed delivery.
    pub reject_non_success: bool,
    /// Attempts per message, first one included. Never below 1.
    pub max_attempts: u32,
    pub retry_backoff: Backoff,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            status_policy: StatusPolicy::Passthrough,
            timeout: Duration::from_secs(10),
            reject_non_success: false,
            max_attempts: 1,
            retry_backoff: Backoff::new(Duration::from_millis(200), Duration::from_secs(5)),
        }
    }
}

impl ForwardOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            status_policy: config.status_policy.clone(),
            timeout: Duration::from_millis(config.request_timeout_ms),
            reject_non_success: config.reject_non_success,
            max_attempts: config.forward_max_attempts,
            retry_backoff: Backoff::from_range_ms(config.forward_retry_delay_ms),
        }
    }
}

/// Outcome of a message the orders API accepted.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub order_id: i64,
    pub status: StatusCode,
    pub body: String,
    pub attempts: u32,
}

/// Relays queue payloads to the orders endpoint with `PUT`.
///
/// Holds no per-message state, so one instance is shared by every worker.
pub struct Forwarder {
    client: Client,
    endpoint: Url,
    options: ForwardOptions,
}

impl Forwarder {
    pub fn new(endpoint: Url, options: ForwardOptions) -> reqwest::Result<Self> {
        let client = Client::builder().pool_max_idle_per_host(16).build()?;

        Ok(Self {
            client,
            endpoint,
            options,
        })
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        Self::new(
            config.orders_endpoint.clone(),
            ForwardOptions::from_config(config),
        )
    }

    /// Forward one raw queue payload.
    ///
    /// Malformed payloads fail before any request is made. Retryable failures
    /// are attempted again up to `max_attempts` with backoff between tries.
    pub async fn handle(&self, payload: &[u8]) -> Result<Delivered, HandleError> {
        let prepared = prepare(payload, &self.options.status_policy)?;
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.dispatch(&prepared).await {
                Ok((status, body)) => {
                    return Ok(Delivered {
                        order_id: prepared.order_id,
                        status,
                        body,
                        attempts: attempt,
                    });
                }
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = self.options.retry_backoff.delay(attempt - 1);
                    warn!(
                        order_id = prepared.order_id,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = e.kind(),
                        error = %e,
                        "forward_retry_scheduled"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn dispatch(&self, prepared: &PreparedUpdate) -> Result<(StatusCode, String), HandleError> {
        debug!(
            order_id = prepared.order_id,
            status = %prepared.status,
            rewritten = prepared.rewritten,
            url = %self.endpoint,
            timeout_seconds = self.options.timeout.as_secs_f64(),
            "forward_request_starting"
        );

        let response = self
            .client
            .put(self.endpoint.clone())
            .timeout(self.options.timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(prepared.body.clone())
            .send()
            .await
            .map_err(HandleError::Transport)?;

        // The body is drained whatever the status so it can be logged.
        let status = response.status();
        let body = response.text().await.map_err(HandleError::ResponseRead)?;

        if self.options.reject_non_success && !status.is_success() {
            return Err(HandleError::Rejected { status, body });
        }

        Ok((status, body))
    }
}
