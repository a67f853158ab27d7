//! Configuration module for environment variable parsing.
//!
//! Everything is read from the process environment (after `.env` has been
//! loaded by the binary). Optional tunables fall back to their default with a
//! warning when unparsable; the broker URL, the orders API URL and enumerated
//! values are validated and fail startup when wrong.

use std::env;
use std::str::FromStr;

use tracing::warn;
use url::Url;

use crate::backoff::Backoff;
use crate::error::ConfigError;
use crate::forward::{StatusPolicy, RECEIVED_STATUS};
use crate::queue::{SubscribeOptions, CONSUMER_TAG, ORDERS_QUEUE};

/// Default base URL of the orders API.
pub const DEFAULT_ORDERS_API_URL: &str = "http://localhost:8000";

/// Path of the order update endpoint below the base URL.
pub const DEFAULT_ORDERS_API_PATH: &str = "/orders/consumer";

/// Upper bound on `WORKER_CONCURRENCY`; the AMQP prefetch count is a u16.
pub const MAX_WORKER_CONCURRENCY: usize = u16::MAX as usize;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// RabbitMQ connection URL (`amqp://` or `amqps://`)
    pub rabbitmq_url: String,

    /// Queue to consume order updates from
    pub queue_name: String,

    /// Consumer tag announced to the broker
    pub consumer_tag: String,

    /// `basic.consume` flags, including the ack mode
    pub subscribe: SubscribeOptions,

    /// Declare the queue as durable before consuming
    pub declare_queue: bool,

    /// Full URL order updates are `PUT` to
    pub orders_endpoint: Url,

    /// Whether `status` is forwarded as-is or overwritten
    pub status_policy: StatusPolicy,

    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Treat non-2xx responses from the orders API as failures
    pub reject_non_success: bool,

    /// Attempts per message before giving up
    pub forward_max_attempts: u32,

    /// Retry backoff range in milliseconds (initial, max)
    pub forward_retry_delay_ms: (u64, u64),

    /// Requeue failed deliveries under manual ack instead of dropping them
    pub requeue_on_failure: bool,

    /// Maximum number of messages handled at once, also the manual-ack prefetch
    /// (`1..=MAX_WORKER_CONCURRENCY`)
    pub worker_concurrency: usize,

    /// Consecutive failed connection attempts before exiting (0 = never)
    pub reconnect_max_attempts: u32,

    /// Reconnect backoff range in milliseconds (initial, max)
    pub reconnect_delay_ms: (u64, u64),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let rabbitmq_url = parse_broker_url(vars.get("RABBITMQ_URL"))?;

        let orders_endpoint = parse_endpoint(
            &vars.string_or("ORDERS_API_URL", DEFAULT_ORDERS_API_URL),
            &vars.string_or("ORDERS_API_PATH", DEFAULT_ORDERS_API_PATH),
        )?;

        let status_policy = parse_status_policy(
            &vars.string_or("STATUS_POLICY", "passthrough"),
            vars.string_or("RECEIVED_STATUS", RECEIVED_STATUS),
        )?;

        let auto_ack = parse_ack_mode(&vars.string_or("ACK_MODE", "auto"))?;

        let worker_concurrency =
            check_concurrency(vars.parse_or("WORKER_CONCURRENCY", 1usize).max(1))?;

        Ok(Config {
            rabbitmq_url,

            queue_name: vars.string_or("ORDERS_QUEUE", ORDERS_QUEUE),

            consumer_tag: vars.string_or("CONSUMER_TAG", CONSUMER_TAG),

            subscribe: SubscribeOptions {
                auto_ack,
                exclusive: vars.flag("CONSUME_EXCLUSIVE", false),
                no_local: vars.flag("CONSUME_NO_LOCAL", false),
                no_wait: vars.flag("CONSUME_NO_WAIT", false),
            },

            declare_queue: vars.flag("QUEUE_DECLARE", false),

            orders_endpoint,

            status_policy,

            request_timeout_ms: vars.parse_or("REQUEST_TIMEOUT_MS", 10_000),

            reject_non_success: vars.flag("REJECT_NON_SUCCESS", false),

            forward_max_attempts: vars.parse_or("FORWARD_MAX_ATTEMPTS", 1u32).max(1),

            forward_retry_delay_ms: vars.range("FORWARD_RETRY_DELAY_MS", (200, 5000)),

            requeue_on_failure: vars.flag("REQUEUE_ON_FAILURE", false),

            worker_concurrency,

            reconnect_max_attempts: vars.parse_or("RECONNECT_MAX_ATTEMPTS", 5),

            reconnect_delay_ms: vars.range("RECONNECT_DELAY_MS", (1000, 30_000)),
        })
    }

    /// Backoff schedule between broker reconnect attempts.
    pub fn reconnect_backoff(&self) -> Backoff {
        Backoff::from_range_ms(self.reconnect_delay_ms)
    }
}

/// Variable source with the lenient parsers used for optional settings.
struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value, treating empty as unset.
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: FromStr>(&self, name: &str, default: T) -> T {
        let Some(raw) = self.get(name) else {
            return default;
        };

        match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(env_var = name, value = %raw, "Invalid value, using default");
                default
            }
        }
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        let Some(raw) = self.get(name) else {
            return default;
        };

        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                warn!(env_var = name, value = %raw, "Invalid boolean, using default");
                default
            }
        }
    }

    /// Parse a comma-separated range like "500,5000" into a tuple.
    fn range(&self, name: &str, default: (u64, u64)) -> (u64, u64) {
        let Some(raw) = self.get(name) else {
            return default;
        };

        let parts: Vec<&str> = raw.split(',').collect();
        if parts.len() != 2 {
            warn!(env_var = name, value = %raw, "Invalid range format, using default");
            return default;
        }

        let min = parts[0].trim().parse::<u64>();
        let max = parts[1].trim().parse::<u64>();

        match (min, max) {
            (Ok(min), Ok(max)) if min <= max => (min, max),
            _ => {
                warn!(env_var = name, value = %raw, "Invalid range values, using default");
                default
            }
        }
    }
}

fn parse_broker_url(raw: Option<String>) -> Result<String, ConfigError> {
    let raw = raw.ok_or(ConfigError::Missing("RABBITMQ_URL"))?;

    // The URL carries credentials, so it never appears in the error.
    let parsed = Url::parse(&raw).map_err(|e| ConfigError::Invalid {
        name: "RABBITMQ_URL",
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "amqp" | "amqps" => Ok(raw),
        other => Err(ConfigError::Invalid {
            name: "RABBITMQ_URL",
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

fn parse_endpoint(base: &str, path: &str) -> Result<Url, ConfigError> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );

    let url = Url::parse(&joined).map_err(|e| ConfigError::Invalid {
        name: "ORDERS_API_URL",
        reason: format!("{joined:?}: {e}"),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Invalid {
            name: "ORDERS_API_URL",
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

fn parse_status_policy(raw: &str, received_status: String) -> Result<StatusPolicy, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "passthrough" => Ok(StatusPolicy::Passthrough),
        "rewrite" => Ok(StatusPolicy::Rewrite(received_status)),
        _ => Err(ConfigError::Invalid {
            name: "STATUS_POLICY",
            reason: format!("expected passthrough or rewrite, got {raw:?}"),
        }),
    }
}

fn check_concurrency(value: usize) -> Result<usize, ConfigError> {
    if value > MAX_WORKER_CONCURRENCY {
        return Err(ConfigError::Invalid {
            name: "WORKER_CONCURRENCY",
            reason: format!("{value} exceeds the maximum of {MAX_WORKER_CONCURRENCY}"),
        });
    }
    Ok(value)
}

/// Returns whether the consumer runs in auto-ack mode.
fn parse_ack_mode(raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "auto" => Ok(true),
        "manual" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name: "ACK_MODE",
            reason: format!("expected auto or manual, got {raw:?}"),
        }),
    }
}
