//! Error types for the queue and forwarding halves of the bridge.
//!
//! Broker errors (`QueueError`) are surfaced to the supervisor in the binary,
//! which decides whether to reconnect or exit. Per-message errors
//! (`HandleError`) are recovered locally: logged, then the delivery is settled.

use reqwest::StatusCode;
use thiserror::Error;

/// Failures while establishing a subscription with the broker.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to connect to RabbitMQ: {0}")]
    Connection(#[source] lapin::Error),

    #[error("failed to open channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("failed to set prefetch to {prefetch}: {source}")]
    Qos {
        prefetch: u16,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to declare queue {queue}: {source}")]
    Declare {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to register consumer on {queue}: {source}")]
    Subscribe {
        queue: String,
        #[source]
        source: lapin::Error,
    },
}

/// Failures while forwarding a single message downstream.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("malformed order payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("request to orders API failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to read orders API response: {0}")]
    ResponseRead(#[source] reqwest::Error),

    #[error("orders API rejected the update with status {status}")]
    Rejected { status: StatusCode, body: String },
}

impl HandleError {
    /// Whether another attempt at the same message could succeed.
    ///
    /// Payload errors are permanent. Client errors other than 429 mean the
    /// downstream will refuse the same body again.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandleError::MalformedPayload(_) => false,
            HandleError::Transport(_) | HandleError::ResponseRead(_) => true,
            HandleError::Rejected { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }

    /// Short machine-friendly label used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            HandleError::MalformedPayload(_) => "malformed_payload",
            HandleError::Transport(_) => "transport",
            HandleError::ResponseRead(_) => "response_read",
            HandleError::Rejected { .. } => "rejected",
        }
    }
}

/// Invalid or missing configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}
