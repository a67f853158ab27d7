//! Order bridge - relays order updates from RabbitMQ to the orders REST API.
//!
//! ## Architecture
//!
//! ```text
//! orders.created queue → Subscription → Forwarder → PUT /orders/consumer
//! ```
//!
//! The library holds the two components and their configuration. The
//! `order-bridge` binary supervises the subscription and drives the loop.

pub mod backoff;
pub mod config;
pub mod error;
pub mod forward;
pub mod queue;

// Re-export commonly used types
pub use backoff::Backoff;
pub use config::Config;
pub use error::{ConfigError, HandleError, QueueError};
pub use forward::{Delivered, ForwardOptions, Forwarder, OrderUpdate, StatusPolicy};
pub use queue::{SubscribeOptions, Subscription};
