//! Queue module for RabbitMQ operations.
//!
//! ```text
//! connect → open_channel → subscribe → delivery stream
//! ```

pub mod subscriber;
pub mod types;

pub use subscriber::{connect, open_channel, subscribe, Subscription};
pub use types::{SubscribeOptions, CONSUMER_TAG, ORDERS_QUEUE};
