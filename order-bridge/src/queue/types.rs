//! Consumer registration types.

use lapin::options::BasicConsumeOptions;

/// Default queue carrying order update events.
pub const ORDERS_QUEUE: &str = "orders.created";

/// Default consumer tag announced to the broker.
pub const CONSUMER_TAG: &str = "order-bridge";

/// Flags sent with `basic.consume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Broker considers a message delivered the moment it is handed over.
    /// A crash mid-processing loses the message.
    pub auto_ack: bool,
    /// Reserve the queue for this consumer only.
    pub exclusive: bool,
    /// Suppress messages published on this same connection.
    pub no_local: bool,
    /// Do not wait for the broker to confirm the registration.
    pub no_wait: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            auto_ack: true,
            exclusive: false,
            no_local: false,
            no_wait: false,
        }
    }
}

impl From<SubscribeOptions> for BasicConsumeOptions {
    fn from(options: SubscribeOptions) -> Self {
        BasicConsumeOptions {
            no_local: options.no_local,
            no_ack: options.auto_ack,
            exclusive: options.exclusive,
            nowait: options.no_wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_use_auto_ack() {
        let options = BasicConsumeOptions::from(SubscribeOptions::default());
        assert!(options.no_ack);
        assert!(!options.exclusive);
        assert!(!options.no_local);
        assert!(!options.nowait);
    }

    #[test]
    fn test_manual_ack_exclusive_mapping() {
        let options = BasicConsumeOptions::from(SubscribeOptions {
            auto_ack: false,
            exclusive: true,
            no_local: true,
            no_wait: true,
        });
        assert!(!options.no_ack);
        assert!(options.exclusive);
        assert!(options.no_local);
        assert!(options.nowait);
    }
}
