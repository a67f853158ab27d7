//! RabbitMQ subscription using lapin.
//!
//! A [`Subscription`] owns one connection, one channel and one registered
//! consumer. Its delivery stream ends when the channel or connection closes
//! and is never restarted in place: the supervisor opens a new subscription.

use lapin::{
    options::{BasicQosOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use tracing::{info, warn};

use super::types::SubscribeOptions;
use crate::config::Config;
use crate::error::QueueError;

/// Open a transport connection to the broker.
pub async fn connect(url: &str) -> Result<Connection, QueueError> {
    info!(url_length = url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(QueueError::Connection)?;

    info!("rabbitmq_connected");
    Ok(conn)
}

/// Open a logical channel over an established connection.
pub async fn open_channel(conn: &Connection) -> Result<Channel, QueueError> {
    let channel = conn.create_channel().await.map_err(QueueError::Channel)?;

    info!(channel_id = channel.id(), "rabbitmq_channel_created");
    Ok(channel)
}

/// Register as a consumer of `queue`.
pub async fn subscribe(
    channel: &Channel,
    queue: &str,
    consumer_tag: &str,
    options: SubscribeOptions,
) -> Result<Consumer, QueueError> {
    let consumer = channel
        .basic_consume(queue, consumer_tag, options.into(), FieldTable::default())
        .await
        .map_err(|source| QueueError::Subscribe {
            queue: queue.to_string(),
            source,
        })?;

    info!(
        queue = queue,
        consumer_tag = consumer_tag,
        auto_ack = options.auto_ack,
        exclusive = options.exclusive,
        "rabbitmq_consumer_started"
    );
    Ok(consumer)
}

/// A live consumer registration together with the resources it runs on.
pub struct Subscription {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

impl Subscription {
    /// Connect, open a channel and register the consumer described by `config`.
    ///
    /// Under manual ack the prefetch is capped at the worker concurrency so the
    /// broker never pushes more unsettled deliveries than can be in flight.
    pub async fn open(config: &Config) -> Result<Self, QueueError> {
        let connection = connect(&config.rabbitmq_url).await?;
        let channel = open_channel(&connection).await?;

        if !config.subscribe.auto_ack {
            // Config caps the concurrency at u16::MAX.
            let prefetch = u16::try_from(config.worker_concurrency).unwrap_or(u16::MAX);
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|source| QueueError::Qos { prefetch, source })?;

            info!(prefetch_count = prefetch, "rabbitmq_qos_set");
        }

        if config.declare_queue {
            channel
                .queue_declare(
                    &config.queue_name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|source| QueueError::Declare {
                    queue: config.queue_name.clone(),
                    source,
                })?;

            info!(queue = %config.queue_name, "rabbitmq_queue_declared");
        }

        let consumer = subscribe(
            &channel,
            &config.queue_name,
            &config.consumer_tag,
            config.subscribe,
        )
        .await?;

        Ok(Self {
            connection,
            channel,
            consumer,
        })
    }

    /// Handle to the channel, used to settle deliveries under manual ack.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// The delivery stream. Yields `None` once the channel closes.
    pub fn deliveries(&mut self) -> &mut Consumer {
        &mut self.consumer
    }

    /// Close the channel, then the connection. Errors are logged and ignored.
    pub async fn close(self) {
        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if self.connection.status().connected() {
            if let Err(e) = self.connection.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_subscription_closed");
    }
}
