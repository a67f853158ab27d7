//! Supervised RabbitMQ consume loop.
//!
//! The supervisor keeps a [`Subscription`] alive: a failed connection is
//! retried with backoff until `RECONNECT_MAX_ATTEMPTS` consecutive failures,
//! and a closed delivery stream is replaced by a fresh subscription. Each
//! delivery is forwarded by a task holding one of `WORKER_CONCURRENCY`
//! permits; the loop only pulls the next delivery once a permit is free.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
    Channel,
};
use tokio::sync::{watch, Semaphore};
use tokio::time::sleep;
use tracing::{error, info, warn};

use order_bridge::config::MAX_WORKER_CONCURRENCY;
use order_bridge::{Config, Delivered, Forwarder, HandleError, Subscription};

/// How a delivery is settled with the broker after handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Auto-ack mode: the broker already forgot the message.
    AutoAcked,
    Ack,
    Nack { requeue: bool },
}

/// Decide the settlement for a handling outcome.
///
/// Malformed payloads are never requeued since they can't succeed later.
pub fn settlement(
    auto_ack: bool,
    requeue_on_failure: bool,
    outcome: &Result<Delivered, HandleError>,
) -> Settlement {
    if auto_ack {
        return Settlement::AutoAcked;
    }

    match outcome {
        Ok(_) => Settlement::Ack,
        Err(HandleError::MalformedPayload(_)) => {
            Settlement::Nack { requeue: false }
        }
        Err(_) => Settlement::Nack {
            requeue: requeue_on_failure,
        },
    }
}

/// Why a consume pass returned.
#[derive(Debug, PartialEq, Eq)]
enum PassEnd {
    Shutdown,
    StreamClosed,
}

/// Run until `shutdown` flips or the broker stays unreachable.
pub async fn run(
    config: Config,
    forwarder: Forwarder,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let config = Arc::new(config);
    let forwarder = Arc::new(forwarder);
    let backoff = config.reconnect_backoff();
    let mut failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let delay = match Subscription::open(&config).await {
            Ok(subscription) => {
                failures = 0;
                info!("bridge_ready");

                match consume(subscription, &config, &forwarder, &mut shutdown).await {
                    PassEnd::Shutdown => break,
                    PassEnd::StreamClosed => backoff.initial(),
                }
            }
            Err(e) => {
                failures += 1;

                if config.reconnect_max_attempts != 0 && failures >= config.reconnect_max_attempts {
                    error!(
                        attempts = failures,
                        error = %e,
                        "rabbitmq_reconnect_exhausted"
                    );
                    return Err(e).context("Giving up on RabbitMQ");
                }

                let delay = backoff.delay(failures - 1);
                warn!(
                    attempt = failures,
                    max_attempts = config.reconnect_max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "rabbitmq_reconnect_scheduled"
                );
                delay
            }
        };

        if wait_or_shutdown(delay, &mut shutdown).await {
            break;
        }
    }

    info!("bridge_stopping");
    Ok(())
}

/// Sleep for `delay`. Returns true if shutdown was requested meanwhile.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}

/// Pull deliveries from one subscription until it closes or shutdown.
async fn consume(
    mut subscription: Subscription,
    config: &Config,
    forwarder: &Arc<Forwarder>,
    shutdown: &mut watch::Receiver<bool>,
) -> PassEnd {
    let channel = subscription.channel();
    let forwarder = Arc::clone(forwarder);
    let auto_ack = config.subscribe.auto_ack;
    let requeue_on_failure = config.requeue_on_failure;

    let end = pump(
        subscription.deliveries(),
        config.worker_concurrency,
        shutdown,
        move |delivery: Delivery| {
            let forwarder = Arc::clone(&forwarder);
            let channel = channel.clone();
            async move {
                process_delivery(&forwarder, &channel, delivery, auto_ack, requeue_on_failure)
                    .await;
            }
        },
    )
    .await;

    if end == PassEnd::StreamClosed {
        warn!(queue = %config.queue_name, "rabbitmq_consumer_closed");
    }

    subscription.close().await;
    end
}

/// Hand each item of `deliveries` to `work`, with at most `concurrency` in flight.
///
/// The next item is pulled only once a slot is free, so a concurrency of 1
/// handles items strictly in order. Before returning, waits for every
/// in-flight item to finish.
async fn pump<S, T, E, F, Fut>(
    mut deliveries: S,
    concurrency: usize,
    shutdown: &mut watch::Receiver<bool>,
    work: F,
) -> PassEnd
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: Display,
    F: Fn(T) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let concurrency = concurrency.clamp(1, MAX_WORKER_CONCURRENCY);
    let permits = Arc::new(Semaphore::new(concurrency));

    let end = loop {
        let permit = tokio::select! {
            _ = shutdown.changed() => break PassEnd::Shutdown,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break PassEnd::Shutdown,
            },
        };

        let delivery = tokio::select! {
            _ = shutdown.changed() => break PassEnd::Shutdown,
            delivery = deliveries.next() => delivery,
        };

        match delivery {
            Some(Ok(delivery)) => {
                let task = work(delivery);
                tokio::spawn(async move {
                    task.await;
                    drop(permit);
                });
            }
            Some(Err(e)) => {
                error!(error = %e, "rabbitmq_delivery_error");
            }
            None => break PassEnd::StreamClosed,
        }
    };

    // Let in-flight messages finish so their acks still reach the channel.
    // `concurrency` is clamped to the u16 range, so the conversion holds.
    if let Ok(all_permits) = u32::try_from(concurrency) {
        if let Ok(all) = permits.acquire_many(all_permits).await {
            drop(all);
        }
    }

    end
}

/// Forward one delivery, log the outcome and settle it.
async fn process_delivery(
    forwarder: &Forwarder,
    channel: &Channel,
    delivery: Delivery,
    auto_ack: bool,
    requeue_on_failure: bool,
) {
    let delivery_tag = delivery.delivery_tag;
    let body_preview = String::from_utf8_lossy(&delivery.data[..delivery.data.len().min(500)]);

    info!(
        delivery_tag = delivery_tag,
        redelivered = delivery.redelivered,
        body_length = delivery.data.len(),
        body = %body_preview,
        "rabbitmq_order_received"
    );

    let outcome = forwarder.handle(&delivery.data).await;

    match &outcome {
        Ok(delivered) => {
            info!(
                delivery_tag = delivery_tag,
                order_id = delivered.order_id,
                status_code = delivered.status.as_u16(),
                attempts = delivered.attempts,
                response = %delivered.body,
                "order_forwarded"
            );
        }
        Err(e @ HandleError::MalformedPayload(_)) => {
            error!(
                delivery_tag = delivery_tag,
                error = %e,
                body_preview = %body_preview,
                "order_payload_malformed"
            );
        }
        Err(HandleError::Rejected { status, body }) => {
            error!(
                delivery_tag = delivery_tag,
                status_code = status.as_u16(),
                response = %body,
                "order_rejected_downstream"
            );
        }
        Err(e) => {
            error!(
                delivery_tag = delivery_tag,
                error_kind = e.kind(),
                error = %e,
                "order_forward_failed"
            );
        }
    }

    match settlement(auto_ack, requeue_on_failure, &outcome) {
        Settlement::AutoAcked => {}
        Settlement::Ack => {
            if let Err(e) = channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
            {
                error!(delivery_tag = delivery_tag, error = %e, "rabbitmq_ack_failed");
            }
        }
        Settlement::Nack { requeue } => {
            if let Err(e) = channel
                .basic_nack(
                    delivery_tag,
                    BasicNackOptions {
                        requeue,
                        ..Default::default()
                    },
                )
                .await
            {
                error!(delivery_tag = delivery_tag, error = %e, "rabbitmq_nack_failed");
            } else {
                info!(delivery_tag = delivery_tag, requeue = requeue, "rabbitmq_order_nacked");
            }
        }
    }
}
