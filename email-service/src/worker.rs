use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use futures_util::StreamExt;
use lapin::Consumer;
use tracing::{debug, error, info};

use crate::{
    clients::{rbmq::RabbitMqClient, user_lookup::ReplyRouter},
    consumer::NotificationConsumer,
    models::status::AckDecision,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventQueue {
    Verification,
    OrderCreated,
}

impl EventQueue {
    pub fn consumer_tag(&self) -> &'static str {
        match self {
            EventQueue::Verification => "email_verification_worker",
            EventQueue::OrderCreated => "order_created_worker",
        }
    }
}

/// Handles one delivery in its own task so a panicking handler cannot take
/// the queue loop down with it.
pub async fn handle_delivery(
    handler: Arc<NotificationConsumer>,
    queue: EventQueue,
    payload: Vec<u8>,
) -> AckDecision {
    let task = tokio::spawn(async move {
        match queue {
            EventQueue::Verification => handler.on_verification_event(&payload).await,
            EventQueue::OrderCreated => handler.on_order_created_event(&payload).await,
        }
    });

    match task.await {
        Ok(decision) => decision,
        Err(e) => {
            error!(queue = ?queue, error = %e, "Handler task failed");
            AckDecision::RejectPermanent
        }
    }
}

/// Fails once the user lookup reply listener has stopped. Order events could
/// only be requeued from then on, so the worker has to restart.
pub async fn watch_reply_listener(replies: Arc<ReplyRouter>) -> Result<(), Error> {
    replies.wait_closed().await;
    error!("User lookup reply listener stopped, shutting down consumers");
    Err(anyhow!("user lookup reply listener stopped"))
}

/// Consumes both event queues until either stream ends or the lookup reply
/// listener stops.
pub async fn run_consumers(
    rabbitmq: Arc<RabbitMqClient>,
    handler: Arc<NotificationConsumer>,
    replies: Arc<ReplyRouter>,
    concurrency: usize,
) -> Result<(), Error> {
    let settings = handler.settings().clone();

    let verification = rabbitmq
        .create_consumer(
            &settings.verification_queue,
            EventQueue::Verification.consumer_tag(),
        )
        .await?;
    let order_created = rabbitmq
        .create_consumer(
            &settings.order_created_queue,
            EventQueue::OrderCreated.consumer_tag(),
        )
        .await?;

    info!(concurrency, "Notification worker is ready");

    tokio::try_join!(
        drain(
            verification,
            EventQueue::Verification,
            Arc::clone(&rabbitmq),
            Arc::clone(&handler),
            concurrency,
        ),
        drain(
            order_created,
            EventQueue::OrderCreated,
            rabbitmq,
            handler,
            concurrency,
        ),
        watch_reply_listener(replies),
    )?;

    Ok(())
}

async fn drain(
    consumer: Consumer,
    queue: EventQueue,
    rabbitmq: Arc<RabbitMqClient>,
    handler: Arc<NotificationConsumer>,
    concurrency: usize,
) -> Result<(), Error> {
    consumer
        .for_each_concurrent(concurrency.max(1), |delivery| {
            let rabbitmq = Arc::clone(&rabbitmq);
            let handler = Arc::clone(&handler);

            async move {
                let mut delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        error!(queue = ?queue, error = %e, "Failed to receive delivery");
                        return;
                    }
                };

                let delivery_tag = delivery.delivery_tag;
                debug!(
                    queue = ?queue,
                    delivery_tag,
                    redelivered = delivery.redelivered,
                    "Delivery received"
                );

                let payload = std::mem::take(&mut delivery.data);
                let decision = handle_delivery(handler, queue, payload).await;

                match rabbitmq.settle(delivery_tag, decision).await {
                    Ok(()) => debug!(queue = ?queue, delivery_tag, decision = %decision, "Delivery settled"),
                    Err(e) => error!(queue = ?queue, delivery_tag, decision = %decision, error = %e, "Failed to settle delivery"),
                }
            }
        })
        .await;

    Err(anyhow!("{:?} consumer stream ended", queue))
}
