use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Consumer,
    options::{BasicConsumeOptions, BasicPublishOptions},
    types::FieldTable,
};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    models::user::{LookupFailure, LookupOutcome},
};

/// RabbitMQ pseudo-queue for direct reply-to.
pub const DIRECT_REPLY_TO: &str = "amq.rabbitmq.reply-to";

#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn lookup(&self, user_id: &str, timeout: Duration) -> LookupOutcome;
}

/// Sends one correlated lookup request to the user service.
#[async_trait]
pub trait RequestPublisher: Send + Sync {
    async fn publish(&self, correlation_id: &str, payload: Vec<u8>) -> Result<(), Error>;
}

/// Hands reply bodies to the caller waiting on the matching correlation id.
pub struct ReplyRouter {
    pending: DashMap<String, oneshot::Sender<Vec<u8>>>,
    closed: watch::Sender<bool>,
}

impl Default for ReplyRouter {
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
            closed: watch::channel(false).0,
        }
    }
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, correlation_id: &str) -> oneshot::Receiver<Vec<u8>> {
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(correlation_id.to_string(), sender);
        receiver
    }

    /// Returns false when nobody is waiting for the reply any more.
    pub fn deliver(&self, correlation_id: Option<&str>, body: Vec<u8>) -> bool {
        let Some(correlation_id) = correlation_id else {
            warn!("Discarding reply without correlation id");
            return false;
        };

        match self.pending.remove(correlation_id) {
            Some((_, sender)) => sender.send(body).is_ok(),
            None => {
                debug!(correlation_id, "Discarding late or unknown reply");
                false
            }
        }
    }

    pub fn abandon(&self, correlation_id: &str) {
        self.pending.remove(correlation_id);
    }

    /// Fails every waiter and all future lookups.
    pub fn close(&self) {
        self.closed.send_replace(true);
        self.pending.clear();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

/// Removes the correlation entry however the wait ends, including when the
/// lookup future is dropped.
struct PendingReply<'a> {
    router: &'a ReplyRouter,
    correlation_id: String,
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.router.abandon(&self.correlation_id);
    }
}

pub struct UserLookupClient<P> {
    publisher: P,
    replies: Arc<ReplyRouter>,
}

impl<P: RequestPublisher> UserLookupClient<P> {
    pub fn new(publisher: P, replies: Arc<ReplyRouter>) -> Self {
        Self { publisher, replies }
    }

    pub fn replies(&self) -> Arc<ReplyRouter> {
        Arc::clone(&self.replies)
    }
}

#[async_trait]
impl<P: RequestPublisher> UserLookup for UserLookupClient<P> {
    async fn lookup(&self, user_id: &str, timeout: Duration) -> LookupOutcome {
        if self.replies.is_closed() {
            warn!(user_id, "Reply listener is closed, cannot look up user");
            return LookupOutcome::TransportFailure(LookupFailure::ReplyChannelClosed);
        }

        let payload = match serde_json::to_vec(user_id) {
            Ok(payload) => payload,
            Err(e) => {
                return LookupOutcome::TransportFailure(LookupFailure::Publish(e.to_string()));
            }
        };

        let correlation_id = Uuid::new_v4().to_string();
        let reply = self.replies.register(&correlation_id);
        let _pending = PendingReply {
            router: self.replies.as_ref(),
            correlation_id: correlation_id.clone(),
        };

        debug!(user_id, correlation_id = %correlation_id, "Requesting user profile");

        if let Err(e) = self.publisher.publish(&correlation_id, payload).await {
            warn!(user_id, error = %e, "Failed to publish user lookup request");
            return LookupOutcome::TransportFailure(LookupFailure::Publish(e.to_string()));
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(body)) => {
                let outcome = LookupOutcome::from_reply(&body);
                if outcome == LookupOutcome::NotFound {
                    warn!(user_id, correlation_id = %correlation_id, "User not found");
                }
                outcome
            }
            Ok(Err(_)) => {
                warn!(user_id, "Reply listener closed while waiting for user profile");
                LookupOutcome::TransportFailure(LookupFailure::ReplyChannelClosed)
            }
            Err(_) => {
                warn!(user_id, timeout_ms = timeout.as_millis() as u64, "User lookup timed out");
                LookupOutcome::TransportFailure(LookupFailure::Timeout(timeout))
            }
        }
    }
}

pub struct AmqpRequestPublisher {
    channel: Channel,
    exchange: String,
    routing_key: String,
}

#[async_trait]
impl RequestPublisher for AmqpRequestPublisher {
    async fn publish(&self, correlation_id: &str, payload: Vec<u8>) -> Result<(), Error> {
        self.channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_reply_to(DIRECT_REPLY_TO.into())
                    .with_correlation_id(correlation_id.into())
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish lookup request: {}", e))?;

        Ok(())
    }
}

impl UserLookupClient<AmqpRequestPublisher> {
    /// Starts the reply listener on `channel` and returns a client that
    /// publishes on the same channel, as direct reply-to requires.
    pub async fn connect(channel: Channel, config: &Config) -> Result<Self, Error> {
        let consumer = channel
            .basic_consume(
                DIRECT_REPLY_TO,
                "user_lookup_replies",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to start lookup reply consumer"))?;

        let replies = Arc::new(ReplyRouter::new());
        tokio::spawn(listen_for_replies(consumer, Arc::clone(&replies)));

        info!(
            exchange = %config.user_service_exchange,
            routing_key = %config.user_routing_key,
            "User lookup client initialized"
        );

        let publisher = AmqpRequestPublisher {
            channel,
            exchange: config.user_service_exchange.clone(),
            routing_key: config.user_routing_key.clone(),
        };

        Ok(Self::new(publisher, replies))
    }
}

async fn listen_for_replies(mut consumer: Consumer, replies: Arc<ReplyRouter>) {
    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(mut delivery) => {
                let correlation_id = delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|id| id.as_str().to_string());
                let body = std::mem::take(&mut delivery.data);
                replies.deliver(correlation_id.as_deref(), body);
            }
            Err(e) => {
                error!(error = %e, "Lookup reply consumer failed");
                break;
            }
        }
    }

    warn!("Lookup reply consumer stopped");
    replies.close();
}
