use anyhow::{Error, Result, anyhow};
use lapin::{
    Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tracing::{debug, info};

use crate::{config::Config, models::status::AckDecision, utils::retry_with_backoff};

pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ...");

        let connection = retry_with_backoff(&config.retry_config(), || {
            Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
        })
        .await
        .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        info!("RabbitMQ connection established");

        let channel = connection
            .create_channel()
            .await
            .map_err(|_| anyhow!("RabbitMQ channel creation failed"))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to set up QoS"))?;

        debug!(prefetch_count = config.prefetch_count, "Prefetch count set");

        Ok(Self {
            connection,
            channel,
        })
    }

    /// Declares the notification exchange and binds both event queues to it.
    pub async fn declare_topology(&self, config: &Config) -> Result<(), Error> {
        self.channel
            .exchange_declare(
                &config.notification_exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to declare notification exchange"))?;

        let bindings = [
            (
                &config.verification_queue_name,
                &config.verification_routing_key,
            ),
            (
                &config.order_created_queue_name,
                &config.order_created_routing_key,
            ),
        ];

        for (queue, routing_key) in bindings {
            self.channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|_| anyhow!("Failed to declare queue {}", queue))?;

            self.channel
                .queue_bind(
                    queue,
                    &config.notification_exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|_| anyhow!("Failed to bind queue {}", queue))?;

            debug!(queue = %queue, routing_key = %routing_key, "Queue declared and bound");
        }

        info!(exchange = %config.notification_exchange, "Broker topology declared");

        Ok(())
    }

    pub async fn create_consumer(&self, queue: &str, consumer_tag: &str) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to create consumer for {}", queue))?;

        info!(queue, consumer_tag, "Consumer created for queue");

        Ok(consumer)
    }

    /// Opens an extra channel on the same connection.
    pub async fn create_channel(&self) -> Result<Channel, Error> {
        self.connection
            .create_channel()
            .await
            .map_err(|_| anyhow!("RabbitMQ channel creation failed"))
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to acknowledge message"))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|_| anyhow!("Failed to reject message"))?;

        Ok(())
    }

    pub async fn settle(&self, delivery_tag: u64, decision: AckDecision) -> Result<(), Error> {
        match decision {
            AckDecision::Ack => self.acknowledge(delivery_tag).await,
            AckDecision::RejectPermanent | AckDecision::RejectRetryable => {
                self.reject(delivery_tag, decision.requeue()).await
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}
