//! Event handlers for the verification and order-created queues.
//!
//! Each handler runs one delivery through decode, optional user lookup,
//! rendering and dispatch, and turns the result into a single
//! [`AckDecision`]. Errors never leave a handler.

use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};

use crate::{
    clients::{mailer::MailDispatcher, template::TemplateRenderer, user_lookup::UserLookup},
    error::NotificationError,
    models::{
        email::EmailEnvelope,
        event::{OrderNotificationEvent, VerificationEvent, decode_event, identifying_field},
        status::AckDecision,
        user::LookupOutcome,
    },
};

pub const VERIFICATION_TEMPLATE: &str = "verification";
pub const ORDER_CREATED_TEMPLATE: &str = "order-created";

/// Immutable per-process settings the handlers need.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub verification_queue: String,
    pub order_created_queue: String,
    pub from: String,
    pub verification_subject: String,
    pub order_created_subject: String,
    pub token_expiration: String,
    pub lookup_timeout: Duration,
}

pub struct NotificationConsumer {
    settings: ConsumerSettings,
    renderer: TemplateRenderer,
    dispatcher: MailDispatcher,
    lookup: Arc<dyn UserLookup>,
}

impl NotificationConsumer {
    pub fn new(
        settings: ConsumerSettings,
        renderer: TemplateRenderer,
        dispatcher: MailDispatcher,
        lookup: Arc<dyn UserLookup>,
    ) -> Self {
        Self {
            settings,
            renderer,
            dispatcher,
            lookup,
        }
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    pub async fn on_verification_event(&self, payload: &[u8]) -> AckDecision {
        let queue = &self.settings.verification_queue;

        match self.process_verification(payload).await {
            Ok(recipient) => {
                info!(queue = %queue, recipient = %recipient, "Verification email sent");
                AckDecision::Ack
            }
            Err(e) => self.reject(queue, e),
        }
    }

    pub async fn on_order_created_event(&self, payload: &[u8]) -> AckDecision {
        let queue = &self.settings.order_created_queue;

        match self.process_order_created(payload).await {
            Ok(recipient) => {
                info!(queue = %queue, recipient = %recipient, "Order confirmation email sent");
                AckDecision::Ack
            }
            Err(e) => self.reject(queue, e),
        }
    }

    async fn process_verification(&self, payload: &[u8]) -> Result<String, NotificationError> {
        let event: VerificationEvent = self.decode(
            &self.settings.verification_queue,
            payload,
            VerificationEvent::IDENTIFYING_FIELD,
        )?;

        info!(email = %event.recipient_email, "Received email verification message");

        let body = self
            .renderer
            .render(
                VERIFICATION_TEMPLATE,
                &[
                    &event.first_name,
                    &event.verification_link,
                    &self.settings.token_expiration,
                ],
            )
            .await?;

        let envelope = EmailEnvelope::new(
            self.settings.from.as_str(),
            event.recipient_email,
            self.settings.verification_subject.as_str(),
            body,
        );
        self.dispatcher.send(&envelope).await?;

        Ok(envelope.to)
    }

    async fn process_order_created(&self, payload: &[u8]) -> Result<String, NotificationError> {
        let event: OrderNotificationEvent = self.decode(
            &self.settings.order_created_queue,
            payload,
            OrderNotificationEvent::IDENTIFYING_FIELD,
        )?;

        info!(user_id = %event.user_id, "Received order created message");

        let profile = match self
            .lookup
            .lookup(&event.user_id, self.settings.lookup_timeout)
            .await
        {
            LookupOutcome::Found(profile) => profile,
            LookupOutcome::NotFound => {
                return Err(NotificationError::UserNotFound {
                    user_id: event.user_id,
                });
            }
            LookupOutcome::TransportFailure(failure) => {
                return Err(NotificationError::LookupUnavailable {
                    user_id: event.user_id,
                    failure,
                });
            }
        };

        let body = self
            .renderer
            .render(
                ORDER_CREATED_TEMPLATE,
                &[
                    &profile.first_name,
                    &event.order_timestamp,
                    &event.formatted_total_price(),
                ],
            )
            .await?;

        let envelope = EmailEnvelope::new(
            self.settings.from.as_str(),
            profile.email,
            self.settings.order_created_subject.as_str(),
            body,
        );
        self.dispatcher.send(&envelope).await?;

        Ok(envelope.to)
    }

    fn decode<T>(&self, queue: &str, payload: &[u8], field: &str) -> Result<T, NotificationError>
    where
        T: serde::de::DeserializeOwned + validator::Validate,
    {
        decode_event::<T>(payload).map_err(|reason| NotificationError::Decode {
            queue: queue.to_string(),
            identifier: identifying_field(payload, field),
            reason,
        })
    }

    fn reject(&self, queue: &str, error: NotificationError) -> AckDecision {
        let decision = error.decision();

        match &error {
            NotificationError::Decode { identifier, .. } => {
                warn!(queue, identifier = ?identifier, error = %error, decision = %decision, "Rejecting malformed message");
            }
            NotificationError::Template(_) => {
                error!(queue, error = %error, decision = %decision, "Email template unavailable");
            }
            NotificationError::UserNotFound { user_id } => {
                warn!(queue, user_id = %user_id, decision = %decision, "User not found, dropping notification");
            }
            NotificationError::LookupUnavailable { user_id, failure } => {
                warn!(queue, user_id = %user_id, failure = %failure, decision = %decision, "User lookup unavailable, requesting redelivery");
            }
            NotificationError::Send(send_error) => {
                error!(
                    queue,
                    recipient = %send_error.recipient,
                    error = %send_error.source,
                    decision = %decision,
                    "Notification lost, email could not be sent"
                );
            }
        }

        decision
    }
}
