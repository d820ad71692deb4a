use std::sync::Arc;

use anyhow::{Context, Error, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, info};

use crate::models::email::EmailEnvelope;

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
}

/// Outbound mail primitive. Implementations own their delivery retries and
/// only report whether the message was accepted.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, envelope: &EmailEnvelope) -> Result<(), Error>;

    async fn health_check(&self) -> Result<(), Error>;
}

pub struct SmtpMailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, Error> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| anyhow!("Failed to create SMTP relay: {}", e))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let builder = builder.port(config.port);
        let transport = if config.username.is_empty() {
            builder.build()
        } else {
            builder
                .credentials(Credentials::new(
                    config.username.clone(),
                    config.password.clone(),
                ))
                .build()
        };

        info!(host = %config.host, port = config.port, tls = config.use_tls, "SMTP transport initialized");

        Ok(Self { transport })
    }

    fn build_message(envelope: &EmailEnvelope) -> Result<Message, Error> {
        let from: Mailbox = envelope.from.parse().context("Invalid from address")?;
        let to: Mailbox = envelope.to.parse().context("Invalid to address")?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(envelope.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(envelope.body.clone())
            .context("Failed to build email message")
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, envelope: &EmailEnvelope) -> Result<(), Error> {
        let message = Self::build_message(envelope)?;

        self.transport
            .send(message)
            .await
            .context("SMTP server rejected the message")?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        let reachable = self
            .transport
            .test_connection()
            .await
            .context("SMTP connection test failed")?;

        if !reachable {
            return Err(anyhow!("SMTP server did not accept a connection"));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to send email to {recipient}")]
pub struct SendError {
    pub recipient: String,
    #[source]
    pub source: Error,
}

impl SendError {
    pub fn new(recipient: impl Into<String>, source: Error) -> Self {
        Self {
            recipient: recipient.into(),
            source,
        }
    }
}

/// Stateless front of the mail transport: one attempt per call, failures
/// wrapped into [`SendError`].
#[derive(Clone)]
pub struct MailDispatcher {
    transport: Arc<dyn MailTransport>,
}

impl MailDispatcher {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }

    pub async fn send(&self, envelope: &EmailEnvelope) -> Result<(), SendError> {
        debug!(to = %envelope.to, subject = %envelope.subject, "Sending email");

        match self.transport.send(envelope).await {
            Ok(()) => {
                debug!(to = %envelope.to, "Email accepted by transport");
                Ok(())
            }
            Err(e) => {
                debug!(to = %envelope.to, error = %e, "Transport rejected email");
                Err(SendError::new(envelope.to.clone(), e))
            }
        }
    }
}
