use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{mailer::MailTransport, rbmq::RabbitMqClient, user_lookup::ReplyRouter},
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

const MESSAGE_BROKER: &str = "message_broker";
const MAIL_TRANSPORT: &str = "mail_transport";
const USER_LOOKUP: &str = "user_lookup";

pub struct HealthChecker {
    rabbitmq: Arc<RabbitMqClient>,
    transport: Arc<dyn MailTransport>,
    replies: Arc<ReplyRouter>,
}

impl HealthChecker {
    pub fn new(
        rabbitmq: Arc<RabbitMqClient>,
        transport: Arc<dyn MailTransport>,
        replies: Arc<ReplyRouter>,
    ) -> Self {
        Self {
            rabbitmq,
            transport,
            replies,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert(MESSAGE_BROKER.to_string(), self.check_rabbitmq());
        checks.insert(MAIL_TRANSPORT.to_string(), self.check_mail_transport().await);
        checks.insert(USER_LOOKUP.to_string(), reply_listener_health(&self.replies));

        HealthCheckResponse {
            status: determine_overall_status(&checks),
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            checks,
        }
    }

    fn check_rabbitmq(&self) -> ServiceHealth {
        if self.rabbitmq.is_connected() {
            debug!("RabbitMQ health check passed");
            ServiceHealth::healthy(0)
        } else {
            warn!("RabbitMQ connection is down");
            ServiceHealth::unhealthy("Connection lost".to_string())
        }
    }

    async fn check_mail_transport(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.transport.health_check().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Mail transport health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Mail transport health check failed");
                ServiceHealth::degraded(format!("{:#}", e))
            }
        }
    }
}

fn reply_listener_health(replies: &ReplyRouter) -> ServiceHealth {
    if replies.is_closed() {
        warn!("User lookup reply listener is down");
        ServiceHealth::unhealthy("Reply listener stopped".to_string())
    } else {
        ServiceHealth::healthy(0)
    }
}

/// The broker is critical; an unreachable mail server only degrades the
/// service because queued messages wait for it.
pub fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let critical_unhealthy = checks
        .get(MESSAGE_BROKER)
        .is_some_and(|health| health.status == HealthStatus::Unhealthy);

    let has_unhealthy = checks
        .values()
        .any(|health| health.status == HealthStatus::Unhealthy);

    let has_degraded = checks
        .values()
        .any(|health| health.status == HealthStatus::Degraded);

    if critical_unhealthy || has_unhealthy {
        HealthStatus::Unhealthy
    } else if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
