use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{clients::mailer::SmtpConfig, consumer::ConsumerSettings, models::retry::RetryConfig};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    pub notification_exchange: String,
    pub verification_queue_name: String,
    pub verification_routing_key: String,
    pub order_created_queue_name: String,
    pub order_created_routing_key: String,
    pub user_service_exchange: String,
    pub user_routing_key: String,
    pub prefetch_count: u16,
    pub worker_concurrency: usize,

    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    pub email_from: String,
    pub verification_email_subject: String,
    pub order_created_email_subject: String,
    pub token_expiration: String,

    #[serde(default = "default_template_dir")]
    pub template_dir: String,

    pub smtp_host: String,
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
    #[serde(default)]
    pub smtp_use_tls: bool,

    pub max_connect_attempts: u32,
    pub initial_connect_delay_ms: u64,
    pub max_connect_delay_ms: u64,
    pub connect_backoff_multiplier: u64,

    pub server_port: u16,
}

fn default_lookup_timeout_ms() -> u64 {
    5000
}

fn default_template_dir() -> String {
    "templates".to_string()
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_connect_attempts,
            initial_delay_ms: self.initial_connect_delay_ms,
            max_delay_ms: self.max_connect_delay_ms,
            backoff_multiplier: self.connect_backoff_multiplier,
        }
    }

    pub fn smtp_config(&self) -> SmtpConfig {
        SmtpConfig {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            username: self.smtp_username.clone(),
            password: self.smtp_password.clone(),
            use_tls: self.smtp_use_tls,
        }
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            verification_queue: self.verification_queue_name.clone(),
            order_created_queue: self.order_created_queue_name.clone(),
            from: self.email_from.clone(),
            verification_subject: self.verification_email_subject.clone(),
            order_created_subject: self.order_created_email_subject.clone(),
            token_expiration: self.token_expiration.clone(),
            lookup_timeout: Duration::from_millis(self.lookup_timeout_ms),
        }
    }
}
