use std::sync::Arc;

use anyhow::{Error, Result};
use email_service::{
    api::run_api_server,
    clients::{
        health::HealthChecker,
        mailer::{MailDispatcher, MailTransport, SmtpMailTransport},
        rbmq::RabbitMqClient,
        template::{FileTemplateStore, TemplateRenderer},
        user_lookup::UserLookupClient,
    },
    config::Config,
    consumer::NotificationConsumer,
    utils::init_tracing,
    worker::run_consumers,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing();

    let _ = rustls::crypto::ring::default_provider().install_default();

    let rabbitmq = Arc::new(RabbitMqClient::connect(&config).await?);
    rabbitmq.declare_topology(&config).await?;

    let lookup = UserLookupClient::connect(rabbitmq.create_channel().await?, &config).await?;
    let replies = lookup.replies();

    let transport: Arc<dyn MailTransport> = Arc::new(SmtpMailTransport::new(&config.smtp_config())?);
    let renderer = TemplateRenderer::new(Arc::new(FileTemplateStore::new(&config.template_dir)));

    let handler = Arc::new(NotificationConsumer::new(
        config.consumer_settings(),
        renderer,
        MailDispatcher::new(Arc::clone(&transport)),
        Arc::new(lookup),
    ));

    let health_checker =
        HealthChecker::new(Arc::clone(&rabbitmq), transport, Arc::clone(&replies));
    let server_port = config.server_port;
    tokio::spawn(async move {
        if let Err(e) = run_api_server(server_port, health_checker).await {
            error!(error = %e, "Health check server stopped");
        }
    });

    info!("Configuration validated. Worker is starting.");

    run_consumers(rabbitmq, handler, replies, config.worker_concurrency).await
}
