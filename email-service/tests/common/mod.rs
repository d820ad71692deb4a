#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use email_service::{
    clients::{
        mailer::{MailDispatcher, MailTransport},
        template::{TemplateError, TemplateRenderer, TemplateStore},
        user_lookup::{ReplyRouter, RequestPublisher, UserLookup},
    },
    consumer::{ConsumerSettings, NotificationConsumer},
    models::{
        email::EmailEnvelope,
        user::{LookupOutcome, UserProfile},
    },
};

pub const FROM: &str = "mycompany@mail.com";
pub const VERIFICATION_SUBJECT: &str = "TEST TOPIC";
pub const ORDER_SUBJECT: &str = "ORDER TOPIC";
pub const TOKEN_EXPIRATION: &str = "999";

pub const VERIFICATION_TEMPLATE_TEXT: &str = "<p>Hello {0}</p><a href=\"{1}\">verify</a><small>expires in {2} minutes</small>";
pub const ORDER_TEMPLATE_TEXT: &str = "<p>Hi {0}, your order from {1} totals {2}</p>";

pub fn settings() -> ConsumerSettings {
    ConsumerSettings {
        verification_queue: "email.verification".to_string(),
        order_created_queue: "email.order.created".to_string(),
        from: FROM.to_string(),
        verification_subject: VERIFICATION_SUBJECT.to_string(),
        order_created_subject: ORDER_SUBJECT.to_string(),
        token_expiration: TOKEN_EXPIRATION.to_string(),
        lookup_timeout: Duration::from_millis(200),
    }
}

pub fn john_doe() -> UserProfile {
    UserProfile {
        first_name: "John".to_string(),
        last_name: "Doe".to_string(),
        email: "johndoe@mail.com".to_string(),
        date_of_birth: "1990-01-01".to_string(),
    }
}

/// Template store backed by a map, counting every load that reaches it.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: HashMap<String, String>,
    loads: AtomicUsize,
}

impl InMemoryTemplateStore {
    pub fn with_defaults() -> Self {
        Self::default()
            .with("verification", VERIFICATION_TEMPLATE_TEXT)
            .with("order-created", ORDER_TEMPLATE_TEXT)
    }

    pub fn with(mut self, name: &str, text: &str) -> Self {
        self.templates.insert(name.to_string(), text.to_string());
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn load(&self, name: &str) -> Result<String, TemplateError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<EmailEnvelope>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<EmailEnvelope> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, envelope: &EmailEnvelope) -> Result<(), Error> {
        self.sent.lock().unwrap().push(envelope.clone());
        if self.fail {
            return Err(anyhow!("connection refused by smtp relay"));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Returns a fixed outcome and records every user id it was asked for.
pub struct StubLookup {
    outcome: LookupOutcome,
    calls: Mutex<Vec<String>>,
}

impl StubLookup {
    pub fn new(outcome: LookupOutcome) -> Self {
        Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserLookup for StubLookup {
    async fn lookup(&self, user_id: &str, _timeout: Duration) -> LookupOutcome {
        self.calls.lock().unwrap().push(user_id.to_string());
        self.outcome.clone()
    }
}

pub struct PanickingLookup;

#[async_trait]
impl UserLookup for PanickingLookup {
    async fn lookup(&self, user_id: &str, _timeout: Duration) -> LookupOutcome {
        panic!("lookup exploded for {}", user_id);
    }
}

type ReplyFn = dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync;

/// Stands in for the user service: every published request is answered
/// through the shared router, optionally after a delay.
pub struct ScriptedPublisher {
    router: Arc<ReplyRouter>,
    reply: Box<ReplyFn>,
    delay: Option<Duration>,
    fail: bool,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    late_delivery_accepted: Arc<Mutex<Option<bool>>>,
}

impl ScriptedPublisher {
    pub fn new(
        router: Arc<ReplyRouter>,
        reply: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            router,
            reply: Box::new(reply),
            delay: None,
            fail: false,
            published: Arc::new(Mutex::new(Vec::new())),
            late_delivery_accepted: Arc::new(Mutex::new(None)),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Every `(correlation_id, payload)` pair published so far.
    pub fn published(&self) -> Arc<Mutex<Vec<(String, Vec<u8>)>>> {
        Arc::clone(&self.published)
    }

    /// Whether a delayed reply was accepted by the router, once it was sent.
    pub fn late_delivery(&self) -> Arc<Mutex<Option<bool>>> {
        Arc::clone(&self.late_delivery_accepted)
    }
}

#[async_trait]
impl RequestPublisher for ScriptedPublisher {
    async fn publish(&self, correlation_id: &str, payload: Vec<u8>) -> Result<(), Error> {
        if self.fail {
            return Err(anyhow!("channel closed"));
        }

        self.published
            .lock()
            .unwrap()
            .push((correlation_id.to_string(), payload.clone()));

        let Some(body) = (self.reply)(&payload) else {
            return Ok(());
        };

        let router = Arc::clone(&self.router);
        let correlation_id = correlation_id.to_string();
        match self.delay {
            None => {
                router.deliver(Some(&correlation_id), body);
            }
            Some(delay) => {
                let accepted = Arc::clone(&self.late_delivery_accepted);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let delivered = router.deliver(Some(&correlation_id), body);
                    *accepted.lock().unwrap() = Some(delivered);
                });
            }
        }

        Ok(())
    }
}

pub struct Harness {
    pub consumer: NotificationConsumer,
    pub templates: Arc<InMemoryTemplateStore>,
    pub transport: Arc<RecordingTransport>,
    pub lookup: Arc<StubLookup>,
}

impl Harness {
    pub fn new(outcome: LookupOutcome) -> Self {
        Self::build(
            InMemoryTemplateStore::with_defaults(),
            RecordingTransport::default(),
            outcome,
        )
    }

    pub fn build(
        templates: InMemoryTemplateStore,
        transport: RecordingTransport,
        outcome: LookupOutcome,
    ) -> Self {
        let templates = Arc::new(templates);
        let transport = Arc::new(transport);
        let lookup = Arc::new(StubLookup::new(outcome));

        let store: Arc<dyn TemplateStore> = templates.clone();
        let mail: Arc<dyn MailTransport> = transport.clone();
        let users: Arc<dyn UserLookup> = lookup.clone();

        let consumer = NotificationConsumer::new(
            settings(),
            TemplateRenderer::new(store),
            MailDispatcher::new(mail),
            users,
        );

        Self {
            consumer,
            templates,
            transport,
            lookup,
        }
    }
}
