pub mod health;
pub mod mailer;
pub mod rbmq;
pub mod template;
pub mod user_lookup;
