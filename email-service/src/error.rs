use thiserror::Error;

use crate::{
    clients::{mailer::SendError, template::TemplateError},
    models::{status::AckDecision, user::LookupFailure},
};

/// Everything that can stop a notification from going out. Each variant maps
/// to exactly one acknowledgment decision.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("malformed payload on queue '{queue}': {reason}")]
    Decode {
        queue: String,
        identifier: Option<String>,
        reason: String,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("user not found with ID: {user_id}")]
    UserNotFound { user_id: String },

    #[error("user lookup for {user_id} failed: {failure}")]
    LookupUnavailable {
        user_id: String,
        failure: LookupFailure,
    },

    #[error(transparent)]
    Send(#[from] SendError),
}

impl NotificationError {
    pub fn decision(&self) -> AckDecision {
        match self {
            NotificationError::LookupUnavailable { .. } => AckDecision::RejectRetryable,
            NotificationError::Decode { .. }
            | NotificationError::Template(_)
            | NotificationError::UserNotFound { .. }
            | NotificationError::Send(_) => AckDecision::RejectPermanent,
        }
    }
}
