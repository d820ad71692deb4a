use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub date_of_birth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupFailure {
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("failed to publish lookup request: {0}")]
    Publish(String),

    #[error("reply listener is gone")]
    ReplyChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(UserProfile),
    NotFound,
    TransportFailure(LookupFailure),
}

impl LookupOutcome {
    /// Interprets a lookup reply body. Empty bodies, JSON `null` and anything
    /// that is not a profile all count as "no such user".
    pub fn from_reply(body: &[u8]) -> Self {
        if body.iter().all(u8::is_ascii_whitespace) {
            return LookupOutcome::NotFound;
        }

        match serde_json::from_slice::<Option<UserProfile>>(body) {
            Ok(Some(profile)) => LookupOutcome::Found(profile),
            Ok(None) | Err(_) => LookupOutcome::NotFound,
        }
    }
}
