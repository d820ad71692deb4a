use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// Outcome of one consumption attempt, handed back to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckDecision {
    Ack,
    /// Never redeliver; the broker dead-letters or drops the message.
    RejectPermanent,
    /// Requeue so the broker can redeliver.
    RejectRetryable,
}

impl AckDecision {
    pub fn requeue(&self) -> bool {
        matches!(self, AckDecision::RejectRetryable)
    }
}

impl Display for AckDecision {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            AckDecision::Ack => write!(f, "ack"),
            AckDecision::RejectPermanent => write!(f, "reject_permanent"),
            AckDecision::RejectRetryable => write!(f, "reject_retryable"),
        }
    }
}
