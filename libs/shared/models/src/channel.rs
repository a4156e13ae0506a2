use std::fmt;

use serde::{Deserialize, Serialize};

/// Communication medium an alert can be delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Messaging,
    Voice,
    Webhook,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Email, Channel::Messaging, Channel::Voice, Channel::Webhook];

    /// Channel tried when this one is exhausted during escalation.
    pub fn fallback(&self) -> Channel {
        match self {
            Channel::Email => Channel::Messaging,
            Channel::Messaging => Channel::Voice,
            Channel::Voice => Channel::Messaging,
            Channel::Webhook => Channel::Email,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Messaging => write!(f, "messaging"),
            Channel::Voice => write!(f, "voice"),
            Channel::Webhook => write!(f, "webhook"),
        }
    }
}
