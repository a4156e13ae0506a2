pub mod logging;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shared_models::Channel;

use crate::error::ChannelError;
use crate::templates::TemplatedMessage;

pub use logging::LoggingChannel;
pub use webhook::WebhookChannel;

/// Result of handing one message to a channel provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum SendOutcome {
    Accepted,
    Rejected(String),
    Transient(String),
}

impl SendOutcome {
    pub fn into_result(self) -> Result<(), ChannelError> {
        match self {
            SendOutcome::Accepted => Ok(()),
            SendOutcome::Rejected(reason) => Err(ChannelError::Rejected(reason)),
            SendOutcome::Transient(reason) => Err(ChannelError::Transient(reason)),
        }
    }
}

impl From<Result<(), ChannelError>> for SendOutcome {
    fn from(result: Result<(), ChannelError>) -> Self {
        match result {
            Ok(()) => SendOutcome::Accepted,
            Err(ChannelError::Rejected(reason)) => SendOutcome::Rejected(reason),
            Err(error) => SendOutcome::Transient(error.to_string()),
        }
    }
}

/// Contract every external communication collaborator satisfies.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, recipient: &str, message: &TemplatedMessage) -> SendOutcome;
}
