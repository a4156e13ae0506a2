use async_trait::async_trait;
use tracing::info;

use shared_models::Channel;

use crate::channels::{ChannelAdapter, SendOutcome};
use crate::templates::TemplatedMessage;

/// Accepts every message and logs it. Stands in for unconfigured transports.
pub struct LoggingChannel {
    channel: Channel,
}

impl LoggingChannel {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelAdapter for LoggingChannel {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: &str, message: &TemplatedMessage) -> SendOutcome {
        info!(channel = %self.channel, recipient = %recipient, subject = %message.subject, "{}", message.body);
        SendOutcome::Accepted
    }
}
