// libs/alert-cell/src/channels/webhook.rs
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use shared_models::Channel;

use crate::channels::{ChannelAdapter, SendOutcome};
use crate::error::ChannelError;
use crate::templates::TemplatedMessage;

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    channel: Channel,
    recipient: &'a str,
    subject: &'a str,
    body: &'a str,
    fields: &'a Map<String, Value>,
}

/// Triggers a workflow-automation scenario by POSTing the message as JSON.
///
/// 2xx is accepted, 4xx is a rejection and anything else (5xx, connection
/// errors) is transient.
pub struct WebhookChannel {
    client: Client,
    url: String,
    channel: Channel,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            channel: Channel::Webhook,
        }
    }

    /// Use the webhook as the transport for another channel.
    pub fn for_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    async fn post(&self, recipient: &str, message: &TemplatedMessage) -> anyhow::Result<(StatusCode, String)> {
        let body = WebhookBody {
            channel: self.channel,
            recipient,
            subject: &message.subject,
            body: &message.body,
            fields: &message.fields,
        };

        debug!("Sending {} webhook to: {}", self.channel, self.url);

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;

        let status = response.status();
        let text = response.text().await.context("Failed to read webhook response")?;
        Ok((status, text))
    }

    async fn deliver(&self, recipient: &str, message: &TemplatedMessage) -> Result<(), ChannelError> {
        let (status, text) = self
            .post(recipient, message)
            .await
            .map_err(|e| ChannelError::Transient(format!("{:#}", e)))?;

        if status.is_success() {
            return Ok(());
        }

        if status.is_client_error() {
            error!("Webhook rejected message: {} - {}", status, text);
            return Err(ChannelError::Rejected(format!("HTTP {}: {}", status, text)));
        }

        warn!("Webhook returned {}: {}", status, text);
        Err(ChannelError::Transient(format!("HTTP {}: {}", status, text)))
    }
}

#[async_trait]
impl ChannelAdapter for WebhookChannel {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: &str, message: &TemplatedMessage) -> SendOutcome {
        self.deliver(recipient, message).await.into()
    }
}
