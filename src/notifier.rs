use crate::error::DeliveryError;
use crate::subscribers::SubscriberId;
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Outbound channel to subscribers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subscriber: SubscriberId, text: &str) -> Result<(), DeliveryError>;
}

/// Delivers messages through the Telegram Bot API `sendMessage` method.
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TelegramReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(api_url: &str, bot_token: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), bot_token),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    /// Any failure, including an HTTP 5xx or a timeout, is reported as a
    /// `DeliveryError`, which gets the subscriber pruned by the dispatcher.
    async fn send(&self, subscriber: SubscriberId, text: &str) -> Result<(), DeliveryError> {
        let failure = |reason: String| DeliveryError { subscriber, reason };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "chat_id": subscriber, "text": text }))
            .send()
            .await
            .map_err(|e| failure(e.without_url().to_string()))?;

        let status = response.status();
        let reply: TelegramReply = response
            .json()
            .await
            .map_err(|e| failure(format!("HTTP {}: {}", status, e.without_url())))?;

        if reply.ok {
            Ok(())
        } else {
            Err(failure(
                reply
                    .description
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            ))
        }
    }
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subscriber: SubscriberId, text: &str) -> Result<(), DeliveryError> {
        info!("[dry-run] to {}: {}", subscriber, text.replace('\n', " | "));
        Ok(())
    }
}
