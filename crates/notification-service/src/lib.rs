mod telegram;
mod templates;

pub use telegram::{Chat, IncomingMessage, TelegramClient, Update, TELEGRAM_API_BASE};
pub use templates::{split_message, MessageTemplate, MAX_MESSAGE_CHARS};

use async_trait::async_trait;
use std::sync::Arc;
use synthesis_core::DeliveryError;

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, destination: &str, text: &str) -> Result<(), DeliveryError>;
    fn name(&self) -> &str;
}

/// Configuration for the notification service.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub telegram_bot_token: Option<String>,
    /// Default destinations for scheduled pushes
    pub telegram_chat_ids: Vec<String>,
    pub telegram_api_base: String,
}

impl NotificationConfig {
    /// Load from environment variables. `TELEGRAM_CHAT_ID` may list several
    /// chats separated by commas.
    pub fn from_env() -> Self {
        let telegram_chat_ids = std::env::var("TELEGRAM_CHAT_ID")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
            telegram_chat_ids,
            telegram_api_base: std::env::var("TELEGRAM_API_BASE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| TELEGRAM_API_BASE.to_string()),
        }
    }
}

/// Dispatches messages to every configured channel. Long messages are split
/// before sending. Failures are reported, never retried.
#[derive(Clone)]
pub struct NotificationService {
    channels: Arc<Vec<Arc<dyn NotificationChannel>>>,
}

impl NotificationService {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        if channels.is_empty() {
            tracing::warn!("No notification channels configured");
        }
        Self {
            channels: Arc::new(channels),
        }
    }

    /// Send `text` to one destination on all channels. Every channel is
    /// attempted; the first failure is returned.
    pub async fn deliver(&self, destination: &str, text: &str) -> Result<(), DeliveryError> {
        let mut first_error = None;

        for channel in self.channels.iter() {
            for part in split_message(text, MAX_MESSAGE_CHARS) {
                match channel.send(destination, &part).await {
                    Ok(()) => tracing::debug!("Sent message to {} via {}", destination, channel.name()),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to send message to {} via {}: {}",
                            destination,
                            channel.name(),
                            e
                        );
                        first_error.get_or_insert(e);
                        break;
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Send `text` to several destinations. All are attempted.
    pub async fn broadcast(&self, destinations: &[String], text: &str) -> Result<(), DeliveryError> {
        let mut first_error = None;
        for destination in destinations {
            if let Err(e) = self.deliver(destination, text).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
