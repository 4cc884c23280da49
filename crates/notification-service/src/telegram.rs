use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use synthesis_core::DeliveryError;

use crate::NotificationChannel;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
/// Added on top of the long-poll wait so the server answers first
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    /// Unix seconds when the message was sent
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Minimal Telegram Bot API client: sendMessage and getUpdates.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DeliveryError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        let body = SendMessage {
            chat_id,
            text,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.without_url().to_string()))?;

        let _: serde_json::Value = Self::read_result(response).await?;
        Ok(())
    }

    /// Long-poll for updates newer than `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, DeliveryError> {
        let body = GetUpdates {
            offset,
            timeout: timeout_secs,
            allowed_updates: ["message"],
        };

        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(Duration::from_secs(timeout_secs) + POLL_GRACE)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.without_url().to_string()))?;

        Self::read_result(response).await
    }

    async fn read_result<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DeliveryError> {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::Network(e.without_url().to_string()))?;

        let parsed: TelegramResponse<T> = serde_json::from_str(&text).map_err(|e| DeliveryError::Api {
            status,
            description: format!("unreadable response: {}", e),
        })?;

        into_result(parsed, status)
    }
}

fn into_result<T>(response: TelegramResponse<T>, status: u16) -> Result<T, DeliveryError> {
    match response {
        TelegramResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        TelegramResponse {
            description,
            error_code,
            ..
        } => Err(DeliveryError::Api {
            status: error_code.unwrap_or(status),
            description: description.unwrap_or_else(|| "no result".to_string()),
        }),
    }
}

#[async_trait]
impl NotificationChannel for TelegramClient {
    async fn send(&self, destination: &str, text: &str) -> Result<(), DeliveryError> {
        self.send_message(destination, text).await
    }

    fn name(&self) -> &str {
        "telegram"
    }
}
