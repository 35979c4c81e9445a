//! Telegram Bot API transport — long polling, message send/edit/delete and
//! callback acknowledgement.

use async_trait::async_trait;
use cloudclaw_core::config::TelegramConfig;
use cloudclaw_core::control::{BotIdentity, InlineKeyboard, Update};
use cloudclaw_core::error::{CloudClawError, Result};
use cloudclaw_core::traits::ControlTransport;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

/// Slack added on top of the long-poll timeout for the HTTP request itself.
const POLL_GRACE_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Telegram Bot API client. Stateless apart from the HTTP pool; the token is
/// supplied per call so it can change at runtime.
pub struct TelegramClient {
    api_base: String,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, token, method)
    }

    /// POST a Bot API method and unwrap the `{ok, result, description}` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        token: &str,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.api_url(token, method))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| CloudClawError::Channel(format!("Telegram {method} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Telegram {method} returned {status}");
        }
        let body: TelegramApiResponse<T> = response.json().await.map_err(|e| {
            CloudClawError::Channel(format!("Invalid Telegram {method} response ({status}): {e}"))
        })?;
        body.into_result(method)
    }
}

#[async_trait]
impl ControlTransport for TelegramClient {
    async fn get_updates(&self, token: &str, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        self.call(
            token,
            "getUpdates",
            &body,
            Duration::from_secs(timeout_secs + POLL_GRACE_SECS),
        )
        .await
    }

    async fn send_message(
        &self,
        token: &str,
        chat_id: &str,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<()> {
        let body = message_body(chat_id, None, text, keyboard);
        let _: Value = self
            .call(token, "sendMessage", &body, Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .await?;
        Ok(())
    }

    async fn edit_message(
        &self,
        token: &str,
        chat_id: &str,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<()> {
        let body = message_body(chat_id, Some(message_id), text, keyboard);
        let _: Value = self
            .call(token, "editMessageText", &body, Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .await?;
        Ok(())
    }

    async fn delete_message(&self, token: &str, chat_id: &str, message_id: i64) -> Result<()> {
        let body = json!({ "chat_id": chat_id, "message_id": message_id });
        let _: Value = self
            .call(token, "deleteMessage", &body, Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .await?;
        Ok(())
    }

    async fn answer_callback(&self, token: &str, callback_id: &str) -> Result<()> {
        let body = json!({ "callback_query_id": callback_id });
        let _: Value = self
            .call(
                token,
                "answerCallbackQuery",
                &body,
                Duration::from_secs(REQUEST_TIMEOUT_SECS),
            )
            .await?;
        Ok(())
    }

    async fn get_me(&self, token: &str) -> Result<BotIdentity> {
        self.call(token, "getMe", &json!({}), Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .await
    }
}

/// Body shared by `sendMessage` and `editMessageText`.
fn message_body(
    chat_id: &str,
    message_id: Option<i64>,
    text: &str,
    keyboard: Option<&InlineKeyboard>,
) -> Value {
    let mut body = json!({
        "chat_id": chat_id,
        "text": text,
        "parse_mode": "HTML",
    });
    if let Some(id) = message_id {
        body["message_id"] = json!(id);
    }
    if let Some(kb) = keyboard {
        body["reply_markup"] = json!(kb);
    }
    body
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

impl<T> TelegramApiResponse<T> {
    fn into_result(self, method: &str) -> Result<T> {
        if !self.ok {
            return Err(CloudClawError::Channel(format!(
                "Telegram API error on {method}: {}",
                self.description.unwrap_or_default()
            )));
        }
        self.result
            .ok_or_else(|| CloudClawError::Channel(format!("Telegram {method}: empty result")))
    }
}
