//! Telegram decision channel.
//!
//! Sends confirmation requests as Telegram messages with an inline
//! approve / regenerate / reject keyboard, and long-polls `getUpdates` for
//! button presses. Each press is acknowledged, the keyboard is stripped
//! from the message, and the decision is forwarded to the approval
//! broker's event queue keyed by the Telegram message id.

use async_trait::async_trait;
use murmur_common::{Error, Result};
use murmur_core::{ConfirmationOutcome, ConfirmationRequest, DecisionChannel, DecisionEvent, DeliveryId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Callback payloads carried by the inline keyboard buttons.
const CALLBACK_APPROVE: &str = "approve";
const CALLBACK_REGENERATE: &str = "regenerate";
const CALLBACK_REJECT: &str = "reject";

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Backoff after a failed poll.
const POLL_RETRY: Duration = Duration::from_secs(5);

/// Telegram bot channel for human approval decisions.
pub struct TelegramChannel {
    bot_token: String,
    chat_id: i64,
    client: reqwest::Client,
    events: mpsc::Sender<DecisionEvent>,
}

impl TelegramChannel {
    pub fn new(
        bot_token: impl Into<String>,
        chat_id: i64,
        events: mpsc::Sender<DecisionEvent>,
    ) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id,
            client: reqwest::Client::new(),
            events,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    async fn call(&self, method: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("telegram {method} failed: {e}")))?;
        if !response.status().is_success() {
            let err = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("telegram {method} failed: {err}")));
        }
        response
            .json()
            .await
            .map_err(|e| Error::InvalidInput(format!("telegram {method} response: {e}")))
    }

    /// Acknowledge a button press so the client stops showing a spinner.
    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "callback_query_id": callback_id,
            "text": text,
        });
        self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }

    /// Remove the inline keyboard from a decided message.
    async fn strip_keyboard(&self, message_id: i64) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "message_id": message_id,
            "reply_markup": { "inline_keyboard": [] },
        });
        self.call("editMessageReplyMarkup", &body).await?;
        Ok(())
    }

    /// Spawn the long-poll loop that turns button presses into decision
    /// events. Runs until the process exits.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            info!("Telegram decision listener started");
            let mut offset: i64 = 0;
            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["callback_query"],
                });
                let data = match channel.call("getUpdates", &body).await {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(error = %e, "Telegram poll failed, retrying");
                        tokio::time::sleep(POLL_RETRY).await;
                        continue;
                    }
                };

                let Some(updates) = data.get("result").and_then(serde_json::Value::as_array)
                else {
                    continue;
                };
                for update in updates {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }
                    let Some(callback) = update.get("callback_query") else {
                        continue;
                    };
                    let Some(press) = parse_callback(callback) else {
                        debug!("Ignoring malformed callback query");
                        continue;
                    };

                    if let Err(e) = channel.answer_callback(&press.callback_id, "Got it").await {
                        debug!(error = %e, "Failed to answer callback query");
                    }
                    if let Err(e) = channel.strip_keyboard(press.message_id).await {
                        debug!(error = %e, "Failed to strip keyboard");
                    }

                    let event = DecisionEvent {
                        delivery: DeliveryId::new(press.message_id.to_string()),
                        outcome: press.outcome,
                    };
                    if channel.events.send(event).await.is_err() {
                        warn!("Decision event receiver dropped, listener exiting");
                        return;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl DecisionChannel for TelegramChannel {
    async fn send(&self, request: &ConfirmationRequest) -> Result<DeliveryId> {
        let text = format!(
            "*[{}]*\n\n{}",
            escape_markdown(&request.title),
            escape_markdown(&request.body)
        );
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown",
            "reply_markup": {
                "inline_keyboard": [[
                    { "text": "✅ Approve", "callback_data": CALLBACK_APPROVE },
                    { "text": "🔄 Regenerate", "callback_data": CALLBACK_REGENERATE },
                    { "text": "❌ Reject", "callback_data": CALLBACK_REJECT },
                ]]
            },
        });

        let data = self.call("sendMessage", &body).await?;
        let message_id = data
            .get("result")
            .and_then(|r| r.get("message_id"))
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| Error::InvalidInput("sendMessage response missing message_id".into()))?;

        debug!(message_id, correlation = %request.correlation_id, "Confirmation sent to Telegram");
        Ok(DeliveryId::new(message_id.to_string()))
    }
}

/// One parsed inline-button press.
struct ButtonPress {
    callback_id: String,
    message_id: i64,
    outcome: ConfirmationOutcome,
}

fn parse_callback(callback: &serde_json::Value) -> Option<ButtonPress> {
    let callback_id = callback.get("id")?.as_str()?.to_string();
    let data = callback.get("data")?.as_str()?;
    let message_id = callback.get("message")?.get("message_id")?.as_i64()?;
    Some(ButtonPress {
        callback_id,
        message_id,
        outcome: parse_outcome(data)?,
    })
}

fn parse_outcome(data: &str) -> Option<ConfirmationOutcome> {
    match data {
        CALLBACK_APPROVE => Some(ConfirmationOutcome::Approved),
        CALLBACK_REGENERATE => Some(ConfirmationOutcome::Regenerate),
        CALLBACK_REJECT => Some(ConfirmationOutcome::Rejected),
        _ => None,
    }
}

fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '[' | '`' | '(' | ')') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
