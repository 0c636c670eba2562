//! `MessagingClient` (spec §6): reply/media/profile contract against the
//! chat platform. Retry-on-rate-limit loop generalizes the teacher's
//! `bot::notifications_sender::send_message_safe` (retry on
//! `teloxide::RequestError::RetryAfter`, give up after a fixed attempt
//! count) to a generic HTTP 429 `Retry-After` response instead of a
//! Telegram-specific error variant.

use async_trait::async_trait;
use serde::Serialize;
use slog::Logger;
use std::time::Duration;

use crate::error::AppError;

const RESEND_ATTEMPTS: usize = 10;
const QUICK_REPLY_LABEL_MAX: usize = 20;
const QUICK_REPLY_ITEMS_MAX: usize = 13;

#[derive(Debug, Clone, Serialize)]
pub struct QuickReplyItem {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct QuickReply {
    pub items: Vec<QuickReplyItem>,
}

impl QuickReply {
    /// Truncates labels to 20 chars and caps item count at 13, spec §6.
    pub fn new(items: Vec<QuickReplyItem>) -> Self {
        let items = items
            .into_iter()
            .take(QUICK_REPLY_ITEMS_MAX)
            .map(|mut item| {
                if item.label.chars().count() > QUICK_REPLY_LABEL_MAX {
                    item.label = item.label.chars().take(QUICK_REPLY_LABEL_MAX).collect();
                }
                item
            })
            .collect();
        Self { items }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub text: String,
    pub quick_reply: Option<QuickReply>,
}

#[derive(Debug, Clone)]
pub struct UserProfile {
    pub display_name: String,
}

#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn reply(&self, reply_token: &str, messages: Vec<OutboundMessage>) -> Result<(), AppError>;
    async fn get_message_content(&self, message_id: &str) -> Result<Vec<u8>, AppError>;
    async fn get_user_profile(&self, user_id: &str) -> Result<UserProfile, AppError>;
    /// Unsolicited delivery, used only by `ReminderPropagator`'s fan-out — a
    /// fired reminder has no `replyToken` to answer against. Not in spec's
    /// literal `MessagingClient` list, which only covers the chat-turn
    /// reply path; this is the LINE push endpoint the reminder pipeline
    /// needs and the spec is silent on.
    async fn push(&self, user_id: &str, messages: Vec<OutboundMessage>) -> Result<(), AppError>;
}

/// Real implementation over the LINE Messaging API. Generalizes
/// `send_message_safe`'s retry loop: instead of matching a Telegram
/// `RetryAfter` error variant, this reads the standard `Retry-After`
/// header off a `429` response.
pub struct HttpMessagingClient {
    client: reqwest::Client,
    channel_access_token: String,
    logger: Logger,
}

impl HttpMessagingClient {
    pub fn new(channel_access_token: String, logger: Logger) -> Self {
        Self {
            client: reqwest::Client::new(),
            channel_access_token,
            logger,
        }
    }

    async fn send_message_safe(&self, reply_token: &str, messages: &[OutboundMessage]) -> Result<(), AppError> {
        let body = serde_json::json!({
            "replyToken": reply_token,
            "messages": messages.iter().map(to_line_message).collect::<Vec<_>>(),
        });

        for _ in 0..RESEND_ATTEMPTS {
            let response = self
                .client
                .post("https://api.line.me/v2/bot/message/reply")
                .bearer_auth(&self.channel_access_token)
                .json(&body)
                .send()
                .await
                .map_err(|err| AppError::Messaging(err.to_string()))?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            if !response.status().is_success() {
                slog::error!(self.logger, "messaging.reply.failed"; "status" => response.status().as_u16());
                return Err(AppError::Messaging(format!("status {}", response.status())));
            }

            return Ok(());
        }

        Err(AppError::Messaging("resend attempts reached".to_string()))
    }

    async fn send_push_safe(&self, user_id: &str, messages: &[OutboundMessage]) -> Result<(), AppError> {
        let body = serde_json::json!({
            "to": user_id,
            "messages": messages.iter().map(to_line_message).collect::<Vec<_>>(),
        });

        for _ in 0..RESEND_ATTEMPTS {
            let response = self
                .client
                .post("https://api.line.me/v2/bot/message/push")
                .bearer_auth(&self.channel_access_token)
                .json(&body)
                .send()
                .await
                .map_err(|err| AppError::Messaging(err.to_string()))?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            if !response.status().is_success() {
                slog::error!(self.logger, "messaging.push.failed"; "status" => response.status().as_u16());
                return Err(AppError::Messaging(format!("status {}", response.status())));
            }

            return Ok(());
        }

        Err(AppError::Messaging("resend attempts reached".to_string()))
    }
}

fn to_line_message(message: &OutboundMessage) -> serde_json::Value {
    let mut value = serde_json::json!({
        "type": "text",
        "text": message.text,
    });
    if let Some(quick_reply) = &message.quick_reply {
        value["quickReply"] = serde_json::json!({
            "items": quick_reply.items.iter().map(|item| serde_json::json!({
                "type": "action",
                "action": {"type": "message", "label": item.label, "text": item.text},
            })).collect::<Vec<_>>(),
        });
    }
    value
}

#[async_trait]
impl MessagingClient for HttpMessagingClient {
    async fn reply(&self, reply_token: &str, messages: Vec<OutboundMessage>) -> Result<(), AppError> {
        self.send_message_safe(reply_token, &messages).await
    }

    async fn get_message_content(&self, message_id: &str) -> Result<Vec<u8>, AppError> {
        let response = self
            .client
            .get(format!("https://api-data.line.me/v2/bot/message/{message_id}/content"))
            .bearer_auth(&self.channel_access_token)
            .send()
            .await
            .map_err(|err| AppError::Messaging(err.to_string()))?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|err| AppError::Messaging(err.to_string()))
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<UserProfile, AppError> {
        let response = self
            .client
            .get(format!("https://api.line.me/v2/bot/profile/{user_id}"))
            .bearer_auth(&self.channel_access_token)
            .send()
            .await
            .map_err(|err| AppError::Messaging(err.to_string()))?;
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|err| AppError::Messaging(err.to_string()))?;
        Ok(UserProfile {
            display_name: payload["displayName"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn push(&self, user_id: &str, messages: Vec<OutboundMessage>) -> Result<(), AppError> {
        self.send_push_safe(user_id, &messages).await
    }
}

/// Test/QA double selected per spec §4.9's dynamic service selection
/// (`U_test_` user ids without a QA override).
pub struct MockMessagingClient {
    pub sent: tokio::sync::Mutex<Vec<(String, Vec<OutboundMessage>)>>,
}

impl Default for MockMessagingClient {
    fn default() -> Self {
        Self {
            sent: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MessagingClient for MockMessagingClient {
    async fn reply(&self, reply_token: &str, messages: Vec<OutboundMessage>) -> Result<(), AppError> {
        self.sent.lock().await.push((reply_token.to_string(), messages));
        Ok(())
    }

    async fn get_message_content(&self, _message_id: &str) -> Result<Vec<u8>, AppError> {
        Ok(Vec::new())
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<UserProfile, AppError> {
        Ok(UserProfile {
            display_name: format!("mock-{user_id}"),
        })
    }

    async fn push(&self, user_id: &str, messages: Vec<OutboundMessage>) -> Result<(), AppError> {
        self.sent.lock().await.push((format!("push:{user_id}"), messages));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_reply_truncates_labels_and_caps_items() {
        let items: Vec<_> = (0..20)
            .map(|i| QuickReplyItem {
                label: format!("這是一個非常長的按鈕標籤文字用來測試截斷行為-{i}"),
                text: format!("opt-{i}"),
            })
            .collect();
        let reply = QuickReply::new(items);
        assert_eq!(reply.items.len(), QUICK_REPLY_ITEMS_MAX);
        assert!(reply.items.iter().all(|item| item.label.chars().count() <= QUICK_REPLY_LABEL_MAX));
    }

    #[tokio::test]
    async fn mock_client_records_sent_messages() {
        let mock = MockMessagingClient::default();
        mock.reply(
            "token",
            vec![OutboundMessage {
                text: "hi".to_string(),
                quick_reply: None,
            }],
        )
        .await
        .unwrap();
        assert_eq!(mock.sent.lock().await.len(), 1);
    }
}
