//! Telegram Bot channel — long polling + message sending/deleting via Bot API.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use festa_core::config::TelegramConfig;
use festa_core::error::{DeliveryError, FestaError, Result};
use festa_core::traits::Messenger;
use festa_core::types::{
    DeleteOutcome, Destination, MemberChange, MemberStatus, MessageId, Principal, TrackedMessage,
};
use futures::stream::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Descriptions Telegram uses when a chat is gone for good.
const PERMANENT_MARKERS: &[&str] = &[
    "chat not found",
    "bot was kicked",
    "bot was blocked",
    "bot is not a member",
    "user is deactivated",
    "group chat was upgraded",
    "have no rights to send",
    "not enough rights to send",
];

const NOT_FOUND_MARKERS: &[&str] = &["message to delete not found"];

/// A failed Bot API call, before classification.
#[derive(Debug, Clone)]
struct ApiFailure {
    /// `None` when the request never got an HTTP response.
    error_code: Option<u16>,
    description: String,
}

impl ApiFailure {
    fn network(description: String) -> Self {
        Self {
            error_code: None,
            description,
        }
    }

    fn mentions(&self, markers: &[&str]) -> bool {
        let description = self.description.to_lowercase();
        markers.iter().any(|m| description.contains(m))
    }

    fn into_delivery_error(self) -> DeliveryError {
        match self.error_code {
            Some(403) => DeliveryError::Permanent(self.description),
            Some(400) if self.mentions(PERMANENT_MARKERS) => {
                DeliveryError::Permanent(self.description)
            }
            _ => DeliveryError::Transient(self.description),
        }
    }

    fn into_delete_outcome(self) -> DeleteOutcome {
        if self.error_code == Some(400) && self.mentions(NOT_FOUND_MARKERS) {
            DeleteOutcome::NotFound
        } else {
            DeleteOutcome::Failed(self.description)
        }
    }
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.error_code {
            Some(code) => write!(f, "Telegram API error {code}: {}", self.description),
            None => write!(f, "{}", self.description),
        }
    }
}

/// Telegram Bot channel.
#[derive(Clone)]
pub struct TelegramChannel {
    config: TelegramConfig,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> std::result::Result<T, ApiFailure> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ApiFailure::network(format!("{method} failed: {e}")))?;

        let status = response.status().as_u16();
        let body: TelegramApiResponse<T> = response.json().await.map_err(|e| ApiFailure {
            error_code: Some(status),
            description: format!("Invalid {method} response: {e}"),
        })?;

        if !body.ok {
            return Err(ApiFailure {
                error_code: body.error_code.or(Some(status)),
                description: body.description.unwrap_or_default(),
            });
        }
        body.result.ok_or_else(|| ApiFailure {
            error_code: Some(status),
            description: format!("{method} returned no result"),
        })
    }

    /// Get bot info.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        self.call("getMe", &serde_json::json!({}), self.request_timeout)
            .await
            .map_err(|e| FestaError::Channel(e.to_string()))
    }

    /// Get updates using long polling.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>> {
        let timeout = Duration::from_secs(self.config.poll_timeout_secs) + self.request_timeout;
        self.call(
            "getUpdates",
            &serde_json::json!({
                "offset": offset,
                "timeout": self.config.poll_timeout_secs,
                "allowed_updates": ["message", "edited_message", "chat_member"],
            }),
            timeout,
        )
        .await
        .map_err(|e| FestaError::Channel(e.to_string()))
    }

    /// Send a plain text message, optionally as a reply.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> std::result::Result<TelegramMessage, DeliveryError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(reply_to) = reply_to {
            body["reply_to_message_id"] = serde_json::json!(reply_to);
        }
        self.call("sendMessage", &body, self.request_timeout)
            .await
            .map_err(ApiFailure::into_delivery_error)
    }

    /// Delete a message.
    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> DeleteOutcome {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
        });
        match self.call::<bool>("deleteMessage", &body, self.request_timeout).await {
            Ok(_) => DeleteOutcome::Deleted,
            Err(e) => e.into_delete_outcome(),
        }
    }

    /// Start polling loop — returns a stream of chat events.
    pub fn start_polling(&self) -> TelegramPollingStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let channel = self.clone();

        tokio::spawn(async move {
            tracing::info!("Telegram polling loop started");
            let mut offset = 0i64;

            loop {
                match channel.get_updates(offset).await {
                    Ok(updates) => {
                        for update in updates {
                            offset = offset.max(update.update_id + 1);
                            if let Some(event) = update.to_event() {
                                if tx.send(event).is_err() {
                                    tracing::info!("Telegram polling stopped (receiver dropped)");
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Telegram polling error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }

                if tx.is_closed() {
                    tracing::info!("Telegram polling stopped (receiver dropped)");
                    return;
                }
                tokio::time::sleep(Duration::from_secs(channel.config.poll_interval_secs)).await;
            }
        });

        TelegramPollingStream { rx }
    }
}

#[async_trait]
impl Messenger for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(
        &self,
        destination: Destination,
        text: &str,
    ) -> std::result::Result<MessageId, DeliveryError> {
        self.send_message(destination.0, text, None)
            .await
            .map(|m| MessageId(m.message_id))
    }

    async fn delete(&self, destination: Destination, message_id: MessageId) -> DeleteOutcome {
        self.delete_message(destination.0, message_id.0).await
    }
}

/// Stream of chat events from polling.
pub struct TelegramPollingStream {
    rx: tokio::sync::mpsc::UnboundedReceiver<ChatEvent>,
}

impl Stream for TelegramPollingStream {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Something that happened in a chat the bot is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Message(IncomingMessage),
    Edited(IncomingMessage),
    Member {
        chat: Destination,
        change: MemberChange,
    },
}

/// A text message from a human in some chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat: Destination,
    pub chat_title: Option<String>,
    pub message_id: MessageId,
    pub sender: Principal,
    pub sender_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    pub reply_to: Option<RepliedMessage>,
}

impl IncomingMessage {
    pub fn tracked(&self) -> TrackedMessage {
        TrackedMessage {
            message_id: self.message_id,
            sender: self.sender.clone(),
            sender_name: self.sender_name.clone(),
            text: self.text.clone(),
            sent_at: self.sent_at,
        }
    }
}

/// The message an incoming message replies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepliedMessage {
    pub message_id: MessageId,
    /// Author of the replied-to message, if known.
    pub author_id: Option<i64>,
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub edited_message: Option<TelegramMessage>,
    pub chat_member: Option<TelegramChatMemberUpdated>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    pub date: i64,
    pub reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChatMember {
    pub status: MemberStatus,
    pub user: TelegramUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChatMemberUpdated {
    pub chat: TelegramChat,
    pub date: i64,
    pub old_chat_member: TelegramChatMember,
    pub new_chat_member: TelegramChatMember,
}

impl TelegramMessage {
    /// Non-text and bot-authored messages yield `None`.
    fn to_incoming(&self) -> Option<IncomingMessage> {
        let text = self.text.as_ref()?;
        let from = self.from.as_ref()?;
        if from.is_bot {
            return None;
        }

        Some(IncomingMessage {
            chat: Destination(self.chat.id),
            chat_title: self.chat.title.clone(),
            message_id: MessageId(self.message_id),
            sender: Principal::new(from.id, from.username.as_deref()),
            sender_name: from.first_name.clone(),
            text: text.clone(),
            sent_at: DateTime::from_timestamp(self.date, 0).unwrap_or_default(),
            reply_to: self.reply_to_message.as_ref().map(|r| RepliedMessage {
                message_id: MessageId(r.message_id),
                author_id: r.from.as_ref().map(|u| u.id),
            }),
        })
    }
}

impl TelegramUpdate {
    /// Convert to a ChatEvent. Updates caused by or about bots are skipped.
    pub fn to_event(&self) -> Option<ChatEvent> {
        if let Some(msg) = &self.message {
            return msg.to_incoming().map(ChatEvent::Message);
        }
        if let Some(msg) = &self.edited_message {
            return msg.to_incoming().map(ChatEvent::Edited);
        }
        let update = self.chat_member.as_ref()?;
        let user = &update.new_chat_member.user;
        if user.is_bot {
            return None;
        }
        Some(ChatEvent::Member {
            chat: Destination(update.chat.id),
            change: MemberChange {
                user: Principal::new(user.id, user.username.as_deref()),
                user_name: user.first_name.clone(),
                old_status: update.old_chat_member.status,
                new_status: update.new_chat_member.status,
            },
        })
    }
}
