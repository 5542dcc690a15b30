//! Chat history data model: messages, senders and the persisted document.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Symbolic sender name used for replies from the chat-completion API.
pub const AI_SENDER: &str = "ai";

#[derive(Debug, Error, PartialEq)]
pub enum HistoryError {
    #[error("message text is empty")]
    EmptyMessage,
}

/// Who authored a message. Serialized as a bare string: the user id, or `"ai"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sender {
    User(String),
    Ai,
}

impl Sender {
    pub fn is_ai(&self) -> bool {
        matches!(self, Sender::Ai)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Sender::User(id) => id,
            Sender::Ai => AI_SENDER,
        }
    }
}

impl From<String> for Sender {
    fn from(value: String) -> Self {
        if value == AI_SENDER {
            Sender::Ai
        } else {
            Sender::User(value)
        }
    }
}

impl From<Sender> for String {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::User(id) => id,
            Sender::Ai => AI_SENDER.to_string(),
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    pub sender: Sender,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Builds a message from raw input. The text is trimmed and must not be empty.
    pub fn new(sender: Sender, text: &str) -> Result<Self, HistoryError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(HistoryError::EmptyMessage);
        }
        Ok(Self {
            message_id: Uuid::new_v4().to_string(),
            sender,
            message: text.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn from_user(user_id: impl Into<String>, text: &str) -> Result<Self, HistoryError> {
        Self::new(Sender::User(user_id.into()), text)
    }

    pub fn from_ai(text: &str) -> Result<Self, HistoryError> {
        Self::new(Sender::Ai, text)
    }
}

/// The whole conversation, oldest first.
pub type ConversationHistory = Vec<Message>;

/// On-disk and on-the-wire shape: `{"messages": [...]}`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct HistoryDocument {
    #[serde(default)]
    pub messages: ConversationHistory,
}

impl HistoryDocument {
    pub fn new(messages: ConversationHistory) -> Self {
        Self { messages }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
