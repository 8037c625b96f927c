use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the persistence layer when a conversation is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the persistence layer when a message is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    /// Transient "assistant is responding" entry. Never persisted.
    TypingPlaceholder,
}

impl Role {
    /// Role name as understood by OpenAI-compatible chat endpoints.
    /// `None` for roles that never leave the process.
    pub fn as_api_str(&self) -> Option<&'static str> {
        match self {
            Role::User => Some("user"),
            Role::Assistant => Some("assistant"),
            Role::System => Some("system"),
            Role::TypingPlaceholder => None,
        }
    }

    pub fn is_persistable(&self) -> bool {
        self.as_api_str().is_some()
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// A single entry of a conversation's message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<MessageId>,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Estimated token count, fixed when the message is created.
    #[serde(default)]
    pub tokens: usize,
}

impl Message {
    /// Build an unpersisted message stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: None,
            role,
            tokens: estimate_tokens(&content),
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn typing_placeholder() -> Self {
        Self::new(Role::TypingPlaceholder, String::new())
    }

    pub fn is_typing_placeholder(&self) -> bool {
        self.role == Role::TypingPlaceholder
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

/// Message payload handed to the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub tokens: usize,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            role,
            tokens: estimate_tokens(&content),
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn into_message(self, id: MessageId) -> Message {
        Message {
            id: Some(id),
            role: self.role,
            content: self.content,
            timestamp: self.timestamp,
            tokens: self.tokens,
        }
    }
}

/// Lightweight conversation metadata used for listings and search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Rough token estimate (~4 characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
