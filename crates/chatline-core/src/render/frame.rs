use crate::models::{ConversationId, ConversationState, MessageId, MessagePaginator, RenderVersion, Role};
use crate::services::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    User,
    Assistant,
    System,
    /// Placeholder shown before the first delta arrives.
    Typing,
    /// In-progress assistant text, read from the accumulator.
    Streaming,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEntry {
    pub id: Option<MessageId>,
    pub kind: EntryKind,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// Transient banner shown above the input. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub detail: Option<String>,
    pub suggestion: Option<String>,
}

impl Notice {
    pub fn warning(title: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            title: title.into(),
            detail: None,
            suggestion: None,
        }
    }

    pub fn from_failure(kind: ErrorKind, message: &str) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: kind.title().to_string(),
            detail: (!message.is_empty()).then(|| message.to_string()),
            suggestion: Some(kind.suggestion().to_string()),
        }
    }
}

/// Immutable snapshot handed to a render surface.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub version: RenderVersion,
    pub conversation_id: Option<ConversationId>,
    pub entries: Vec<RenderedEntry>,
    /// Messages older than the visible window.
    pub hidden_count: usize,
    pub notice: Option<Notice>,
}

impl RenderFrame {
    pub fn empty(version: RenderVersion, notice: Option<Notice>) -> Self {
        Self {
            version,
            conversation_id: None,
            entries: Vec::new(),
            hidden_count: 0,
            notice,
        }
    }

    /// Project the visible window of `state`. A typing placeholder turns into
    /// a streaming entry once `streaming_text` is non-empty.
    pub fn project(
        version: RenderVersion,
        state: &ConversationState,
        paginator: &MessagePaginator,
        streaming_text: &str,
        notice: Option<Notice>,
    ) -> Self {
        let messages = state.messages();
        let entries = paginator
            .window(messages)
            .iter()
            .map(|message| {
                let (kind, content) = match message.role {
                    Role::User => (EntryKind::User, message.content.clone()),
                    Role::Assistant => (EntryKind::Assistant, message.content.clone()),
                    Role::System => (EntryKind::System, message.content.clone()),
                    Role::TypingPlaceholder if streaming_text.is_empty() => {
                        (EntryKind::Typing, String::new())
                    }
                    Role::TypingPlaceholder => (EntryKind::Streaming, streaming_text.to_string()),
                };
                RenderedEntry {
                    id: message.id,
                    kind,
                    content,
                }
            })
            .collect();

        Self {
            version,
            conversation_id: Some(state.conversation_id()),
            entries,
            hidden_count: paginator.hidden_count(messages),
            notice,
        }
    }

    /// Text of the in-progress assistant entry, if any.
    pub fn streaming_text(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.kind == EntryKind::Streaming)
            .map(|e| e.content.as_str())
    }

    pub fn last_entry(&self) -> Option<&RenderedEntry> {
        self.entries.last()
    }
}
