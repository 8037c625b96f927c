use tracing::{debug, warn};

use super::duplicate_guard::DuplicateGuard;
use super::message::{ConversationId, Message};

/// Canonical in-memory record of the open conversation.
///
/// Always complete: pagination and rendering work on projections of this
/// list and never mutate it.
#[derive(Debug, Clone)]
pub struct ConversationState {
    conversation_id: ConversationId,
    messages: Vec<Message>,
    in_flight: bool,
}

impl ConversationState {
    pub fn new(conversation_id: ConversationId, messages: Vec<Message>) -> Self {
        Self {
            conversation_id,
            messages,
            in_flight: false,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
    }

    /// Whether `candidate` would pass the duplicate guard against the current tail.
    pub fn accepts(&self, candidate: &Message) -> bool {
        DuplicateGuard::should_append(candidate, &self.messages)
    }

    /// Append a message through the duplicate guard.
    /// Returns `false` (and leaves the list untouched) when the guard rejects it.
    pub fn append(&mut self, message: Message) -> bool {
        if !self.accepts(&message) {
            warn!(
                conv_id = %self.conversation_id,
                role = ?message.role,
                "Immediate duplicate detected, message ignored"
            );
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn placeholder_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.is_typing_placeholder())
            .count()
    }

    pub(crate) fn push_unchecked(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> Message {
        self.messages.remove(index)
    }

    /// Persisted, non-placeholder messages in order. This is what the
    /// transport sees as history.
    pub fn history(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| !m.is_typing_placeholder())
    }
}

/// Owner of the single active [`ConversationState`].
///
/// Only the orchestration thread holds a `&mut` to this store; background
/// workers never reach it.
#[derive(Debug, Default)]
pub struct ConversationStateStore {
    active: Option<ConversationState>,
}

impl ConversationStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `state` the active conversation, evicting the previous one from memory.
    pub fn open(&mut self, state: ConversationState) {
        if let Some(previous) = &self.active {
            debug!(
                from = %previous.conversation_id,
                to = %state.conversation_id,
                "Evicting conversation state"
            );
        }
        self.active = Some(state);
    }

    pub fn close(&mut self) -> Option<ConversationState> {
        self.active.take()
    }

    pub fn active(&self) -> Option<&ConversationState> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ConversationState> {
        self.active.as_mut()
    }

    pub fn active_id(&self) -> Option<ConversationId> {
        self.active.as_ref().map(|s| s.conversation_id)
    }

    pub fn is_active(&self, id: ConversationId) -> bool {
        self.active_id() == Some(id)
    }
}
