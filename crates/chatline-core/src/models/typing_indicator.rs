use tracing::debug;

use super::conversation_state::ConversationState;
use super::message::Message;

/// How far back from the tail `hide` looks for a placeholder.
pub const DEFAULT_TYPING_LOOKBACK: usize = 3;

/// Lifecycle of the transient "assistant is responding" entry.
#[derive(Debug, Clone, Copy)]
pub struct TypingIndicatorController {
    lookback: usize,
}

impl Default for TypingIndicatorController {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_LOOKBACK)
    }
}

impl TypingIndicatorController {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback: lookback.max(1),
        }
    }

    /// Append a placeholder unless one is already present.
    /// Returns whether the list changed.
    pub fn show(&self, state: &mut ConversationState) -> bool {
        if state.placeholder_count() > 0 {
            debug!(conv_id = %state.conversation_id(), "Typing indicator already shown");
            return false;
        }
        state.push_unchecked(Message::typing_placeholder());
        true
    }

    /// Remove the most recent placeholder within the lookback window.
    /// No-op when there is none. Returns whether the list changed.
    pub fn hide(&self, state: &mut ConversationState) -> bool {
        let len = state.len();
        let floor = len.saturating_sub(self.lookback);
        let found = (floor..len)
            .rev()
            .find(|&i| state.messages()[i].is_typing_placeholder());

        match found {
            Some(index) => {
                state.remove_at(index);
                debug!(conv_id = %state.conversation_id(), index, "Typing indicator removed");
                true
            }
            None => false,
        }
    }
}
