use super::message::Message;

pub const DEFAULT_VISIBLE_MESSAGES: usize = 100;
pub const MIN_VISIBLE_MESSAGES: usize = 10;

/// Last `limit` messages of `history`, in original order.
pub fn visible_window(history: &[Message], limit: usize) -> &[Message] {
    let start = history.len().saturating_sub(limit);
    &history[start..]
}

/// Bounds how many messages get materialized into the render surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagePaginator {
    limit: usize,
}

impl Default for MessagePaginator {
    fn default() -> Self {
        Self {
            limit: DEFAULT_VISIBLE_MESSAGES,
        }
    }
}

impl MessagePaginator {
    /// Limits below [`MIN_VISIBLE_MESSAGES`] are raised to it.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(MIN_VISIBLE_MESSAGES),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(MIN_VISIBLE_MESSAGES);
    }

    pub fn window<'a>(&self, history: &'a [Message]) -> &'a [Message] {
        visible_window(history, self.limit)
    }

    /// Number of messages left out of the window.
    pub fn hidden_count(&self, history: &[Message]) -> usize {
        history.len().saturating_sub(self.limit)
    }
}
