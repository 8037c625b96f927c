use std::sync::Arc;

use parking_lot::Mutex;

/// Single owner of the text produced so far for the in-flight assistant turn.
///
/// Clones share the same buffer. Every operation takes the one lock for its
/// whole duration, so a reader sees either the text before a merge or after
/// it, never a half-applied delta. No other lock is ever taken while this one
/// is held.
#[derive(Clone, Default)]
pub struct ResponseAccumulator {
    text: Arc<Mutex<String>>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `delta` and return the new full text.
    pub fn merge(&self, delta: &str) -> String {
        let mut text = self.text.lock();
        text.push_str(delta);
        text.clone()
    }

    /// Clear the buffer for a new stream.
    pub fn reset(&self) {
        self.text.lock().clear();
    }

    /// Replace the whole buffer. Used when the worker's authoritative full
    /// text disagrees with what was merged.
    pub fn replace(&self, full_text: &str) {
        let mut text = self.text.lock();
        text.clear();
        text.push_str(full_text);
    }

    pub fn snapshot(&self) -> String {
        self.text.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.text.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.lock().is_empty()
    }
}
