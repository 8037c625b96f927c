use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::message::ConversationId;
use super::response_accumulator::ResponseAccumulator;
use crate::services::error_kind::ErrorKind;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// What a [`StreamWorker`](crate::services::StreamWorker) reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventKind {
    Delta(String),
    Completed(String),
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

impl StreamEventKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEventKind::Delta(_))
    }
}

/// Event tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub session_id: SessionId,
    pub kind: StreamEventKind,
}

/// One outstanding completion for one conversation.
///
/// Owned by the controller; the worker only receives a clone of the cancel
/// token and the session id.
pub struct StreamSession {
    id: SessionId,
    conversation_id: ConversationId,
    cancel_token: CancellationToken,
    accumulator: ResponseAccumulator,
}

impl StreamSession {
    /// Start a session that writes into `accumulator`, which is cleared first.
    pub fn new(conversation_id: ConversationId, accumulator: ResponseAccumulator) -> Self {
        accumulator.reset();
        Self {
            id: SessionId::next(),
            conversation_id,
            cancel_token: CancellationToken::new(),
            accumulator,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn accumulator(&self) -> &ResponseAccumulator {
        &self.accumulator
    }

    pub fn cancel(&self) {
        debug!(session = %self.id, conv_id = %self.conversation_id, "Cancellation requested");
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}
