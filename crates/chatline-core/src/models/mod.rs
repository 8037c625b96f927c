pub mod conversation_state;
pub mod duplicate_guard;
pub mod message;
pub mod paginator;
pub mod render_version;
pub mod response_accumulator;
pub mod stream_session;
pub mod tag;
pub mod typing_indicator;

pub use conversation_state::{ConversationState, ConversationStateStore};
pub use duplicate_guard::DuplicateGuard;
pub use message::{
    ConversationId, ConversationSummary, Message, MessageId, NewMessage, Role, estimate_tokens,
};
pub use paginator::{MessagePaginator, visible_window};
pub use render_version::{RenderVersion, RenderVersionController};
pub use response_accumulator::ResponseAccumulator;
pub use stream_session::{SessionId, StreamEvent, StreamEventKind, StreamSession};
pub use tag::{Tag, TagId, normalize_tag_name};
pub use typing_indicator::TypingIndicatorController;
