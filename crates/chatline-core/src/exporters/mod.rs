pub mod conversation_exporter;
pub mod types;

pub use conversation_exporter::{collect_conversations, to_json, to_markdown, write_export};
pub use types::{ExportError, ExportFormat, ExportedConversation, ExportedMessage};
