pub mod diagnostics_layer;
pub mod error_kind;
pub mod llm_service;
pub mod stream_worker;
pub mod title_generator;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use diagnostics_layer::{DiagnosticEntry, DiagnosticLevel, DiagnosticsLayer, DiagnosticsLog};
pub use error_kind::{ErrorKind, TransportError};
pub use llm_service::{
    ChatMessage, CompletionRequest, CompletionTransport, DeltaStream, OpenAiTransport,
    TransportConfig, check_connection,
};
pub use stream_worker::StreamWorker;
pub use title_generator::{generate_title, title_from_message};
