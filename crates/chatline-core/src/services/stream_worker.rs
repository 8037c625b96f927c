use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::llm_service::{CompletionRequest, CompletionTransport};
use crate::models::{SessionId, StreamEvent, StreamEventKind};

/// Capacity of the worker → controller channel. Deltas apply back-pressure
/// to the network read once the controller falls this far behind.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Background task that reads one completion stream.
///
/// Emits zero or more `Delta`s followed by exactly one terminal event
/// (`Completed`, `Failed` or `Cancelled`). Never touches conversation
/// state; the controller owns everything the deltas feed into.
pub struct StreamWorker;

impl StreamWorker {
    pub fn spawn(
        transport: Arc<dyn CompletionTransport>,
        request: CompletionRequest,
        session_id: SessionId,
        cancel_token: CancellationToken,
    ) -> (mpsc::Receiver<StreamEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move {
            let terminal = Self::run(transport, request, session_id, &cancel_token, &tx).await;
            debug!(session = %session_id, event = ?terminal, "Stream worker finished");
            if tx
                .send(StreamEvent {
                    session_id,
                    kind: terminal,
                })
                .await
                .is_err()
            {
                debug!(session = %session_id, "Receiver dropped before terminal event");
            }
        });
        (rx, handle)
    }

    /// Drive the stream to its end and return the terminal event to emit.
    async fn run(
        transport: Arc<dyn CompletionTransport>,
        request: CompletionRequest,
        session_id: SessionId,
        cancel_token: &CancellationToken,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> StreamEventKind {
        if cancel_token.is_cancelled() {
            return StreamEventKind::Cancelled;
        }

        let opened = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return StreamEventKind::Cancelled,
            opened = transport.stream_completion(request) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(session = %session_id, kind = ?e.kind, error = %e.message, "Failed to open stream");
                return StreamEventKind::Failed {
                    kind: e.kind,
                    message: e.message,
                };
            }
        };

        let mut full_text = String::new();
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return StreamEventKind::Cancelled,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(delta)) => {
                    // A delta read after cancellation must not be forwarded.
                    if cancel_token.is_cancelled() {
                        return StreamEventKind::Cancelled;
                    }
                    full_text.push_str(&delta);
                    let event = StreamEvent {
                        session_id,
                        kind: StreamEventKind::Delta(delta),
                    };
                    if tx.send(event).await.is_err() {
                        debug!(session = %session_id, "Receiver dropped, stopping stream");
                        return StreamEventKind::Cancelled;
                    }
                }
                Some(Err(e)) => {
                    warn!(session = %session_id, kind = ?e.kind, error = %e.message, "Stream failed");
                    return StreamEventKind::Failed {
                        kind: e.kind,
                        message: e.message,
                    };
                }
                None => {
                    if cancel_token.is_cancelled() {
                        return StreamEventKind::Cancelled;
                    }
                    return StreamEventKind::Completed(full_text);
                }
            }
        }
    }
}
