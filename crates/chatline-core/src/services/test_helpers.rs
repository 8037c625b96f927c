//! Deterministic [`CompletionTransport`] for tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error_kind::{ErrorKind, TransportError};
use super::llm_service::{CompletionRequest, CompletionTransport, DeltaStream};

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Delta(String),
    /// Sleep before the next step (tokio clock, so paused-clock tests advance it).
    Delay(Duration),
    Fail(TransportError),
    /// Never yield again; only cancellation ends the stream.
    Hang,
}

impl ScriptStep {
    pub fn delta(text: &str) -> Self {
        ScriptStep::Delta(text.to_string())
    }
}

enum Scripted {
    Stream(Vec<ScriptStep>),
    OpenError(TransportError),
}

/// Plays back queued scripts, one per `stream_completion` call, and records
/// every request it receives.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Scripted>>,
    completions: Mutex<VecDeque<Result<String, TransportError>>>,
    stream_requests: Mutex<Vec<CompletionRequest>>,
    complete_requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, steps: Vec<ScriptStep>) {
        self.scripts.lock().push_back(Scripted::Stream(steps));
    }

    pub fn push_open_error(&self, error: TransportError) {
        self.scripts.lock().push_back(Scripted::OpenError(error));
    }

    pub fn push_completion(&self, reply: Result<String, TransportError>) {
        self.completions.lock().push_back(reply);
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_requests.lock().len()
    }

    pub fn stream_requests(&self) -> Vec<CompletionRequest> {
        self.stream_requests.lock().clone()
    }

    pub fn complete_requests(&self) -> Vec<CompletionRequest> {
        self.complete_requests.lock().clone()
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<DeltaStream, TransportError> {
        self.stream_requests.lock().push(request);
        let scripted = self.scripts.lock().pop_front();
        let steps = match scripted {
            Some(Scripted::Stream(steps)) => steps,
            Some(Scripted::OpenError(e)) => return Err(e),
            None => {
                return Err(TransportError::new(
                    ErrorKind::Unknown,
                    "no script queued",
                ));
            }
        };

        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Delta(text) => yield Ok(text),
                    ScriptStep::Delay(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Fail(e) => {
                        yield Err(e);
                        return;
                    }
                    ScriptStep::Hang => futures::future::pending::<()>().await,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, TransportError> {
        self.complete_requests.lock().push(request);
        self.completions
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new(ErrorKind::Unknown, "no reply queued")))
    }
}
