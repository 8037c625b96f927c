use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::error_kind::{ErrorKind, TransportError};
use crate::models::Message;
use crate::settings::EngineSettings;

/// Stream of text deltas for one completion. Ends after the last delta;
/// an `Err` item is terminal.
pub type DeltaStream = BoxStream<'static, Result<String, TransportError>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// `None` for placeholders, which never reach the wire.
    pub fn from_message(message: &Message) -> Option<Self> {
        message
            .role
            .as_api_str()
            .map(|role| Self::new(role, message.content.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Build a request from conversation history, prepending the system prompt if any.
    pub fn from_history<'a>(
        settings: &EngineSettings,
        history: impl IntoIterator<Item = &'a Message>,
    ) -> Self {
        let mut messages = Vec::new();
        if let Some(prompt) = settings.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            messages.push(ChatMessage::new("system", prompt));
        }
        messages.extend(history.into_iter().filter_map(ChatMessage::from_message));

        Self {
            model: settings.model.clone(),
            messages,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    fn to_body(&self, stream: bool) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": self.messages,
            "temperature": self.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = Value::from(max_tokens);
        }
        body
    }
}

/// Source of completions. Implemented over HTTP by [`OpenAiTransport`].
#[async_trait]
pub trait CompletionTransport: Send + Sync + 'static {
    /// Open a streaming completion. Errors returned here happen before the
    /// first delta (connect, auth, bad status).
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<DeltaStream, TransportError>;

    /// Run a non-streaming completion and return the whole reply.
    async fn complete(&self, request: CompletionRequest) -> Result<String, TransportError>;
}

/// Round-trip a tiny non-streaming request to confirm the endpoint, key and
/// model are usable.
pub async fn check_connection(
    transport: &dyn CompletionTransport,
    model: &str,
) -> Result<(), TransportError> {
    let request = CompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::new("user", "ping")],
        temperature: 0.0,
        max_tokens: Some(5),
    };
    let reply = transport.complete(request).await?;
    debug!(len = reply.len(), "Connection check answered");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    pub api_key: String,
    pub verify_tls: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl From<&EngineSettings> for TransportConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
            verify_tls: settings.verify_tls,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            read_timeout: Duration::from_secs(settings.request_timeout_secs),
        }
    }
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone)]
pub struct OpenAiTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl OpenAiTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        if !config.verify_tls {
            warn!(base_url = %config.base_url, "TLS certificate verification disabled");
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn send(&self, body: Value) -> Result<reqwest::Response, TransportError> {
        let mut builder = self.client.post(self.endpoint()).json(&body);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let detail = api_error_message(&text).unwrap_or(text);
        let message = format!("HTTP {}: {}", status.as_u16(), detail.trim());
        let kind = ErrorKind::from_status(status.as_u16())
            .unwrap_or_else(|| ErrorKind::classify_message(&message));
        Err(TransportError::new(kind, message))
    }
}

#[async_trait]
impl CompletionTransport for OpenAiTransport {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<DeltaStream, TransportError> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Opening completion stream"
        );
        let response = self.send(request.to_body(true)).await?;
        let mut bytes = Box::pin(response.bytes_stream());

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(TransportError::from(e));
                        return;
                    }
                };
                for event in decoder.push(&chunk) {
                    match event {
                        SseEvent::Delta(text) => yield Ok(text),
                        SseEvent::Done => return,
                        SseEvent::Error(message) => {
                            yield Err(TransportError::classified(message));
                            return;
                        }
                    }
                }
            }
            for event in decoder.finish() {
                match event {
                    SseEvent::Delta(text) => yield Ok(text),
                    SseEvent::Done => return,
                    SseEvent::Error(message) => {
                        yield Err(TransportError::classified(message));
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, TransportError> {
        let response = self.send(request.to_body(false)).await?;
        let body: Value = response.json().await?;
        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::new(ErrorKind::Unknown, "Response contained no message content")
            })
    }
}

fn api_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
    Error(String),
}

/// Incremental decoder for `text/event-stream` completion bodies.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_sse_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated.
    fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_sse_line(&String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }
}

fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?.trim_start();

    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Skipping malformed SSE payload");
            return None;
        }
    };

    if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
        return Some(SseEvent::Error(message.to_string()));
    }

    value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(|text| SseEvent::Delta(text.to_string()))
}
