use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::exporters::{self, ExportError, ExportFormat};
use crate::models::{
    ConversationId, ConversationState, ConversationStateStore, ConversationSummary, Message,
    MessagePaginator, NewMessage, ResponseAccumulator, Role, SessionId, StreamEvent,
    StreamEventKind, StreamSession, Tag, TypingIndicatorController, normalize_tag_name,
};
use crate::render::{Notice, RenderFrame, RenderPipeline, RenderStats, RenderSurface};
use crate::repositories::{ConversationRepository, RepositoryError};
use crate::services::title_generator::DEFAULT_TITLE;
use crate::services::{
    CompletionRequest, CompletionTransport, ErrorKind, StreamWorker, TransportError,
    check_connection, generate_title, title_from_message,
};
use crate::settings::EngineSettings;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("No active conversation")]
    NoActiveConversation,

    #[error("Conversation {0} not found")]
    ConversationNotFound(ConversationId),

    #[error("Tag '{0}' not found")]
    TagNotFound(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Streaming,
    Finalizing,
    Cancelling,
    Failing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Started(SessionId),
    /// Input was blank.
    Empty,
    RateLimited,
    /// Same role and text as the last message.
    Duplicate,
    /// A response is still streaming.
    Busy,
    /// `retry` found no unanswered user message.
    NothingToRetry,
}

/// Once a session is cancelled its turn ends as `Cancelled`, even when the
/// worker had already queued `Completed` before it saw the token.
fn settle_after_cancel(event: StreamEvent, cancelled: bool) -> StreamEvent {
    match event.kind {
        StreamEventKind::Completed(text) if cancelled => {
            debug!(
                session = %event.session_id,
                discarded = text.len(),
                "Completed arrived after cancellation, discarding"
            );
            StreamEvent {
                session_id: event.session_id,
                kind: StreamEventKind::Cancelled,
            }
        }
        _ => event,
    }
}

fn not_found_as(error: RepositoryError, conversation_id: ConversationId) -> ControllerError {
    match error {
        RepositoryError::NotFound {
            entity: "Conversation",
            ..
        } => ControllerError::ConversationNotFound(conversation_id),
        other => other.into(),
    }
}

struct ActiveStream {
    session: StreamSession,
    events: mpsc::Receiver<StreamEvent>,
    handle: JoinHandle<()>,
}

/// Orchestrates one open conversation: submit, stream, render, persist.
///
/// Driven from a single task through `&mut self`. The stream worker runs
/// on its own task and only talks back through [`next_event`](Self::next_event).
pub struct ConversationController {
    settings: EngineSettings,
    repository: Arc<dyn ConversationRepository>,
    transport: Arc<dyn CompletionTransport>,
    store: ConversationStateStore,
    accumulator: ResponseAccumulator,
    typing: TypingIndicatorController,
    paginator: MessagePaginator,
    pipeline: RenderPipeline,
    state: ControllerState,
    stream: Option<ActiveStream>,
    notice: Option<Notice>,
    last_submit: Option<Instant>,
    last_render: Option<Instant>,
    render_pending: bool,
    /// Conversation created from its first message, awaiting a generated title.
    title_candidate: Option<(ConversationId, String)>,
    title_task: Option<JoinHandle<()>>,
}

impl ConversationController {
    pub fn new(
        settings: EngineSettings,
        repository: Arc<dyn ConversationRepository>,
        transport: Arc<dyn CompletionTransport>,
        surface: Arc<dyn RenderSurface>,
    ) -> Self {
        let settings = settings.normalized();
        Self {
            typing: TypingIndicatorController::new(settings.typing_lookback),
            paginator: MessagePaginator::new(settings.max_displayed_messages),
            settings,
            repository,
            transport,
            store: ConversationStateStore::new(),
            accumulator: ResponseAccumulator::new(),
            pipeline: RenderPipeline::new(surface),
            state: ControllerState::Idle,
            stream: None,
            notice: None,
            last_submit: None,
            last_render: None,
            render_pending: false,
            title_candidate: None,
            title_task: None,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.store.active_id()
    }

    pub fn conversation_state(&self) -> Option<&ConversationState> {
        self.store.active()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn dismiss_notice(&mut self) {
        if self.notice.take().is_some() {
            self.render_now();
        }
    }

    /// Text streamed so far for the in-flight response.
    pub fn streaming_text(&self) -> String {
        self.accumulator.snapshot()
    }

    pub fn visible_frame(&self) -> Option<Arc<RenderFrame>> {
        self.pipeline.visible_frame()
    }

    pub fn render_stats(&self) -> RenderStats {
        self.pipeline.stats()
    }

    // ---- submit / retry ----

    pub async fn submit(&mut self, text: &str) -> ControllerResult<SubmitOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SubmitOutcome::Empty);
        }

        let now = Instant::now();
        if self.is_rate_limited(now) {
            warn!("Submit rejected by rate limit");
            self.set_notice(Notice::warning("Please wait a moment before sending another message"));
            return Ok(SubmitOutcome::RateLimited);
        }

        if self.state != ControllerState::Idle {
            warn!(state = ?self.state, "Submit rejected, response in progress");
            self.set_notice(Notice::warning("A response is already in progress"));
            return Ok(SubmitOutcome::Busy);
        }

        let conversation_id = match self.store.active_id() {
            Some(id) => id,
            None => self.create_from_message(text).await?,
        };

        let candidate = Message::new(Role::User, text);
        let accepted = self
            .store
            .active()
            .is_some_and(|state| state.accepts(&candidate));
        if !accepted {
            warn!(conv_id = %conversation_id, "Duplicate submit ignored");
            self.set_notice(Notice::warning("Duplicate message ignored"));
            return Ok(SubmitOutcome::Duplicate);
        }

        let persisted = self
            .repository
            .append_message(conversation_id, NewMessage::new(Role::User, text))
            .await?;
        if let Some(state) = self.store.active_mut() {
            state.append(persisted);
        }
        self.last_submit = Some(now);

        let session_id = self.start_stream(conversation_id)?;
        Ok(SubmitOutcome::Started(session_id))
    }

    /// Re-stream the reply to the last user message after a failure or cancel.
    pub async fn retry(&mut self) -> ControllerResult<SubmitOutcome> {
        if self.state != ControllerState::Idle {
            return Ok(SubmitOutcome::Busy);
        }
        let conversation_id = self
            .store
            .active_id()
            .ok_or(ControllerError::NoActiveConversation)?;

        let unanswered = self
            .store
            .active()
            .and_then(|s| s.history().last())
            .is_some_and(|m| m.role == Role::User);
        if !unanswered {
            return Ok(SubmitOutcome::NothingToRetry);
        }

        let now = Instant::now();
        if self.is_rate_limited(now) {
            self.set_notice(Notice::warning("Please wait a moment before sending another message"));
            return Ok(SubmitOutcome::RateLimited);
        }
        self.last_submit = Some(now);

        info!(conv_id = %conversation_id, "Retrying last message");
        let session_id = self.start_stream(conversation_id)?;
        Ok(SubmitOutcome::Started(session_id))
    }

    fn is_rate_limited(&self, now: Instant) -> bool {
        self.last_submit
            .is_some_and(|last| now.duration_since(last) < self.settings.min_submit_interval())
    }

    async fn create_from_message(&mut self, text: &str) -> ControllerResult<ConversationId> {
        let summary = self
            .repository
            .create_conversation(&title_from_message(text))
            .await?;
        info!(conv_id = %summary.id, title = %summary.title, "Conversation created");
        self.open_state(ConversationState::new(summary.id, Vec::new()));
        self.title_candidate = Some((summary.id, text.to_string()));
        Ok(summary.id)
    }

    fn start_stream(&mut self, conversation_id: ConversationId) -> ControllerResult<SessionId> {
        let state = self
            .store
            .active_mut()
            .ok_or(ControllerError::NoActiveConversation)?;
        let request = CompletionRequest::from_history(&self.settings, state.history());

        let session = StreamSession::new(conversation_id, self.accumulator.clone());
        let session_id = session.id();
        let (events, handle) = StreamWorker::spawn(
            self.transport.clone(),
            request,
            session_id,
            session.cancel_token(),
        );

        self.typing.show(state);
        state.set_in_flight(true);
        self.stream = Some(ActiveStream {
            session,
            events,
            handle,
        });
        self.state = ControllerState::Streaming;
        self.notice = None;

        info!(conv_id = %conversation_id, session = %session_id, "Stream started");
        self.render_now();
        Ok(session_id)
    }

    // ---- stream events ----

    /// Wait for the next event of the active stream. `None` when nothing is streaming.
    ///
    /// While a throttled render is pending, an idle channel for one throttle
    /// interval flushes it.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            let throttle = self.settings.render_throttle();
            let render_pending = self.render_pending;
            let stream = self.stream.as_mut()?;
            let session_id = stream.session.id();

            let received = if render_pending {
                let waited = tokio::time::timeout(throttle, stream.events.recv()).await;
                match waited {
                    Ok(received) => received,
                    Err(_) => {
                        self.render_now();
                        continue;
                    }
                }
            } else {
                stream.events.recv().await
            };

            let event = received.unwrap_or_else(|| {
                // Worker gone without a terminal event (panicked or aborted).
                error!(session = %session_id, "Stream worker exited without a terminal event");
                let kind = if stream.session.is_cancelled() {
                    StreamEventKind::Cancelled
                } else {
                    StreamEventKind::Failed {
                        kind: ErrorKind::Unknown,
                        message: "The response stream stopped unexpectedly".to_string(),
                    }
                };
                StreamEvent { session_id, kind }
            });
            return Some(settle_after_cancel(event, stream.session.is_cancelled()));
        }
    }

    pub async fn handle_event(&mut self, event: StreamEvent) -> ControllerResult<()> {
        let current = self.stream.as_ref().map(|s| s.session.id());
        if current != Some(event.session_id) {
            debug!(session = %event.session_id, "Ignoring event from inactive session");
            return Ok(());
        }

        let cancelled = self.stream.as_ref().is_some_and(|s| s.session.is_cancelled());
        match settle_after_cancel(event, cancelled).kind {
            StreamEventKind::Delta(delta) => {
                if self.state != ControllerState::Streaming {
                    debug!(state = ?self.state, "Dropping delta after cancellation");
                    return Ok(());
                }
                self.accumulator.merge(&delta);
                self.request_render();
                Ok(())
            }
            StreamEventKind::Completed(full_text) => self.finalize(full_text).await,
            StreamEventKind::Cancelled => {
                self.finish_cancelled();
                Ok(())
            }
            StreamEventKind::Failed { kind, message } => {
                self.finish_failed(kind, &message);
                Ok(())
            }
        }
    }

    /// Drive the active stream to its terminal event. Returns every event handled.
    pub async fn run_until_idle(&mut self) -> ControllerResult<Vec<StreamEvent>> {
        let mut handled = Vec::new();
        while let Some(event) = self.next_event().await {
            self.handle_event(event.clone()).await?;
            handled.push(event);
        }
        Ok(handled)
    }

    /// Ask the worker to stop. The turn ends when its `Cancelled` arrives.
    pub fn cancel(&mut self) -> bool {
        match (&self.stream, self.state) {
            (Some(stream), ControllerState::Streaming) => {
                stream.session.cancel();
                self.state = ControllerState::Cancelling;
                true
            }
            _ => false,
        }
    }

    async fn finalize(&mut self, full_text: String) -> ControllerResult<()> {
        self.state = ControllerState::Finalizing;

        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let conversation_id = stream.session.conversation_id();

        if self.accumulator.snapshot() != full_text {
            warn!(
                conv_id = %conversation_id,
                merged = self.accumulator.len(),
                reported = full_text.len(),
                "Accumulated text diverged from worker text, using worker text"
            );
            self.accumulator.replace(&full_text);
        }

        // Placeholder goes first so the reply lands at the tail.
        if let Some(state) = self.store.active_mut() {
            self.typing.hide(state);
        }

        let saved = if full_text.trim().is_empty() {
            warn!(conv_id = %conversation_id, "Empty response, nothing to save");
            self.notice = Some(Notice::warning("The model returned an empty response"));
            Ok(())
        } else {
            match self
                .repository
                .append_message(conversation_id, NewMessage::new(Role::Assistant, &full_text))
                .await
            {
                Ok(message) => {
                    if let Some(state) = self.store.active_mut() {
                        state.append(message);
                    }
                    self.spawn_title_task(conversation_id);
                    Ok(())
                }
                Err(e) => {
                    error!(conv_id = %conversation_id, error = %e, "Failed to save response");
                    self.notice = Some(Notice::from_failure(ErrorKind::Unknown, &e.to_string()));
                    Err(e.into())
                }
            }
        };

        self.end_turn();
        info!(conv_id = %conversation_id, len = full_text.len(), "Stream completed");
        saved
    }

    fn finish_cancelled(&mut self) {
        if let Some(stream) = self.stream.take() {
            info!(
                conv_id = %stream.session.conversation_id(),
                discarded = self.accumulator.len(),
                "Stream cancelled, partial response discarded"
            );
        }
        self.end_turn();
    }

    fn finish_failed(&mut self, kind: ErrorKind, message: &str) {
        self.state = ControllerState::Failing;
        if let Some(stream) = self.stream.take() {
            warn!(
                conv_id = %stream.session.conversation_id(),
                kind = ?kind,
                error = %message,
                "Stream failed"
            );
        }
        self.notice = Some(Notice::from_failure(kind, message));
        self.end_turn();
    }

    /// Common tail of every terminal transition.
    fn end_turn(&mut self) {
        if let Some(state) = self.store.active_mut() {
            self.typing.hide(state);
            state.set_in_flight(false);
        }
        self.accumulator.reset();
        self.state = ControllerState::Idle;
        self.render_now();
    }

    /// Cancel the active stream and wait for its terminal event, so no writer
    /// outlives the conversation it belongs to. Errors settling the stream are
    /// logged, not returned.
    async fn stop_active_stream(&mut self) {
        let wait = self.settings.worker_wait_timeout();
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        stream.session.cancel();
        self.state = ControllerState::Cancelling;

        let terminal = tokio::time::timeout(wait, async {
            while let Some(event) = stream.events.recv().await {
                if event.kind.is_terminal() {
                    return Some(event);
                }
            }
            None
        })
        .await;

        match terminal {
            Ok(Some(event)) => {
                if let Err(e) = self.handle_event(event).await {
                    error!(error = %e, "Failed to settle stopped stream, continuing");
                }
            }
            Ok(None) | Err(_) => {
                if let Some(stream) = self.stream.take() {
                    warn!(
                        session = %stream.session.id(),
                        "Stream worker did not stop in time, aborting"
                    );
                    stream.handle.abort();
                }
                self.end_turn();
            }
        }
    }

    // ---- rendering ----

    fn set_notice(&mut self, notice: Notice) {
        self.notice = Some(notice);
        self.render_now();
    }

    fn request_render(&mut self) {
        let throttle = self.settings.render_throttle();
        match self.last_render {
            Some(at) if at.elapsed() < throttle => self.render_pending = true,
            _ => self.render_now(),
        }
    }

    fn render_now(&mut self) {
        self.render_pending = false;
        self.last_render = Some(Instant::now());

        let streaming_text = self.accumulator.snapshot();
        let notice = self.notice.clone();
        let paginator = self.paginator;
        let active = self.store.active();
        self.pipeline.schedule(|version| match active {
            Some(state) => RenderFrame::project(version, state, &paginator, &streaming_text, notice),
            None => RenderFrame::empty(version, notice),
        });
    }

    fn open_state(&mut self, state: ConversationState) {
        self.store.open(state);
        self.pipeline.reset();
        self.accumulator.reset();
        self.notice = None;
        self.title_candidate = None;
    }

    // ---- titles ----

    fn spawn_title_task(&mut self, conversation_id: ConversationId) {
        let Some((candidate_id, first_message)) = self.title_candidate.take() else {
            return;
        };
        if candidate_id != conversation_id {
            return;
        }
        if !self.settings.auto_title {
            return;
        }

        let transport = self.transport.clone();
        let repository = self.repository.clone();
        let model = self.settings.model.clone();
        self.title_task = Some(tokio::spawn(async move {
            match generate_title(transport.as_ref(), &model, &first_message).await {
                Ok(Some(title)) => match repository.rename_conversation(conversation_id, &title).await {
                    Ok(()) => info!(conv_id = %conversation_id, title = %title, "Conversation titled"),
                    Err(e) => warn!(conv_id = %conversation_id, error = %e, "Failed to save generated title"),
                },
                Ok(None) => debug!(conv_id = %conversation_id, "Title generation returned nothing"),
                Err(e) => warn!(conv_id = %conversation_id, error = %e, "Title generation failed"),
            }
        }));
    }

    /// Wait for a pending title task, if any.
    pub async fn join_title_task(&mut self) {
        if let Some(task) = self.title_task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Title task ended abnormally");
        }
    }

    // ---- conversation management ----

    /// Leave the current conversation. The next submit creates a new one.
    pub async fn new_conversation(&mut self) -> ControllerResult<()> {
        self.stop_active_stream().await;
        if let Some(previous) = self.store.close() {
            debug!(conv_id = %previous.conversation_id(), "Conversation closed");
        }
        self.pipeline.reset();
        self.notice = None;
        self.title_candidate = None;
        self.render_now();
        Ok(())
    }

    pub async fn open_conversation(
        &mut self,
        conversation_id: ConversationId,
    ) -> ControllerResult<ConversationSummary> {
        let summary = self
            .repository
            .get_conversation(conversation_id)
            .await?
            .ok_or(ControllerError::ConversationNotFound(conversation_id))?;

        self.stop_active_stream().await;
        let messages = self.repository.load_messages(conversation_id).await?;
        info!(
            conv_id = %conversation_id,
            messages = messages.len(),
            "Conversation opened"
        );
        self.open_state(ConversationState::new(conversation_id, messages));
        self.render_now();
        Ok(summary)
    }

    pub async fn delete_conversation(&mut self, conversation_id: ConversationId) -> ControllerResult<()> {
        if self.store.is_active(conversation_id) {
            self.stop_active_stream().await;
            self.store.close();
            self.pipeline.reset();
            self.notice = None;
            self.title_candidate = None;
        }
        self.repository
            .delete_conversation(conversation_id)
            .await
            .map_err(|e| not_found_as(e, conversation_id))?;
        info!(conv_id = %conversation_id, "Conversation deleted");
        self.render_now();
        Ok(())
    }

    pub async fn rename_conversation(
        &mut self,
        conversation_id: ConversationId,
        title: &str,
    ) -> ControllerResult<()> {
        let title = match title.trim() {
            "" => DEFAULT_TITLE,
            trimmed => trimmed,
        };
        self.repository
            .rename_conversation(conversation_id, title)
            .await
            .map_err(|e| not_found_as(e, conversation_id))?;
        // A manual title wins over a pending generated one.
        if self
            .title_candidate
            .as_ref()
            .is_some_and(|(id, _)| *id == conversation_id)
        {
            self.title_candidate = None;
        }
        Ok(())
    }

    pub async fn list_conversations(&self) -> ControllerResult<Vec<ConversationSummary>> {
        Ok(self.repository.list_conversations().await?)
    }

    pub async fn search(&self, query: &str) -> ControllerResult<Vec<ConversationSummary>> {
        Ok(self.repository.search(query).await?)
    }

    /// Export the given conversations (all when `ids` is `None`) to `path`.
    pub async fn export(
        &self,
        path: &Path,
        format: ExportFormat,
        ids: Option<&[ConversationId]>,
    ) -> ControllerResult<usize> {
        let conversations = exporters::collect_conversations(self.repository.as_ref(), ids).await?;
        Ok(exporters::write_export(path, format, &conversations).await?)
    }

    /// Token estimate of everything stored in a conversation.
    pub async fn token_total(&self, conversation_id: ConversationId) -> ControllerResult<usize> {
        self.repository
            .conversation_token_total(conversation_id)
            .await
            .map_err(|e| not_found_as(e, conversation_id))
    }

    /// Confirm the configured endpoint answers a minimal completion.
    pub async fn test_connection(&self) -> ControllerResult<()> {
        match check_connection(self.transport.as_ref(), &self.settings.model).await {
            Ok(()) => {
                info!(model = %self.settings.model, "Connection check passed");
                Ok(())
            }
            Err(e) => {
                warn!(kind = ?e.kind, error = %e.message, "Connection check failed");
                Err(e.into())
            }
        }
    }

    // ---- tags ----

    pub async fn list_tags(&self) -> ControllerResult<Vec<Tag>> {
        Ok(self.repository.list_tags().await?)
    }

    async fn find_tag(&self, name: &str) -> ControllerResult<Option<Tag>> {
        let Some(name) = normalize_tag_name(name) else {
            return Ok(None);
        };
        let tags = self.repository.list_tags().await?;
        Ok(tags.into_iter().find(|t| t.name == name))
    }

    /// Attach the tag named `name`, creating it on first use.
    pub async fn tag_conversation(
        &self,
        conversation_id: ConversationId,
        name: &str,
    ) -> ControllerResult<Tag> {
        let tag = self.repository.create_tag(name).await?;
        self.repository
            .tag_conversation(conversation_id, tag.id)
            .await
            .map_err(|e| not_found_as(e, conversation_id))?;
        info!(conv_id = %conversation_id, tag = %tag.name, "Conversation tagged");
        Ok(tag)
    }

    pub async fn untag_conversation(
        &self,
        conversation_id: ConversationId,
        name: &str,
    ) -> ControllerResult<()> {
        let tag = self
            .find_tag(name)
            .await?
            .ok_or_else(|| ControllerError::TagNotFound(name.trim().to_string()))?;
        self.repository
            .untag_conversation(conversation_id, tag.id)
            .await?;
        Ok(())
    }

    pub async fn conversation_tags(&self, conversation_id: ConversationId) -> ControllerResult<Vec<Tag>> {
        Ok(self.repository.conversation_tags(conversation_id).await?)
    }

    /// Conversations carrying the tag named `name`. Unknown names match nothing.
    pub async fn conversations_with_tag(&self, name: &str) -> ControllerResult<Vec<ConversationSummary>> {
        match self.find_tag(name).await? {
            Some(tag) => Ok(self.repository.conversations_with_tag(tag.id).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn delete_tag(&self, name: &str) -> ControllerResult<()> {
        let tag = self
            .find_tag(name)
            .await?
            .ok_or_else(|| ControllerError::TagNotFound(name.trim().to_string()))?;
        self.repository.delete_tag(tag.id).await?;
        info!(tag = %tag.name, "Tag deleted");
        Ok(())
    }

    /// Stop streaming and release the active conversation.
    pub async fn close(&mut self) -> ControllerResult<()> {
        self.stop_active_stream().await;
        if let Some(task) = self.title_task.take() {
            task.abort();
        }
        self.store.close();
        self.pipeline.reset();
        Ok(())
    }
}
