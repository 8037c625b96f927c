use std::sync::Arc;
use std::time::Duration;

use super::conversation_controller::{ControllerError, ControllerState, ConversationController, SubmitOutcome};
use crate::models::{
    ConversationId, ConversationSummary, Message, NewMessage, Role, SessionId, StreamEvent,
    StreamEventKind, Tag, TagId,
};
use crate::render::test_helpers::{DeferredSurface, ImmediateSurface};
use crate::render::{EntryKind, NoticeLevel, RenderSurface};
use crate::repositories::{
    BoxFuture, ConversationRepository, InMemoryConversationRepository, RepositoryError,
    RepositoryResult,
};
use crate::services::test_helpers::{ScriptStep, ScriptedTransport};
use crate::services::{ErrorKind, TransportError};
use crate::settings::EngineSettings;

fn test_settings() -> EngineSettings {
    EngineSettings {
        min_submit_interval_ms: 0,
        auto_title: false,
        ..EngineSettings::default()
    }
}

struct Harness {
    controller: ConversationController,
    repo: Arc<InMemoryConversationRepository>,
    transport: Arc<ScriptedTransport>,
}

fn harness_with(settings: EngineSettings, surface: Arc<dyn RenderSurface>) -> Harness {
    let repo = Arc::new(InMemoryConversationRepository::new());
    let transport = Arc::new(ScriptedTransport::new());
    let controller = ConversationController::new(settings, repo.clone(), transport.clone(), surface);
    Harness {
        controller,
        repo,
        transport,
    }
}

fn harness() -> Harness {
    harness_with(test_settings(), Arc::new(ImmediateSurface::new()))
}

async fn persisted(repo: &InMemoryConversationRepository, id: ConversationId) -> Vec<(Role, String)> {
    repo.load_messages(id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| (m.role, m.content))
        .collect()
}

fn count_kind(events: &[StreamEvent], pred: impl Fn(&StreamEventKind) -> bool) -> usize {
    events.iter().filter(|e| pred(&e.kind)).count()
}

#[tokio::test(start_paused = true)]
async fn test_completed_stream_persists_accumulated_text() {
    let mut h = harness();
    h.transport.push_script(vec![
        ScriptStep::delta("Hel"),
        ScriptStep::delta("lo"),
        ScriptStep::delta(" world"),
    ]);

    let outcome = h.controller.submit("Hi").await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Started(_)));
    assert_eq!(h.controller.state(), ControllerState::Streaming);

    let events = h.controller.run_until_idle().await.unwrap();
    assert_eq!(count_kind(&events, |k| matches!(k, StreamEventKind::Delta(_))), 3);
    assert!(matches!(
        events.last().map(|e| &e.kind),
        Some(StreamEventKind::Completed(text)) if text == "Hello world"
    ));

    let id = h.controller.active_conversation().unwrap();
    assert_eq!(
        persisted(&h.repo, id).await,
        vec![
            (Role::User, "Hi".to_string()),
            (Role::Assistant, "Hello world".to_string()),
        ]
    );

    let state = h.controller.conversation_state().unwrap();
    assert_eq!(state.len(), 2);
    assert_eq!(state.placeholder_count(), 0);
    assert!(!state.in_flight());
    assert_eq!(h.controller.state(), ControllerState::Idle);
    assert!(h.controller.streaming_text().is_empty());

    let frame = h.controller.visible_frame().unwrap();
    let last = frame.last_entry().unwrap();
    assert_eq!(last.kind, EntryKind::Assistant);
    assert_eq!(last.content, "Hello world");
}

#[tokio::test(start_paused = true)]
async fn test_single_placeholder_and_throttled_streaming_frame() {
    let mut h = harness();
    h.transport.push_script(vec![
        ScriptStep::delta("a"),
        ScriptStep::Delay(Duration::from_millis(50)),
        ScriptStep::delta("b"),
    ]);

    h.controller.submit("question").await.unwrap();
    assert_eq!(h.controller.conversation_state().unwrap().placeholder_count(), 1);
    let frame = h.controller.visible_frame().unwrap();
    assert_eq!(frame.last_entry().unwrap().kind, EntryKind::Typing);

    let first = h.controller.next_event().await.unwrap();
    h.controller.handle_event(first).await.unwrap();

    // The pending render is flushed while the worker sleeps.
    let second = h.controller.next_event().await.unwrap();
    let frame = h.controller.visible_frame().unwrap();
    assert_eq!(frame.streaming_text(), Some("a"));
    assert_eq!(h.controller.conversation_state().unwrap().placeholder_count(), 1);

    let busy = h.controller.submit("another").await.unwrap();
    assert_eq!(busy, SubmitOutcome::Busy);
    assert_eq!(h.controller.conversation_state().unwrap().placeholder_count(), 1);

    h.controller.handle_event(second).await.unwrap();
    h.controller.run_until_idle().await.unwrap();

    let state = h.controller.conversation_state().unwrap();
    assert_eq!(state.placeholder_count(), 0);
    assert_eq!(state.last().unwrap().content, "ab");
}

#[tokio::test(start_paused = true)]
async fn test_reverse_order_completions_apply_only_newest() {
    let surface = Arc::new(DeferredSurface::new());
    let mut h = harness_with(test_settings(), surface.clone());
    h.transport.push_script(vec![
        ScriptStep::delta("a"),
        ScriptStep::Delay(Duration::from_millis(20)),
        ScriptStep::delta("b"),
        ScriptStep::Delay(Duration::from_millis(20)),
        ScriptStep::delta("c"),
    ]);

    h.controller.submit("go").await.unwrap();
    h.controller.run_until_idle().await.unwrap();
    assert!(h.controller.visible_frame().is_none());

    let scheduled = surface.pending();
    assert!(scheduled >= 3, "expected several renders, got {scheduled}");

    let applied = surface.resolve_reverse();
    assert_eq!(applied, 1);

    let stats = h.controller.render_stats();
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.discarded as usize, scheduled - 1);

    let newest = surface.painted().last().cloned().unwrap();
    let visible = h.controller.visible_frame().unwrap();
    assert_eq!(visible.version, newest.version);
    assert_eq!(visible.last_entry().unwrap().content, "abc");
}

#[tokio::test(start_paused = true)]
async fn test_long_conversation_renders_trailing_window() {
    let mut h = harness();
    let conv = h.repo.create_conversation("Long").await.unwrap();
    for i in 0..250 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        h.repo
            .append_message(conv.id, NewMessage::new(role, format!("message {i}")))
            .await
            .unwrap();
    }

    h.controller.open_conversation(conv.id).await.unwrap();

    assert_eq!(h.controller.conversation_state().unwrap().len(), 250);
    let frame = h.controller.visible_frame().unwrap();
    assert_eq!(frame.entries.len(), 100);
    assert_eq!(frame.hidden_count, 150);
    assert_eq!(frame.entries[0].content, "message 150");
    assert_eq!(frame.last_entry().unwrap().content, "message 249");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_discards_partial_response() {
    let mut h = harness();
    h.transport
        .push_script(vec![ScriptStep::delta("partial"), ScriptStep::Hang]);

    h.controller.submit("tell me a story").await.unwrap();
    let first = h.controller.next_event().await.unwrap();
    h.controller.handle_event(first).await.unwrap();
    assert_eq!(h.controller.streaming_text(), "partial");

    assert!(h.controller.cancel());
    assert_eq!(h.controller.state(), ControllerState::Cancelling);
    assert!(!h.controller.cancel());

    let events = h.controller.run_until_idle().await.unwrap();
    assert_eq!(count_kind(&events, |k| matches!(k, StreamEventKind::Cancelled)), 1);
    assert_eq!(count_kind(&events, |k| matches!(k, StreamEventKind::Completed(_))), 0);

    let id = h.controller.active_conversation().unwrap();
    assert_eq!(
        persisted(&h.repo, id).await,
        vec![(Role::User, "tell me a story".to_string())]
    );
    let state = h.controller.conversation_state().unwrap();
    assert_eq!(state.placeholder_count(), 0);
    assert!(!state.in_flight());
    assert_eq!(h.controller.state(), ControllerState::Idle);
    assert!(h.controller.streaming_text().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_rejects_before_spawning_worker() {
    let settings = EngineSettings {
        auto_title: false,
        ..EngineSettings::default()
    };
    let mut h = harness_with(settings, Arc::new(ImmediateSurface::new()));
    h.transport.push_script(vec![ScriptStep::Hang]);
    h.transport.push_script(vec![ScriptStep::delta("ok")]);

    assert!(matches!(
        h.controller.submit("first").await.unwrap(),
        SubmitOutcome::Started(_)
    ));
    // Rate limit is checked before the busy check.
    assert_eq!(
        h.controller.submit("second").await.unwrap(),
        SubmitOutcome::RateLimited
    );
    assert_eq!(h.transport.stream_calls(), 1);
    assert!(h.controller.notice().is_some());

    tokio::time::advance(Duration::from_millis(1001)).await;
    assert_eq!(h.controller.submit("second").await.unwrap(), SubmitOutcome::Busy);

    h.controller.cancel();
    h.controller.run_until_idle().await.unwrap();

    // A rejected submit does not restart the interval.
    assert!(matches!(
        h.controller.submit("second").await.unwrap(),
        SubmitOutcome::Started(_)
    ));
    assert_eq!(h.transport.stream_calls(), 2);
    h.controller.run_until_idle().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failure_shows_notice_and_retry_recovers() {
    let mut h = harness();
    h.transport
        .push_open_error(TransportError::new(ErrorKind::Auth, "Invalid API key"));

    h.controller.submit("hello").await.unwrap();
    let events = h.controller.run_until_idle().await.unwrap();
    assert!(matches!(
        events.last().map(|e| &e.kind),
        Some(StreamEventKind::Failed { kind: ErrorKind::Auth, .. })
    ));

    let notice = h.controller.notice().unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.title, ErrorKind::Auth.title());
    assert_eq!(notice.detail.as_deref(), Some("Invalid API key"));

    let id = h.controller.active_conversation().unwrap();
    assert_eq!(persisted(&h.repo, id).await.len(), 1);
    assert_eq!(h.controller.conversation_state().unwrap().placeholder_count(), 0);
    assert_eq!(h.controller.state(), ControllerState::Idle);

    // Re-sending the same text is caught by the duplicate guard.
    assert_eq!(h.controller.submit("hello").await.unwrap(), SubmitOutcome::Duplicate);
    assert_eq!(persisted(&h.repo, id).await.len(), 1);

    h.transport.push_script(vec![ScriptStep::delta("Hi there")]);
    assert!(matches!(
        h.controller.retry().await.unwrap(),
        SubmitOutcome::Started(_)
    ));
    assert!(h.controller.notice().is_none());
    h.controller.run_until_idle().await.unwrap();

    assert_eq!(
        persisted(&h.repo, id).await,
        vec![
            (Role::User, "hello".to_string()),
            (Role::Assistant, "Hi there".to_string()),
        ]
    );
    assert_eq!(h.controller.retry().await.unwrap(), SubmitOutcome::NothingToRetry);
}

#[tokio::test(start_paused = true)]
async fn test_mid_stream_failure_saves_nothing() {
    let mut h = harness();
    h.transport.push_script(vec![
        ScriptStep::delta("par"),
        ScriptStep::Fail(TransportError::new(ErrorKind::Network, "connection reset")),
    ]);

    h.controller.submit("q").await.unwrap();
    h.controller.run_until_idle().await.unwrap();

    let id = h.controller.active_conversation().unwrap();
    assert_eq!(persisted(&h.repo, id).await, vec![(Role::User, "q".to_string())]);
    assert_eq!(h.controller.notice().unwrap().title, ErrorKind::Network.title());
    assert!(h.controller.streaming_text().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_completion_is_not_saved() {
    let mut h = harness();
    h.transport.push_script(Vec::new());

    h.controller.submit("q").await.unwrap();
    h.controller.run_until_idle().await.unwrap();

    let id = h.controller.active_conversation().unwrap();
    assert_eq!(persisted(&h.repo, id).await.len(), 1);
    assert_eq!(h.controller.notice().unwrap().level, NoticeLevel::Warning);
}

#[tokio::test(start_paused = true)]
async fn test_blank_submit_is_ignored() {
    let mut h = harness();
    assert_eq!(h.controller.submit("   \n").await.unwrap(), SubmitOutcome::Empty);
    assert!(h.controller.active_conversation().is_none());
    assert_eq!(h.transport.stream_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_switching_conversation_stops_stream() {
    let mut h = harness();
    let other = h.repo.create_conversation("Other").await.unwrap();
    h.repo
        .append_message(other.id, NewMessage::new(Role::User, "earlier"))
        .await
        .unwrap();

    h.transport
        .push_script(vec![ScriptStep::delta("x"), ScriptStep::Hang]);
    h.controller.submit("hi").await.unwrap();
    let streaming_id = h.controller.active_conversation().unwrap();
    let delta = h.controller.next_event().await.unwrap();
    h.controller.handle_event(delta).await.unwrap();

    let summary = h.controller.open_conversation(other.id).await.unwrap();
    assert_eq!(summary.title, "Other");
    assert_eq!(h.controller.active_conversation(), Some(other.id));
    assert!(!h.controller.is_streaming());
    assert_eq!(h.controller.state(), ControllerState::Idle);
    assert!(h.controller.next_event().await.is_none());

    let state = h.controller.conversation_state().unwrap();
    assert_eq!(state.len(), 1);
    assert_eq!(state.placeholder_count(), 0);
    assert_eq!(persisted(&h.repo, streaming_id).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_from_other_sessions_are_ignored() {
    let mut h = harness();
    h.transport.push_script(vec![ScriptStep::Hang]);
    h.controller.submit("q").await.unwrap();

    let stray = StreamEvent {
        session_id: SessionId::next(),
        kind: StreamEventKind::Completed("stray".to_string()),
    };
    h.controller.handle_event(stray).await.unwrap();
    assert_eq!(h.controller.state(), ControllerState::Streaming);

    h.controller.cancel();
    h.controller.run_until_idle().await.unwrap();
    let id = h.controller.active_conversation().unwrap();
    assert_eq!(persisted(&h.repo, id).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_exchange_generates_title() {
    let settings = EngineSettings {
        min_submit_interval_ms: 0,
        ..EngineSettings::default()
    };
    let mut h = harness_with(settings, Arc::new(ImmediateSurface::new()));
    h.transport.push_script(vec![ScriptStep::delta("Sure.")]);
    h.transport
        .push_completion(Ok("\"Rust Lifetimes\"".to_string()));

    h.controller.submit("Explain lifetimes in Rust").await.unwrap();
    let id = h.controller.active_conversation().unwrap();
    let provisional = h.repo.get_conversation(id).await.unwrap().unwrap();
    assert_eq!(provisional.title, "Explain lifetimes in Rust");

    h.controller.run_until_idle().await.unwrap();
    h.controller.join_title_task().await;

    let titled = h.repo.get_conversation(id).await.unwrap().unwrap();
    assert_eq!(titled.title, "Rust Lifetimes");
    assert_eq!(h.transport.complete_requests().len(), 1);

    // Later exchanges keep the title.
    h.transport.push_script(vec![ScriptStep::delta("More.")]);
    h.controller.submit("And borrowing?").await.unwrap();
    h.controller.run_until_idle().await.unwrap();
    h.controller.join_title_task().await;
    assert_eq!(h.transport.complete_requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_conversation_is_created_on_next_submit() {
    let mut h = harness();
    h.transport.push_script(vec![ScriptStep::delta("one")]);
    h.controller.submit("first topic").await.unwrap();
    h.controller.run_until_idle().await.unwrap();
    let first = h.controller.active_conversation().unwrap();

    h.controller.new_conversation().await.unwrap();
    assert!(h.controller.active_conversation().is_none());
    assert_eq!(h.controller.list_conversations().await.unwrap().len(), 1);

    h.transport.push_script(vec![ScriptStep::delta("two")]);
    h.controller.submit("second topic").await.unwrap();
    h.controller.run_until_idle().await.unwrap();
    let second = h.controller.active_conversation().unwrap();
    assert_ne!(first, second);

    let found = h.controller.search("second").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, second);
}

#[tokio::test(start_paused = true)]
async fn test_delete_active_conversation_while_streaming() {
    let mut h = harness();
    h.transport.push_script(vec![ScriptStep::Hang]);
    h.controller.submit("doomed").await.unwrap();
    let id = h.controller.active_conversation().unwrap();

    h.controller.delete_conversation(id).await.unwrap();
    assert!(h.controller.active_conversation().is_none());
    assert!(!h.controller.is_streaming());
    assert!(h.repo.get_conversation(id).await.unwrap().is_none());

    let missing = h.controller.delete_conversation(id).await;
    assert!(matches!(missing, Err(ControllerError::ConversationNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_rename_and_open_missing() {
    let mut h = harness();
    let conv = h.repo.create_conversation("Old").await.unwrap();

    h.controller.rename_conversation(conv.id, "  New name ").await.unwrap();
    let renamed = h.repo.get_conversation(conv.id).await.unwrap().unwrap();
    assert_eq!(renamed.title, "New name");

    let missing = h.controller.open_conversation(ConversationId(999)).await;
    assert!(matches!(missing, Err(ControllerError::ConversationNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_export_writes_all_conversations() {
    let mut h = harness();
    h.transport.push_script(vec![ScriptStep::delta("Answer")]);
    h.controller.submit("Question").await.unwrap();
    h.controller.run_until_idle().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chats.json");
    let count = h
        .controller
        .export(&path, crate::exporters::ExportFormat::Json, None)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let json: serde_json::Value =
        serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
    assert_eq!(json["conversations"][0]["messages"][1]["content"], "Answer");
}

/// Lets the worker task run to completion without the controller reading its events.
async fn let_worker_finish() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_worker_finished_discards_reply() {
    let mut h = harness();
    h.transport
        .push_script(vec![ScriptStep::delta("full"), ScriptStep::delta(" answer")]);

    h.controller.submit("question").await.unwrap();
    let_worker_finish().await;

    // Completed is already queued, but nothing has been handled yet.
    assert!(h.controller.cancel());
    let events = h.controller.run_until_idle().await.unwrap();
    assert_eq!(count_kind(&events, |k| matches!(k, StreamEventKind::Cancelled)), 1);
    assert_eq!(count_kind(&events, |k| matches!(k, StreamEventKind::Completed(_))), 0);

    let id = h.controller.active_conversation().unwrap();
    assert_eq!(
        persisted(&h.repo, id).await,
        vec![(Role::User, "question".to_string())]
    );
    assert_eq!(h.controller.state(), ControllerState::Idle);
    assert_eq!(h.controller.conversation_state().unwrap().placeholder_count(), 0);
    assert!(h.controller.streaming_text().is_empty());
    assert!(h.controller.notice().is_none());

    // The discarded reply can be requested again.
    h.transport.push_script(vec![ScriptStep::delta("again")]);
    assert!(matches!(
        h.controller.retry().await.unwrap(),
        SubmitOutcome::Started(_)
    ));
    h.controller.run_until_idle().await.unwrap();
    assert_eq!(persisted(&h.repo, id).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_interleaved_resolution_never_moves_backwards() {
    let surface = Arc::new(DeferredSurface::new());
    let mut h = harness_with(test_settings(), surface.clone());
    let mut script = Vec::new();
    for word in ["one ", "two ", "three ", "four ", "five"] {
        script.push(ScriptStep::delta(word));
        script.push(ScriptStep::Delay(Duration::from_millis(20)));
    }
    h.transport.push_script(script);

    h.controller.submit("count").await.unwrap();

    let mut newest_seen = None;
    let mut step = 0usize;
    while let Some(event) = h.controller.next_event().await {
        h.controller.handle_event(event).await.unwrap();
        if step % 2 == 0 {
            surface.resolve_in_order();
        } else {
            surface.resolve_reverse();
        }
        step += 1;

        if let Some(frame) = h.controller.visible_frame() {
            if let Some(previous) = newest_seen {
                assert!(
                    frame.version >= previous,
                    "visible frame went from {previous:?} back to {:?}",
                    frame.version
                );
            }
            newest_seen = Some(frame.version);
        }
    }
    surface.resolve_reverse();

    let stats = h.controller.render_stats();
    assert!(stats.applied >= 2, "expected several applied frames, got {stats:?}");
    let visible = h.controller.visible_frame().unwrap();
    assert!(newest_seen.is_none_or(|seen| visible.version >= seen));
    let last = visible.last_entry().unwrap();
    assert_eq!(last.kind, EntryKind::Assistant);
    assert_eq!(last.content, "one two three four five");

    let id = h.controller.active_conversation().unwrap();
    assert_eq!(
        persisted(&h.repo, id).await.last().map(|(_, text)| text.clone()),
        Some("one two three four five".to_string())
    );
}

/// Delegates to an in-memory store but refuses to save assistant replies.
struct RejectingAssistantRepository {
    inner: InMemoryConversationRepository,
}

impl ConversationRepository for RejectingAssistantRepository {
    fn create_conversation(&self, title: &str) -> BoxFuture<'static, RepositoryResult<ConversationSummary>> {
        self.inner.create_conversation(title)
    }

    fn append_message(
        &self,
        conversation_id: ConversationId,
        message: NewMessage,
    ) -> BoxFuture<'static, RepositoryResult<Message>> {
        if message.role == Role::Assistant {
            return Box::pin(async {
                Err(RepositoryError::InvalidData {
                    message: "disk full".to_string(),
                })
            });
        }
        self.inner.append_message(conversation_id, message)
    }

    fn load_messages(&self, conversation_id: ConversationId) -> BoxFuture<'static, RepositoryResult<Vec<Message>>> {
        self.inner.load_messages(conversation_id)
    }

    fn delete_conversation(&self, conversation_id: ConversationId) -> BoxFuture<'static, RepositoryResult<()>> {
        self.inner.delete_conversation(conversation_id)
    }

    fn search(&self, query: &str) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>> {
        self.inner.search(query)
    }

    fn list_conversations(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>> {
        self.inner.list_conversations()
    }

    fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<Option<ConversationSummary>>> {
        self.inner.get_conversation(conversation_id)
    }

    fn rename_conversation(&self, conversation_id: ConversationId, title: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        self.inner.rename_conversation(conversation_id, title)
    }

    fn conversation_token_total(&self, conversation_id: ConversationId) -> BoxFuture<'static, RepositoryResult<usize>> {
        self.inner.conversation_token_total(conversation_id)
    }

    fn create_tag(&self, name: &str) -> BoxFuture<'static, RepositoryResult<Tag>> {
        self.inner.create_tag(name)
    }

    fn delete_tag(&self, tag_id: TagId) -> BoxFuture<'static, RepositoryResult<()>> {
        self.inner.delete_tag(tag_id)
    }

    fn list_tags(&self) -> BoxFuture<'static, RepositoryResult<Vec<Tag>>> {
        self.inner.list_tags()
    }

    fn tag_conversation(&self, conversation_id: ConversationId, tag_id: TagId) -> BoxFuture<'static, RepositoryResult<()>> {
        self.inner.tag_conversation(conversation_id, tag_id)
    }

    fn untag_conversation(&self, conversation_id: ConversationId, tag_id: TagId) -> BoxFuture<'static, RepositoryResult<()>> {
        self.inner.untag_conversation(conversation_id, tag_id)
    }

    fn conversation_tags(&self, conversation_id: ConversationId) -> BoxFuture<'static, RepositoryResult<Vec<Tag>>> {
        self.inner.conversation_tags(conversation_id)
    }

    fn conversations_with_tag(&self, tag_id: TagId) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>> {
        self.inner.conversations_with_tag(tag_id)
    }
}

#[tokio::test(start_paused = true)]
async fn test_switch_completes_when_stopped_reply_cannot_be_saved() {
    let inner = InMemoryConversationRepository::new();
    let other = inner.create_conversation("Other").await.unwrap();
    let repo = Arc::new(RejectingAssistantRepository {
        inner: inner.clone(),
    });
    let transport = Arc::new(ScriptedTransport::new());
    let mut controller = ConversationController::new(
        test_settings(),
        repo,
        transport.clone(),
        Arc::new(ImmediateSurface::new()),
    );

    transport.push_script(vec![ScriptStep::delta("never stored")]);
    controller.submit("hi").await.unwrap();
    let abandoned = controller.active_conversation().unwrap();
    let_worker_finish().await;

    let summary = controller.open_conversation(other.id).await.unwrap();
    assert_eq!(summary.id, other.id);
    assert_eq!(controller.active_conversation(), Some(other.id));
    assert!(!controller.is_streaming());
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(persisted(&inner, abandoned).await, vec![(Role::User, "hi".to_string())]);

    // Leaving and closing with nothing in flight are plain no-ops too.
    controller.new_conversation().await.unwrap();
    controller.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_tags_filter_conversations() {
    let mut h = harness();
    let a = h.repo.create_conversation("Deploy checklist").await.unwrap();
    let b = h.repo.create_conversation("Weekend").await.unwrap();

    let tag = h.controller.tag_conversation(a.id, "  work ").await.unwrap();
    assert_eq!(tag.name, "work");
    h.controller.tag_conversation(b.id, "personal").await.unwrap();
    h.controller.tag_conversation(b.id, "work").await.unwrap();

    let names: Vec<String> = h.controller.list_tags().await.unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["personal", "work"]);

    let work: Vec<ConversationId> = h
        .controller
        .conversations_with_tag("work")
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(work.len(), 2);
    assert!(work.contains(&a.id) && work.contains(&b.id));
    assert!(h.controller.conversations_with_tag("unknown").await.unwrap().is_empty());

    h.controller.untag_conversation(b.id, "work").await.unwrap();
    let tags = h.controller.conversation_tags(b.id).await.unwrap();
    assert_eq!(tags.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), vec!["personal"]);

    assert!(matches!(
        h.controller.tag_conversation(ConversationId(404), "work").await,
        Err(ControllerError::ConversationNotFound(_))
    ));
    assert!(matches!(
        h.controller.untag_conversation(a.id, "nope").await,
        Err(ControllerError::TagNotFound(_))
    ));

    h.controller.delete_tag("work").await.unwrap();
    assert!(h.controller.conversation_tags(a.id).await.unwrap().is_empty());
    assert!(matches!(
        h.controller.delete_tag("work").await,
        Err(ControllerError::TagNotFound(_))
    ));

    // Deleting a conversation drops its links.
    h.controller.delete_conversation(b.id).await.unwrap();
    assert!(h.controller.conversations_with_tag("personal").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_token_total_counts_saved_messages_only() {
    let mut h = harness();
    h.transport
        .push_script(vec![ScriptStep::delta("abcd"), ScriptStep::delta("efgh")]);

    h.controller.submit("12345678").await.unwrap();
    let id = h.controller.active_conversation().unwrap();
    assert_eq!(h.controller.token_total(id).await.unwrap(), 2);

    h.controller.run_until_idle().await.unwrap();
    assert_eq!(h.controller.token_total(id).await.unwrap(), 4);

    h.transport.push_script(vec![ScriptStep::delta("partial"), ScriptStep::Hang]);
    h.controller.submit("more").await.unwrap();
    h.controller.cancel();
    h.controller.run_until_idle().await.unwrap();
    assert_eq!(h.controller.token_total(id).await.unwrap(), 5);

    assert!(matches!(
        h.controller.token_total(ConversationId(999)).await,
        Err(ControllerError::ConversationNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_connection_check_reports_transport_error() {
    let h = harness();
    h.transport.push_completion(Ok("pong".to_string()));
    h.transport
        .push_completion(Err(TransportError::new(ErrorKind::ModelNotFound, "no such model")));

    h.controller.test_connection().await.unwrap();
    let failed = h.controller.test_connection().await;
    assert!(matches!(
        failed,
        Err(ControllerError::Transport(e)) if e.kind == ErrorKind::ModelNotFound
    ));

    let sent = h.transport.complete_requests();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].model, h.controller.settings().model);
    assert_eq!(h.transport.stream_calls(), 0);
}
