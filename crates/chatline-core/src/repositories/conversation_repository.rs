use std::future::Future;
use std::pin::Pin;

use super::error::{RepositoryError, RepositoryResult};
use crate::models::{
    ConversationId, ConversationSummary, Message, NewMessage, Tag, TagId, normalize_tag_name,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable record of conversations and their finalized messages.
///
/// Only user, assistant and system messages cross this boundary. Typing
/// placeholders and partial assistant text are never stored.
pub trait ConversationRepository: Send + Sync + 'static {
    /// Create an empty conversation and return its metadata.
    fn create_conversation(
        &self,
        title: &str,
    ) -> BoxFuture<'static, RepositoryResult<ConversationSummary>>;

    /// Append a message at the end of a conversation; returns it with its id.
    fn append_message(
        &self,
        conversation_id: ConversationId,
        message: NewMessage,
    ) -> BoxFuture<'static, RepositoryResult<Message>>;

    /// All messages of a conversation, in append order.
    fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<Vec<Message>>>;

    /// Delete a conversation and every message in it.
    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Case-insensitive substring match over titles and message contents.
    /// A blank query lists everything.
    fn search(&self, query: &str) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>>;

    /// Most recently updated first.
    fn list_conversations(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>>;

    fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<Option<ConversationSummary>>>;

    fn rename_conversation(
        &self,
        conversation_id: ConversationId,
        title: &str,
    ) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Sum of the stored token estimates of a conversation's messages.
    fn conversation_token_total(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<usize>>;

    // ---- tags ----

    /// Create a tag, or return the existing one with the same name.
    fn create_tag(&self, name: &str) -> BoxFuture<'static, RepositoryResult<Tag>>;

    /// Delete a tag and detach it from every conversation.
    fn delete_tag(&self, tag_id: TagId) -> BoxFuture<'static, RepositoryResult<()>>;

    /// All tags, by name.
    fn list_tags(&self) -> BoxFuture<'static, RepositoryResult<Vec<Tag>>>;

    /// Attach a tag. Attaching twice is a no-op.
    fn tag_conversation(
        &self,
        conversation_id: ConversationId,
        tag_id: TagId,
    ) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Detach a tag. Detaching one that is not attached is a no-op.
    fn untag_conversation(
        &self,
        conversation_id: ConversationId,
        tag_id: TagId,
    ) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Tags attached to a conversation, by name.
    fn conversation_tags(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<Vec<Tag>>>;

    /// Conversations carrying a tag, most recently updated first.
    fn conversations_with_tag(
        &self,
        tag_id: TagId,
    ) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>>;
}

pub(crate) fn ensure_persistable(message: &NewMessage) -> RepositoryResult<()> {
    if message.role.is_persistable() {
        Ok(())
    } else {
        Err(RepositoryError::InvalidData {
            message: format!("{:?} messages cannot be persisted", message.role),
        })
    }
}

pub(crate) fn ensure_tag_name(name: &str) -> RepositoryResult<String> {
    normalize_tag_name(name).ok_or_else(|| RepositoryError::InvalidData {
        message: "Tag name cannot be empty".to_string(),
    })
}
