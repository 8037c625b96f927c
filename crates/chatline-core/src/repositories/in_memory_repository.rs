use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::conversation_repository::{
    BoxFuture, ConversationRepository, ensure_persistable, ensure_tag_name,
};
use super::error::{RepositoryError, RepositoryResult};
use crate::models::{ConversationId, ConversationSummary, Message, MessageId, NewMessage, Tag, TagId};

struct StoredConversation {
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    messages: Vec<Message>,
}

impl StoredConversation {
    fn summary(&self, id: ConversationId) -> ConversationSummary {
        ConversationSummary {
            id,
            title: self.title.clone(),
            created_at: self.created_at,
            message_count: self.messages.len(),
        }
    }
}

#[derive(Default)]
struct Store {
    conversations: BTreeMap<ConversationId, StoredConversation>,
    next_conversation_id: i64,
    next_message_id: i64,
    tags: BTreeMap<TagId, String>,
    next_tag_id: i64,
    links: BTreeSet<(ConversationId, TagId)>,
}

impl Store {
    fn tag(&self, id: TagId) -> Option<Tag> {
        self.tags.get(&id).map(|name| Tag {
            id,
            name: name.clone(),
        })
    }

    fn sorted_tags(&self, ids: impl Iterator<Item = TagId>) -> Vec<Tag> {
        let mut tags: Vec<Tag> = ids.filter_map(|id| self.tag(id)).collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }

    fn sorted_summaries<'a>(
        &self,
        ids: impl Iterator<Item = &'a ConversationId>,
    ) -> Vec<ConversationSummary> {
        let mut found: Vec<_> = ids
            .filter_map(|id| self.conversations.get(id).map(|c| (c.updated_at, *id)))
            .collect();
        found.sort_by(|a, b| b.cmp(a));
        found
            .into_iter()
            .filter_map(|(_, id)| self.conversations.get(&id).map(|c| c.summary(id)))
            .collect()
    }
}

/// In-memory repository for conversations
/// Useful for testing and development
#[derive(Clone, Default)]
pub struct InMemoryConversationRepository {
    store: Arc<Mutex<Store>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationRepository for InMemoryConversationRepository {
    fn create_conversation(
        &self,
        title: &str,
    ) -> BoxFuture<'static, RepositoryResult<ConversationSummary>> {
        let store = self.store.clone();
        let title = title.to_string();
        Box::pin(async move {
            let mut store = store.lock();
            store.next_conversation_id += 1;
            let id = ConversationId(store.next_conversation_id);
            let now = Utc::now();
            let conversation = StoredConversation {
                title,
                created_at: now,
                updated_at: now,
                messages: Vec::new(),
            };
            let summary = conversation.summary(id);
            store.conversations.insert(id, conversation);
            Ok(summary)
        })
    }

    fn append_message(
        &self,
        conversation_id: ConversationId,
        message: NewMessage,
    ) -> BoxFuture<'static, RepositoryResult<Message>> {
        let store = self.store.clone();
        Box::pin(async move {
            ensure_persistable(&message)?;
            let mut store = store.lock();
            store.next_message_id += 1;
            let id = MessageId(store.next_message_id);
            let conversation = store
                .conversations
                .get_mut(&conversation_id)
                .ok_or_else(|| RepositoryError::conversation_not_found(conversation_id.0))?;
            let stored = message.into_message(id);
            conversation.updated_at = Utc::now();
            conversation.messages.push(stored.clone());
            Ok(stored)
        })
    }

    fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<Vec<Message>>> {
        let store = self.store.clone();
        Box::pin(async move {
            store
                .lock()
                .conversations
                .get(&conversation_id)
                .map(|c| c.messages.clone())
                .ok_or_else(|| RepositoryError::conversation_not_found(conversation_id.0))
        })
    }

    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.lock();
            store
                .conversations
                .remove(&conversation_id)
                .ok_or_else(|| RepositoryError::conversation_not_found(conversation_id.0))?;
            store.links.retain(|(conv, _)| *conv != conversation_id);
            Ok(())
        })
    }

    fn search(&self, query: &str) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>> {
        let store = self.store.clone();
        let needle = query.trim().to_lowercase();
        Box::pin(async move {
            let store = store.lock();
            let matching: Vec<&ConversationId> = store
                .conversations
                .iter()
                .filter(|(_, c)| {
                    needle.is_empty()
                        || c.title.to_lowercase().contains(&needle)
                        || c
                            .messages
                            .iter()
                            .any(|m| m.content.to_lowercase().contains(&needle))
                })
                .map(|(id, _)| id)
                .collect();
            Ok(store.sorted_summaries(matching.into_iter()))
        })
    }

    fn list_conversations(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>> {
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.lock();
            Ok(store.sorted_summaries(store.conversations.keys()))
        })
    }

    fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<Option<ConversationSummary>>> {
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .lock()
                .conversations
                .get(&conversation_id)
                .map(|c| c.summary(conversation_id)))
        })
    }

    fn rename_conversation(
        &self,
        conversation_id: ConversationId,
        title: &str,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let store = self.store.clone();
        let title = title.to_string();
        Box::pin(async move {
            let mut store = store.lock();
            let conversation = store
                .conversations
                .get_mut(&conversation_id)
                .ok_or_else(|| RepositoryError::conversation_not_found(conversation_id.0))?;
            conversation.title = title;
            Ok(())
        })
    }

    fn conversation_token_total(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<usize>> {
        let store = self.store.clone();
        Box::pin(async move {
            store
                .lock()
                .conversations
                .get(&conversation_id)
                .map(|c| c.messages.iter().map(|m| m.tokens).sum())
                .ok_or_else(|| RepositoryError::conversation_not_found(conversation_id.0))
        })
    }

    fn create_tag(&self, name: &str) -> BoxFuture<'static, RepositoryResult<Tag>> {
        let store = self.store.clone();
        let name = ensure_tag_name(name);
        Box::pin(async move {
            let name = name?;
            let mut store = store.lock();
            if let Some((&id, _)) = store.tags.iter().find(|(_, existing)| **existing == name) {
                return Ok(Tag { id, name });
            }
            store.next_tag_id += 1;
            let id = TagId(store.next_tag_id);
            store.tags.insert(id, name.clone());
            Ok(Tag { id, name })
        })
    }

    fn delete_tag(&self, tag_id: TagId) -> BoxFuture<'static, RepositoryResult<()>> {
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.lock();
            store
                .tags
                .remove(&tag_id)
                .ok_or_else(|| RepositoryError::tag_not_found(tag_id.0))?;
            store.links.retain(|(_, tag)| *tag != tag_id);
            Ok(())
        })
    }

    fn list_tags(&self) -> BoxFuture<'static, RepositoryResult<Vec<Tag>>> {
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.lock();
            Ok(store.sorted_tags(store.tags.keys().copied()))
        })
    }

    fn tag_conversation(
        &self,
        conversation_id: ConversationId,
        tag_id: TagId,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.lock();
            if !store.conversations.contains_key(&conversation_id) {
                return Err(RepositoryError::conversation_not_found(conversation_id.0));
            }
            if !store.tags.contains_key(&tag_id) {
                return Err(RepositoryError::tag_not_found(tag_id.0));
            }
            store.links.insert((conversation_id, tag_id));
            Ok(())
        })
    }

    fn untag_conversation(
        &self,
        conversation_id: ConversationId,
        tag_id: TagId,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let store = self.store.clone();
        Box::pin(async move {
            store.lock().links.remove(&(conversation_id, tag_id));
            Ok(())
        })
    }

    fn conversation_tags(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<Vec<Tag>>> {
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.lock();
            let attached = store
                .links
                .iter()
                .filter(|(conv, _)| *conv == conversation_id)
                .map(|(_, tag)| *tag);
            Ok(store.sorted_tags(attached))
        })
    }

    fn conversations_with_tag(
        &self,
        tag_id: TagId,
    ) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>> {
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.lock();
            let tagged: Vec<&ConversationId> = store
                .links
                .iter()
                .filter(|(_, tag)| *tag == tag_id)
                .map(|(conv, _)| conv)
                .collect();
            Ok(store.sorted_summaries(tagged.into_iter()))
        })
    }
}
