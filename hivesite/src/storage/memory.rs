//! Process-local store. Nothing survives a restart.

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::models::{
    ChatMessage, ContentUpdate, Conversation, Feedback, NewContentUpdate, NewConversation,
    NewFeedback, NewsletterSubscription, Source, UpdateKind,
};

/// In-memory [`Store`]. Records are kept in insertion order; locks are never held
/// across an await point.
///
/// Unlike the SQLite store, duplicate newsletter emails are not rejected here.
#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<Vec<Conversation>>,
    newsletters: RwLock<Vec<NewsletterSubscription>>,
    feedback: RwLock<Vec<Feedback>>,
    content_updates: RwLock<Vec<ContentUpdate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get_conversation(&self, session_id: &str) -> StoreResult<Option<Conversation>> {
        Ok(self
            .conversations
            .read()
            .iter()
            .rev()
            .find(|c| c.session_id == session_id)
            .cloned())
    }

    async fn create_conversation(&self, conversation: NewConversation) -> StoreResult<Conversation> {
        let now = Utc::now();
        let record = Conversation {
            id: Uuid::new_v4(),
            session_id: conversation.session_id,
            messages: conversation.messages,
            created_at: now,
            updated_at: now,
        };
        self.conversations.write().push(record.clone());
        Ok(record)
    }

    async fn update_conversation(
        &self,
        session_id: &str,
        messages: Vec<ChatMessage>,
    ) -> StoreResult<Conversation> {
        let mut conversations = self.conversations.write();
        let existing = conversations
            .iter_mut()
            .rev()
            .find(|c| c.session_id == session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        existing.messages = messages;
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn subscribe_newsletter(&self, email: &str) -> StoreResult<NewsletterSubscription> {
        let record = NewsletterSubscription {
            id: Uuid::new_v4(),
            email: email.to_string(),
            subscribed_at: Utc::now(),
        };
        self.newsletters.write().push(record.clone());
        Ok(record)
    }

    async fn is_subscribed(&self, email: &str) -> StoreResult<bool> {
        Ok(self.newsletters.read().iter().any(|s| s.email == email))
    }

    async fn create_feedback(&self, feedback: NewFeedback) -> StoreResult<Feedback> {
        let record = Feedback {
            id: Uuid::new_v4(),
            name: feedback.name,
            email: feedback.email,
            message: feedback.message,
            category: feedback.category,
            submitted_at: Utc::now(),
        };
        self.feedback.write().push(record.clone());
        Ok(record)
    }

    async fn create_content_update(&self, update: NewContentUpdate) -> StoreResult<ContentUpdate> {
        let record = update.into_record(Uuid::new_v4(), Utc::now());
        let mut updates = self.content_updates.write();
        if let Some(url) = record.url.as_deref() {
            if updates.iter().any(|u| u.url.as_deref() == Some(url)) {
                return Err(StoreError::DuplicateUrl(url.to_string()));
            }
        }
        updates.push(record.clone());
        Ok(record)
    }

    async fn get_content_updates(
        &self,
        limit: usize,
        source: Option<Source>,
    ) -> StoreResult<Vec<ContentUpdate>> {
        let mut updates: Vec<ContentUpdate> = self
            .content_updates
            .read()
            .iter()
            .filter(|u| source.map_or(true, |s| u.source == s))
            .cloned()
            .collect();

        updates.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        updates.truncate(limit);
        Ok(updates)
    }

    async fn latest_update_by_source(
        &self,
        source: Source,
        kind: UpdateKind,
    ) -> StoreResult<Option<ContentUpdate>> {
        Ok(self
            .content_updates
            .read()
            .iter()
            .filter(|u| u.source == source && u.kind == kind)
            .max_by_key(|u| u.published_at)
            .cloned())
    }

    async fn find_content_update_by_url(&self, url: &str) -> StoreResult<Option<ContentUpdate>> {
        Ok(self
            .content_updates
            .read()
            .iter()
            .find(|u| u.url.as_deref() == Some(url))
            .cloned())
    }
}
