use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{
    ChatMessage, ContentUpdate, Conversation, Feedback, NewContentUpdate, NewConversation,
    NewFeedback, NewsletterSubscription, Source, UpdateKind,
};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors surfaced by [`Store`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found for session {0}")]
    NotFound(String),
    /// A content update with this URL is already stored
    #[error("content update already stored for url {0}")]
    DuplicateUrl(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A row could not be mapped back to a record (bad enum tag, bad uuid, ...)
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// CRUD access to everything the site persists.
///
/// Every operation is atomic only with respect to itself; there are no multi-record
/// transactions and the last write wins.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Most recently created conversation for the session key, if any
    async fn get_conversation(&self, session_id: &str) -> StoreResult<Option<Conversation>>;

    async fn create_conversation(&self, conversation: NewConversation) -> StoreResult<Conversation>;

    /// Replace the message list of the session's conversation.
    /// Fails with [`StoreError::NotFound`] when the session has no conversation.
    async fn update_conversation(
        &self,
        session_id: &str,
        messages: Vec<ChatMessage>,
    ) -> StoreResult<Conversation>;

    async fn subscribe_newsletter(&self, email: &str) -> StoreResult<NewsletterSubscription>;

    async fn is_subscribed(&self, email: &str) -> StoreResult<bool>;

    async fn create_feedback(&self, feedback: NewFeedback) -> StoreResult<Feedback>;

    /// Insert a new update. Fails with [`StoreError::DuplicateUrl`] when another update
    /// already has the same URL; the check and the insert are one atomic step.
    async fn create_content_update(&self, update: NewContentUpdate) -> StoreResult<ContentUpdate>;

    /// Updates ordered by `published_at` descending, truncated to `limit`
    async fn get_content_updates(
        &self,
        limit: usize,
        source: Option<Source>,
    ) -> StoreResult<Vec<ContentUpdate>>;

    async fn latest_update_by_source(
        &self,
        source: Source,
        kind: UpdateKind,
    ) -> StoreResult<Option<ContentUpdate>>;

    /// First update whose URL equals `url` exactly
    async fn find_content_update_by_url(&self, url: &str) -> StoreResult<Option<ContentUpdate>>;
}

/// Pick the store implementation once at startup: SQLite when a URL is configured,
/// in-memory otherwise.
pub async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn Store>> {
    match database_url {
        Some(url) => {
            let pool = common::init_db_pool(url).await?;
            let store = SqliteStore::new(pool);
            store.ensure_schema().await?;
            info!(%url, "using sqlite store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("no database URL configured - using in-memory store (data will not survive restarts)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
