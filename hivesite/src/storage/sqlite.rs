use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::models::{
    ChatMessage, ContentUpdate, Conversation, Feedback, Metadata, NewContentUpdate,
    NewConversation, NewFeedback, NewsletterSubscription, Source, UpdateKind,
};

/// Relational [`Store`] backed by a single SQLite database.
///
/// Timestamps are stored as Unix milliseconds so ordering is numeric; message lists and
/// metadata are stored as JSON text.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ensure the required schema exists. Idempotent and safe to call at every startup.
    pub async fn ensure_schema(&self) -> Result<()> {
        info!("storage: ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");

        let stmts = [
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                messages_json TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id);",
            r#"
            CREATE TABLE IF NOT EXISTS newsletter_subscriptions (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                subscribed_at INTEGER NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                id TEXT PRIMARY KEY,
                name TEXT,
                email TEXT NOT NULL,
                message TEXT NOT NULL,
                category TEXT NOT NULL,
                submitted_at INTEGER NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS content_updates (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                type TEXT NOT NULL,
                title TEXT,
                content TEXT NOT NULL,
                url TEXT UNIQUE,
                author_name TEXT,
                author_handle TEXT,
                published_at INTEGER NOT NULL,
                fetched_at INTEGER NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}'
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_content_updates_published ON content_updates(published_at DESC);",
        ];

        for s in &stmts {
            sqlx::query(s)
                .execute(&self.pool)
                .await
                .context("failed to ensure schema")?;
        }

        info!("storage: DB schema ensured");
        Ok(())
    }
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}

/// SQLITE_CONSTRAINT_UNIQUE (2067). The message check covers drivers that report only the primary code.
fn is_unique_violation(err: &dyn sqlx::error::DatabaseError) -> bool {
    matches!(err.code().as_deref(), Some("2067"))
        || err.message().contains("UNIQUE constraint failed")
}

fn parse_uuid(raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt(format!("bad id {}: {}", raw, e)))
}

fn conversation_from_row(row: &SqliteRow) -> StoreResult<Conversation> {
    let messages_json: String = row.try_get("messages_json")?;
    Ok(Conversation {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        session_id: row.try_get("session_id")?,
        messages: serde_json::from_str(&messages_json)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn content_update_from_row(row: &SqliteRow) -> StoreResult<ContentUpdate> {
    let source: String = row.try_get("source")?;
    let kind: String = row.try_get("type")?;
    let metadata_json: String = row.try_get("metadata_json")?;

    Ok(ContentUpdate {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        source: source.parse().map_err(StoreError::Corrupt)?,
        kind: kind.parse().map_err(StoreError::Corrupt)?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        url: row.try_get("url")?,
        author_name: row.try_get("author_name")?,
        author_handle: row.try_get("author_handle")?,
        published_at: from_millis(row.try_get("published_at")?)?,
        fetched_at: from_millis(row.try_get("fetched_at")?)?,
        metadata: serde_json::from_str::<Metadata>(&metadata_json)?,
    })
}

const CONTENT_COLUMNS: &str = "id, source, type, title, content, url, author_name, author_handle, published_at, fetched_at, metadata_json";

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn get_conversation(&self, session_id: &str) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, messages_json, created_at, updated_at
            FROM conversations
            WHERE session_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(conversation_from_row).transpose()
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

        sqlx::query(
            r#"
            INSERT INTO conversations (id, session_id, messages_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.session_id)
        .bind(serde_json::to_string(&record.messages)?)
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!(session_id = %record.session_id, "created conversation {}", record.id);
        Ok(record)
    }

    async fn update_conversation(
        &self,
        session_id: &str,
        messages: Vec<ChatMessage>,
    ) -> StoreResult<Conversation> {
        let mut existing = self
            .get_conversation(session_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        let now = Utc::now();
        sqlx::query("UPDATE conversations SET messages_json = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&messages)?)
            .bind(now.timestamp_millis())
            .bind(existing.id.to_string())
            .execute(&self.pool)
            .await?;

        existing.messages = messages;
        existing.updated_at = now;
        Ok(existing)
    }

    async fn subscribe_newsletter(&self, email: &str) -> StoreResult<NewsletterSubscription> {
        let record = NewsletterSubscription {
            id: Uuid::new_v4(),
            email: email.to_string(),
            subscribed_at: Utc::now(),
        };

        sqlx::query("INSERT INTO newsletter_subscriptions (id, email, subscribed_at) VALUES (?, ?, ?)")
            .bind(record.id.to_string())
            .bind(&record.email)
            .bind(record.subscribed_at.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(record)
    }

    async fn is_subscribed(&self, email: &str) -> StoreResult<bool> {
        let existing = sqlx::query_scalar::<_, String>(
            "SELECT id FROM newsletter_subscriptions WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(existing.is_some())
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

        sqlx::query(
            r#"
            INSERT INTO feedback (id, name, email, message, category, submitted_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.name.as_deref())
        .bind(&record.email)
        .bind(&record.message)
        .bind(&record.category)
        .bind(record.submitted_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn create_content_update(&self, update: NewContentUpdate) -> StoreResult<ContentUpdate> {
        let record = update.into_record(Uuid::new_v4(), Utc::now());

        sqlx::query(
            r#"
            INSERT INTO content_updates
            (id, source, type, title, content, url, author_name, author_handle, published_at, fetched_at, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.source.as_str())
        .bind(record.kind.as_str())
        .bind(record.title.as_deref())
        .bind(&record.content)
        .bind(record.url.as_deref())
        .bind(record.author_name.as_deref())
        .bind(record.author_handle.as_deref())
        .bind(record.published_at.timestamp_millis())
        .bind(record.fetched_at.timestamp_millis())
        .bind(serde_json::to_string(&record.metadata)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let duplicate = matches!(&e, sqlx::Error::Database(db) if is_unique_violation(&**db));
            match record.url.as_deref() {
                Some(url) if duplicate => StoreError::DuplicateUrl(url.to_string()),
                _ => StoreError::Database(e),
            }
        })?;

        Ok(record)
    }

    async fn get_content_updates(
        &self,
        limit: usize,
        source: Option<Source>,
    ) -> StoreResult<Vec<ContentUpdate>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = match source {
            Some(source) => {
                sqlx::query(&format!(
                    "SELECT {} FROM content_updates WHERE source = ? ORDER BY published_at DESC LIMIT ?",
                    CONTENT_COLUMNS
                ))
                .bind(source.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM content_updates ORDER BY published_at DESC LIMIT ?",
                    CONTENT_COLUMNS
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(content_update_from_row).collect()
    }

    async fn latest_update_by_source(
        &self,
        source: Source,
        kind: UpdateKind,
    ) -> StoreResult<Option<ContentUpdate>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_updates WHERE source = ? AND type = ? ORDER BY published_at DESC LIMIT 1",
            CONTENT_COLUMNS
        ))
        .bind(source.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(content_update_from_row).transpose()
    }

    async fn find_content_update_by_url(&self, url: &str) -> StoreResult<Option<ContentUpdate>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_updates WHERE url = ? LIMIT 1",
            CONTENT_COLUMNS
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(content_update_from_row).transpose()
    }
}
