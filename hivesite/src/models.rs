use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Who authored a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// One entry of a conversation. `timestamp` is Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsletterSubscription {
    pub id: Uuid,
    pub email: String,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub message: String,
    pub category: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub name: Option<String>,
    pub email: String,
    pub message: String,
    pub category: String,
}

/// Where a content update came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    SocialFeed,
    Blog,
    Docs,
    Community,
}

impl Source {
    pub const ALL: [Source; 4] = [Source::SocialFeed, Source::Blog, Source::Docs, Source::Community];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::SocialFeed => "social-feed",
            Source::Blog => "blog",
            Source::Docs => "docs",
            Source::Community => "community",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| format!("unknown source: {}", s))
    }
}

/// What kind of item a content update is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Post,
    Announcement,
    Article,
    Documentation,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Post => "post",
            UpdateKind::Announcement => "announcement",
            UpdateKind::Article => "article",
            UpdateKind::Documentation => "documentation",
        }
    }
}

impl FromStr for UpdateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(UpdateKind::Post),
            "announcement" => Ok(UpdateKind::Announcement),
            "article" => Ok(UpdateKind::Article),
            "documentation" => Ok(UpdateKind::Documentation),
            other => Err(format!("unknown update kind: {}", other)),
        }
    }
}

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A normalized item ingested from an external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUpdate {
    pub id: Uuid,
    pub source: Source,
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub title: Option<String>,
    pub content: String,
    pub url: Option<String>,
    pub author_name: Option<String>,
    pub author_handle: Option<String>,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub metadata: Metadata,
}

/// Candidate record produced by a content source, before the store assigns id and fetched-at.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContentUpdate {
    pub source: Source,
    pub kind: UpdateKind,
    pub title: Option<String>,
    pub content: String,
    pub url: Option<String>,
    pub author_name: Option<String>,
    pub author_handle: Option<String>,
    pub published_at: DateTime<Utc>,
    pub metadata: Metadata,
}

impl NewContentUpdate {
    pub fn new(source: Source, kind: UpdateKind, content: impl Into<String>, published_at: DateTime<Utc>) -> Self {
        Self {
            source,
            kind,
            title: None,
            content: content.into(),
            url: None,
            author_name: None,
            author_handle: None,
            published_at,
            metadata: Metadata::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn author(mut self, name: impl Into<String>, handle: Option<&str>) -> Self {
        self.author_name = Some(name.into());
        self.author_handle = handle.map(str::to_string);
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn into_record(self, id: Uuid, fetched_at: DateTime<Utc>) -> ContentUpdate {
        ContentUpdate {
            id,
            source: self.source,
            kind: self.kind,
            title: self.title,
            content: self.content,
            url: self.url,
            author_name: self.author_name,
            author_handle: self.author_handle,
            published_at: self.published_at,
            fetched_at,
            metadata: self.metadata,
        }
    }
}
