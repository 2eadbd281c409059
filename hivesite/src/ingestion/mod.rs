//! Content aggregation: pull candidate updates from every source, fall back to pinned
//! data when a source has nothing live, and store whatever is new (deduplicated by URL).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::models::{NewContentUpdate, Source};
use crate::storage::{Store, StoreError};

pub mod feed;
pub mod social;
pub mod sources;

pub use social::SocialFeedSource;
pub use sources::{BlogSource, CommunitySource, DocsSource};

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = "Mozilla/5.0 (compatible; Hivesite/0.1; +https://www.gensyn.ai)";

/// One external origin of content updates.
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    fn source(&self) -> Source;

    /// Live candidates. An error or an empty list makes the aggregator use [`Self::fallback`].
    async fn fetch_live(&self, client: &Client) -> Result<Vec<NewContentUpdate>>;

    /// Pinned candidates with stable URLs, so repeated cycles never duplicate them.
    fn fallback(&self) -> Vec<NewContentUpdate>;
}

/// Per-source outcome of a cycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub source: Source,
    pub candidates: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub used_fallback: bool,
    pub error: Option<String>,
}

impl SourceReport {
    fn new(source: Source) -> Self {
        Self {
            source,
            candidates: 0,
            inserted: 0,
            skipped: 0,
            used_fallback: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub inserted: usize,
    pub sources: Vec<SourceReport>,
}

/// HTTP client shared by every source: bounded timeout and a fixed user agent.
pub fn build_http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build reqwest client")
}

/// Built-in sources wired from configuration.
pub fn default_sources(cfg: &common::SourcesConfig) -> Vec<Arc<dyn ContentSource>> {
    vec![
        Arc::new(SocialFeedSource::new(
            cfg.social_handle.as_deref().unwrap_or(social::DEFAULT_HANDLE),
            cfg.syndication_url.as_deref().unwrap_or(social::DEFAULT_SYNDICATION_URL),
            cfg.mirror_url.as_deref().unwrap_or(social::DEFAULT_MIRROR_URL),
        )),
        Arc::new(BlogSource::new(cfg.blog_feed_url.clone())),
        Arc::new(DocsSource::new(cfg.docs_feed_url.clone())),
        Arc::new(CommunitySource),
    ]
}

pub struct Aggregator {
    store: Arc<dyn Store>,
    sources: Vec<Arc<dyn ContentSource>>,
    client: Client,
}

impl Aggregator {
    pub fn new(store: Arc<dyn Store>, sources: Vec<Arc<dyn ContentSource>>, client: Client) -> Self {
        Self { store, sources, client }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &common::Config) -> Result<Self> {
        let timeout = config.fetcher.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = build_http_client(timeout)?;
        Ok(Self::new(store, default_sources(&config.sources), client))
    }

    /// Run every source concurrently. A failing source never aborts the cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        info!("aggregator: starting content fetch cycle ({} sources)", self.sources.len());

        let mut set = JoinSet::new();
        for source in &self.sources {
            let source = Arc::clone(source);
            let store = Arc::clone(&self.store);
            let client = self.client.clone();
            set.spawn(async move { collect_source(source.as_ref(), store.as_ref(), &client).await });
        }

        let mut reports = Vec::with_capacity(self.sources.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!("aggregator: source task failed: {}", e),
            }
        }
        reports.sort_by_key(|r| Source::ALL.iter().position(|s| *s == r.source));

        let inserted = reports.iter().map(|r| r.inserted).sum();
        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            inserted,
            sources: reports,
        };
        info!("aggregator: cycle completed, {} new updates", report.inserted);
        report
    }
}

async fn collect_source(source: &dyn ContentSource, store: &dyn Store, client: &Client) -> SourceReport {
    let tag = source.source();
    let mut report = SourceReport::new(tag);

    let candidates = match source.fetch_live(client).await {
        Ok(live) if !live.is_empty() => live,
        Ok(_) => {
            debug!(source = %tag, "no live content, using fallback");
            report.used_fallback = true;
            source.fallback()
        }
        Err(e) => {
            warn!(source = %tag, "live fetch failed, using fallback: {:#}", e);
            report.used_fallback = true;
            report.error = Some(format!("{:#}", e));
            source.fallback()
        }
    };
    report.candidates = candidates.len();

    for candidate in candidates {
        let Some(url) = candidate.url.clone() else {
            debug!(source = %tag, "skipping candidate without url");
            report.skipped += 1;
            continue;
        };

        match store.create_content_update(candidate).await {
            Ok(stored) => {
                debug!(source = %tag, url = ?stored.url, "stored update");
                report.inserted += 1;
            }
            Err(StoreError::DuplicateUrl(_)) => report.skipped += 1,
            Err(e) => {
                error!(source = %tag, %url, "failed to store update: {}", e);
                report.error = Some(e.to_string());
            }
        }
    }

    info!(
        source = %tag,
        candidates = report.candidates,
        inserted = report.inserted,
        skipped = report.skipped,
        fallback = report.used_fallback,
        "aggregator: source done"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UpdateKind;
    use crate::storage::MemoryStore;

    struct FixedSource {
        live: std::result::Result<Vec<NewContentUpdate>, String>,
        fallback: Vec<NewContentUpdate>,
    }

    #[async_trait::async_trait]
    impl ContentSource for FixedSource {
        fn source(&self) -> Source {
            Source::Blog
        }

        async fn fetch_live(&self, _client: &Client) -> Result<Vec<NewContentUpdate>> {
            self.live.clone().map_err(|e| anyhow::anyhow!(e))
        }

        fn fallback(&self) -> Vec<NewContentUpdate> {
            self.fallback.clone()
        }
    }

    fn candidate(url: Option<&str>) -> NewContentUpdate {
        let update = NewContentUpdate::new(Source::Blog, UpdateKind::Article, "body", Utc::now());
        match url {
            Some(url) => update.url(url),
            None => update,
        }
    }

    #[tokio::test]
    async fn failing_live_fetch_uses_fallback_and_records_error() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let source = FixedSource {
            live: Err("boom".into()),
            fallback: vec![candidate(Some("https://example.com/a"))],
        };

        let report = collect_source(&source, store.as_ref(), &Client::new()).await;
        assert!(report.used_fallback);
        assert_eq!(report.error.as_deref(), Some("boom"));
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn candidates_without_url_or_already_stored_are_skipped() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let source = FixedSource {
            live: Ok(vec![
                candidate(Some("https://example.com/a")),
                candidate(None),
                candidate(Some("https://example.com/a")),
            ]),
            fallback: Vec::new(),
        };

        let report = collect_source(&source, store.as_ref(), &Client::new()).await;
        assert!(!report.used_fallback);
        assert_eq!(report.candidates, 3);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(store.get_content_updates(10, None).await.unwrap().len(), 1);
    }
}
