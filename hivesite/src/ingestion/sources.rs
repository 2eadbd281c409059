use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use reqwest::Client;

use super::feed::{feed_to_updates, fetch_and_parse_feed};
use super::ContentSource;
use crate::models::{NewContentUpdate, Source, UpdateKind};

/// Articles from the project blog. Live only when a feed URL is configured.
pub struct BlogSource {
    feed_url: Option<String>,
}

impl BlogSource {
    pub fn new(feed_url: Option<String>) -> Self {
        Self { feed_url }
    }
}

#[async_trait::async_trait]
impl ContentSource for BlogSource {
    fn source(&self) -> Source {
        Source::Blog
    }

    async fn fetch_live(&self, client: &Client) -> Result<Vec<NewContentUpdate>> {
        let Some(url) = &self.feed_url else {
            return Ok(Vec::new());
        };
        let feed = fetch_and_parse_feed(client, url).await?;
        Ok(feed_to_updates(&feed, Source::Blog, UpdateKind::Article))
    }

    fn fallback(&self) -> Vec<NewContentUpdate> {
        let now = Utc::now();
        vec![
            NewContentUpdate::new(
                Source::Blog,
                UpdateKind::Article,
                "We're thrilled to share performance improvements in Verde Runtime. Our cryptographically \
                 verifiable execution layer now handles 10,000+ concurrent ML training jobs with sub-second \
                 verification times. This enables truly scalable decentralized machine learning, bringing us \
                 closer to our vision of democratizing AI compute access.",
                now - Duration::hours(12),
            )
            .title("Scaling Decentralized ML: Verde Runtime Performance Update")
            .url("https://www.gensyn.ai/articles/verde-performance-update")
            .author("Gensyn Engineering Team", None)
            .meta("tags", vec!["verde", "performance", "protocol"])
            .meta("readTime", 8),
            NewContentUpdate::new(
                Source::Blog,
                UpdateKind::Article,
                "The RL Swarm network has reached 30,000 active nodes contributing to collaborative \
                 reinforcement learning. Read about the projects being built on our testnet and how you \
                 can participate.",
                now - Duration::hours(24),
            )
            .title("Community Spotlight: RL Swarm Reaches 30K Nodes")
            .url("https://www.gensyn.ai/articles/rl-swarm-30k-nodes")
            .author("Gensyn Community Team", None)
            .meta("tags", vec!["rl-swarm", "community", "milestone"])
            .meta("readTime", 6),
        ]
    }
}

/// Documentation changes. Live only when a feed URL is configured.
pub struct DocsSource {
    feed_url: Option<String>,
}

impl DocsSource {
    pub fn new(feed_url: Option<String>) -> Self {
        Self { feed_url }
    }
}

#[async_trait::async_trait]
impl ContentSource for DocsSource {
    fn source(&self) -> Source {
        Source::Docs
    }

    async fn fetch_live(&self, client: &Client) -> Result<Vec<NewContentUpdate>> {
        let Some(url) = &self.feed_url else {
            return Ok(Vec::new());
        };
        let feed = fetch_and_parse_feed(client, url).await?;
        Ok(feed_to_updates(&feed, Source::Docs, UpdateKind::Documentation))
    }

    fn fallback(&self) -> Vec<NewContentUpdate> {
        let now = Utc::now();
        vec![
            NewContentUpdate::new(
                Source::Docs,
                UpdateKind::Documentation,
                "New guide for getting started with Verde Runtime: set up your environment, deploy your \
                 first verifiable ML workload and understand the verification process.",
                now - Duration::hours(18),
            )
            .title("Verde Runtime - Getting Started Guide")
            .url("https://docs.gensyn.ai/verde/getting-started")
            .author("Gensyn Documentation", None)
            .meta("section", "verde")
            .meta("version", "2.1"),
            NewContentUpdate::new(
                Source::Docs,
                UpdateKind::Documentation,
                "Updated API reference for RL Swarm v3.0: new endpoints for distributed training \
                 coordination, improved peer discovery and model synchronization. Includes Python and \
                 TypeScript examples.",
                now - Duration::hours(36),
            )
            .title("RL Swarm API Reference - v3.0")
            .url("https://docs.gensyn.ai/rl-swarm/api-reference")
            .author("Gensyn Documentation", None)
            .meta("section", "rl-swarm")
            .meta("version", "3.0"),
        ]
    }
}

/// Community announcements. There is no live endpoint, only the pinned announcement.
#[derive(Default)]
pub struct CommunitySource;

#[async_trait::async_trait]
impl ContentSource for CommunitySource {
    fn source(&self) -> Source {
        Source::Community
    }

    async fn fetch_live(&self, _client: &Client) -> Result<Vec<NewContentUpdate>> {
        Ok(Vec::new())
    }

    fn fallback(&self) -> Vec<NewContentUpdate> {
        let published = Utc.with_ymd_and_hms(2024, 11, 23, 0, 0, 0).single().unwrap_or_else(Utc::now);
        vec![NewContentUpdate::new(
            Source::Community,
            UpdateKind::Announcement,
            "We just crossed 100,000 models trained on RL-Swarm, a milestone on our very first deployed system.\n\n\
             Introducing the Gensyn Pioneer Program, celebrating the people who make Gensyn feel alive.\n\n\
             Pioneer Roles:\n\
             - Hive Member: consistent contributors who engage and support others\n\
             - Drone: those taking initiative and creating meaningful things\n\
             - Queen Bee: people who live and breathe the Gensyn culture\n\n\
             Applications open in 1-2 weeks, but contributions count starting now!",
            published,
        )
        .title("Gensyn Pioneer Program Launch + 100K Models Milestone!")
        .url("https://discord.gg/gensyn")
        .author("Gensyn Team", None)
        .meta("type", "community-program")
        .meta("milestone", "100k-models")
        .meta("program", "pioneer")]
    }
}
