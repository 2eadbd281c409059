use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{info, warn};

use super::ContentSource;
use crate::models::{NewContentUpdate, Source, UpdateKind};

pub const DEFAULT_HANDLE: &str = "gensynai";
pub const DEFAULT_SYNDICATION_URL: &str =
    "https://syndication.twitter.com/srv/timeline-profile/screen-name/{handle}?showReplies=false&showRetweets=false";
pub const DEFAULT_MIRROR_URL: &str = "https://xcancel.com/{handle}";

const MAX_POSTS: usize = 10;
const MIN_SCRAPED_CHARS: usize = 10;

/// Posts from the project's social account: the public syndication timeline first,
/// then an HTML mirror of the profile.
pub struct SocialFeedSource {
    handle: String,
    syndication_url: String,
    mirror_url: String,
}

impl SocialFeedSource {
    /// URL templates may contain `{handle}`.
    pub fn new(handle: impl Into<String>, syndication_url: impl Into<String>, mirror_url: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            syndication_url: syndication_url.into(),
            mirror_url: mirror_url.into(),
        }
    }

    fn expand(&self, template: &str) -> String {
        template.replace("{handle}", &self.handle)
    }

    async fn fetch_syndication(&self, client: &Client) -> Result<Vec<NewContentUpdate>> {
        let url = self.expand(&self.syndication_url);
        let response = client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("syndication request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("syndication API returned {}", status);
        }

        let body: SyndicationTimeline = response.json().await.context("failed to parse syndication timeline")?;
        Ok(parse_syndication(body, &self.handle))
    }

    async fn fetch_mirror(&self, client: &Client) -> Result<Vec<NewContentUpdate>> {
        let url = self.expand(&self.mirror_url);
        let response = client.get(&url).send().await.context("mirror request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("mirror returned {}", status);
        }

        let html = response.text().await.context("failed to read mirror body")?;
        let host = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        Ok(scrape_mirror(&html, &self.handle, &host))
    }
}

#[async_trait::async_trait]
impl ContentSource for SocialFeedSource {
    fn source(&self) -> Source {
        Source::SocialFeed
    }

    async fn fetch_live(&self, client: &Client) -> Result<Vec<NewContentUpdate>> {
        match self.fetch_syndication(client).await {
            Ok(posts) if !posts.is_empty() => {
                info!("social: {} posts from syndication timeline", posts.len());
                return Ok(posts);
            }
            Ok(_) => info!("social: syndication timeline was empty, trying mirror"),
            Err(e) => warn!("social: syndication failed, trying mirror: {:#}", e),
        }

        let posts = self.fetch_mirror(client).await?;
        info!("social: scraped {} posts from mirror", posts.len());
        Ok(posts)
    }

    fn fallback(&self) -> Vec<NewContentUpdate> {
        let pioneer = Utc.with_ymd_and_hms(2024, 11, 23, 0, 0, 0).single().unwrap_or_else(Utc::now);
        vec![
            NewContentUpdate::new(
                Source::SocialFeed,
                UpdateKind::Announcement,
                "We just crossed 100,000 models trained on RL-Swarm, a milestone on our very first deployed system.\n\n\
                 Introducing the Gensyn Pioneer Program! It celebrates those shaping our culture from within, \
                 whether you're making memes, helping others, or spreading the Gensyn spirit across the web.\n\n\
                 For the latest updates and to join the community, visit our Discord!",
                pioneer,
            )
            .title("Gensyn Pioneer Program Announced!")
            .url("https://discord.gg/gensyn?ref=pioneer-program")
            .author("Gensyn", Some(DEFAULT_HANDLE))
            .meta("type", "community-announcement")
            .meta("milestone", "100k models"),
            NewContentUpdate::new(
                Source::SocialFeed,
                UpdateKind::Post,
                "For the latest real-time updates from @gensynai, join our Discord community or follow us on X/Twitter. \
                 Live updates and announcements happen there first!",
                pioneer,
            )
            .url("https://discord.gg/gensyn?ref=twitter-updates")
            .author("Gensyn", Some(DEFAULT_HANDLE))
            .meta("type", "info"),
        ]
    }
}

#[derive(Debug, Deserialize)]
struct SyndicationTimeline {
    #[serde(default)]
    timeline: Vec<SyndicationPost>,
}

#[derive(Debug, Deserialize)]
struct SyndicationPost {
    text: Option<String>,
    id_str: Option<String>,
    created_at: Option<String>,
    user: Option<SyndicationUser>,
    #[serde(default)]
    favorite_count: u64,
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
}

#[derive(Debug, Deserialize)]
struct SyndicationUser {
    name: Option<String>,
}

fn parse_post_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %z %Y")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

/// Only the first `MAX_POSTS` timeline entries are considered. Of those, posts need both
/// text and an id; an id-less post has no stable URL to dedup on.
fn parse_syndication(body: SyndicationTimeline, handle: &str) -> Vec<NewContentUpdate> {
    body.timeline
        .into_iter()
        .take(MAX_POSTS)
        .filter_map(|post| {
            let text = post.text.filter(|t| !t.trim().is_empty())?;
            let id = post.id_str?;
            let published = post
                .created_at
                .as_deref()
                .and_then(parse_post_date)
                .unwrap_or_else(Utc::now);
            let author = post.user.and_then(|u| u.name).unwrap_or_else(|| "Gensyn".to_string());

            Some(
                NewContentUpdate::new(Source::SocialFeed, UpdateKind::Post, text, published)
                    .url(format!("https://twitter.com/{}/status/{}", handle, id))
                    .author(author, Some(handle))
                    .meta("likes", post.favorite_count)
                    .meta("reposts", post.retweet_count)
                    .meta("replies", post.reply_count),
            )
        })
        .collect()
}

/// Mirror dates look like "Nov 23, 2024 · 4:05 PM UTC".
fn parse_mirror_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), "%b %d, %Y · %I:%M %p UTC")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector {}: {:?}", css, e))
}

fn scrape_mirror(html: &str, handle: &str, host: &str) -> Vec<NewContentUpdate> {
    let selectors = (
        selector(".timeline-item"),
        selector(".tweet-content"),
        selector(".tweet-date a"),
        selector(".tweet-link"),
    );
    let (Ok(item_sel), Ok(content_sel), Ok(date_sel), Ok(link_sel)) = selectors else {
        warn!("social: mirror selectors failed to compile");
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut posts = Vec::new();

    for item in document.select(&item_sel) {
        let content = item
            .select(&content_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        if content.chars().count() <= MIN_SCRAPED_CHARS {
            continue;
        }

        let published = item
            .select(&date_sel)
            .next()
            .and_then(|a| a.value().attr("title"))
            .and_then(parse_mirror_date)
            .unwrap_or_else(Utc::now);

        let mut post = NewContentUpdate::new(Source::SocialFeed, UpdateKind::Post, content, published)
            .author("Gensyn", Some(handle))
            .meta("scrapedFrom", host);
        if let Some(href) = item.select(&link_sel).next().and_then(|a| a.value().attr("href")) {
            post = post.url(format!("https://twitter.com{}", href));
        }
        posts.push(post);

        if posts.len() == MAX_POSTS {
            break;
        }
    }

    posts
}
