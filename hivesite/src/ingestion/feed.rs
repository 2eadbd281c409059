use anyhow::{Context, Result};
use chrono::Utc;
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use reqwest::Client;
use scraper::Html;

use crate::models::{NewContentUpdate, Source, UpdateKind};

/// Fetches a feed from the given URL and parses it (RSS or Atom).
/// A single attempt: non-success statuses and network errors are returned as-is.
pub async fn fetch_and_parse_feed(client: &Client, url: &str) -> Result<Feed> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("network error fetching feed {}", url))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("feed fetch failed with status: {}", status);
    }

    let bytes = response.bytes().await.context("failed to read response body")?;
    let feed = parser::parse(bytes.as_ref()).context("failed to parse feed")?;
    Ok(feed)
}

/// Collapse an HTML fragment to its visible text.
pub(crate) fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: Vec<&str> = fragment.root_element().text().collect();
    text.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn entry_to_update(entry: &Entry, source: Source, kind: UpdateKind) -> Option<NewContentUpdate> {
    let url = entry.links.first().map(|l| l.href.clone())?;
    let title = entry.title.as_ref().map(|t| t.content.trim().to_string());

    let body = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .map(|raw| html_to_text(&raw))
        .filter(|text| !text.is_empty())
        .or_else(|| title.clone())?;

    let published = entry.published.or(entry.updated).unwrap_or_else(Utc::now);

    let mut update = NewContentUpdate::new(source, kind, body, published).url(url);
    if let Some(title) = title.filter(|t| !t.is_empty()) {
        update = update.title(title);
    }
    if let Some(author) = entry.authors.first() {
        update = update.author(author.name.clone(), None);
    }
    let categories: Vec<String> = entry.categories.iter().map(|c| c.term.clone()).collect();
    if !categories.is_empty() {
        update = update.meta("tags", categories);
    }
    Some(update)
}

/// Map every linkable feed entry to a candidate update. Entries without a link are dropped.
pub fn feed_to_updates(feed: &Feed, source: Source, kind: UpdateKind) -> Vec<NewContentUpdate> {
    feed.entries
        .iter()
        .filter_map(|entry| entry_to_update(entry, source, kind))
        .collect()
}
