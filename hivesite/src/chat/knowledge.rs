//! Static knowledge base and the "latest updates" appendix built from ingested content.

use crate::models::{ContentUpdate, Source};

/// Reference text injected into every chat prompt.
pub const KNOWLEDGE_BASE: &str = include_str!("../../knowledge/base.md");

const MAX_PER_SOURCE: usize = 5;
const BLOG_EXCERPT_CHARS: usize = 200;

/// Instructions wrapped around the knowledge base.
pub fn system_prompt(knowledge: &str) -> String {
    format!(
        r#"You are an AI assistant for Gensyn AI, a decentralized machine learning compute protocol.

CRITICAL RULES:
1. ONLY use information from the knowledge base provided below
2. NEVER make up or guess information
3. If something is not in the knowledge base, clearly say "I don't have information about that in my knowledge base"
4. Then refer users to official Gensyn sources: Twitter/X (@gensynai) or Discord (discord.com/invite/gensyn)
5. DO NOT provide general information, speculation, or unrelated answers

Here is the knowledge base (including the latest updates from social posts, the blog, the docs and the community):

{}

When answering:
- Use ONLY information from the knowledge base above
- When referencing recent updates, mention the source and date
- Keep responses concise but informative
- Use a friendly, professional tone"#,
        knowledge
    )
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn section_heading(source: Source) -> &'static str {
    match source {
        Source::SocialFeed => "### Recent Posts from @gensynai",
        Source::Blog => "### Recent Blog Posts",
        Source::Docs => "### Recent Documentation Updates",
        Source::Community => "### Recent Community Announcements",
    }
}

/// Render the most recent updates, grouped by source, at most five per source.
/// Returns an empty string when there is nothing to show.
pub fn latest_updates_section(updates: &[ContentUpdate]) -> String {
    if updates.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n\n## LATEST UPDATES\n\n");

    for source in Source::ALL {
        let entries: Vec<&ContentUpdate> = updates
            .iter()
            .filter(|u| u.source == source)
            .take(MAX_PER_SOURCE)
            .collect();
        if entries.is_empty() {
            continue;
        }

        out.push_str(section_heading(source));
        out.push('\n');

        for update in entries {
            let date = update.published_at.format("%Y-%m-%d");
            let title = update.title.as_deref().unwrap_or("Untitled");
            match source {
                Source::SocialFeed | Source::Community => {
                    out.push_str(&format!("- {}: {}\n", date, update.content));
                }
                Source::Blog => {
                    out.push_str(&format!("- **{}** ({})\n", title, date));
                    out.push_str(&format!("  {}\n", excerpt(&update.content, BLOG_EXCERPT_CHARS)));
                }
                Source::Docs => {
                    out.push_str(&format!("- **{}** ({})\n", title, date));
                }
            }
            if let Some(url) = &update.url {
                out.push_str(&format!("  Link: {}\n", url));
            }
        }
        out.push('\n');
    }

    out
}
