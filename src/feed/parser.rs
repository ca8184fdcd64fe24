use std::collections::HashSet;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use scraper::Html;

use crate::error::{AppError, Result};
use crate::models::{item_id, NewItem};

/// Parses one feed payload (RSS 2.0, RSS 1.0 or Atom) into normalized items,
/// in feed order, deduplicated by item id (first occurrence wins).
///
/// `now` is the fallback for entries without a publication timestamp.
pub fn parse_feed(bytes: &[u8], now: DateTime<Utc>) -> Result<Vec<NewItem>> {
    let feed = parser::parse(bytes).map_err(AppError::parse)?;

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for entry in feed.entries {
        let title = entry.title.map(|t| t.content).unwrap_or_default();
        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default();

        // Prefer full content, fall back to the summary.
        let content_html = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content))
            .unwrap_or_default();
        let content = strip_tags(&content_html);

        let published = entry.published.or(entry.updated).unwrap_or(now);

        let id = item_id(&title, &link);
        if seen.insert(id.clone()) {
            items.push(NewItem {
                item_id: id,
                title,
                content,
                link,
                published,
            });
        }
    }
    Ok(items)
}

/// Deny-all sanitizer: drops every tag and returns the trimmed text content.
pub fn strip_tags(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Testavisen</title>
    <link>https://example.dk</link>
    <item>
      <title>Minister rasende over ny rapport</title>
      <link>https://example.dk/a/1</link>
      <description>&lt;p&gt;Rapporten &lt;b&gt;kritiserer&lt;/b&gt; ministeriet.&lt;/p&gt;</description>
      <pubDate>Mon, 06 Jan 2025 08:30:00 +0000</pubDate>
    </item>
    <item>
      <title>Minister rasende over ny rapport</title>
      <link>https://example.dk/a/1</link>
      <description>duplicate entry</description>
      <pubDate>Mon, 06 Jan 2025 08:31:00 +0000</pubDate>
    </item>
    <item>
      <title>Kommune dropper omstridt byggeri</title>
      <link>https://example.dk/a/2</link>
      <description>Ingen dato på denne.</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_and_dedups_by_item_id() {
        let now = Utc::now();
        let items = parse_feed(RSS.as_bytes(), now).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Minister rasende over ny rapport");
        assert_eq!(items[0].link, "https://example.dk/a/1");
        assert_eq!(
            items[0].item_id,
            item_id("Minister rasende over ny rapport", "https://example.dk/a/1")
        );
    }

    #[test]
    fn strips_html_from_content() {
        let items = parse_feed(RSS.as_bytes(), Utc::now()).unwrap();
        assert_eq!(items[0].content, "Rapporten kritiserer ministeriet.");
    }

    #[test]
    fn published_falls_back_to_now() {
        let now = Utc::now();
        let items = parse_feed(RSS.as_bytes(), now).unwrap();

        assert_eq!(
            items[0].published.to_rfc3339(),
            "2025-01-06T08:30:00+00:00"
        );
        assert_eq!(items[1].published, now);
    }

    #[test]
    fn parses_atom() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Testavisen</title>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>2025-01-06T09:00:00Z</updated>
  <entry>
    <title>Storm rammer Vestkysten</title>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <link href="https://example.dk/a/3"/>
    <updated>2025-01-06T09:00:00Z</updated>
    <summary>Vindstød af orkanstyrke.</summary>
  </entry>
</feed>"#;

        let items = parse_feed(atom.as_bytes(), Utc::now()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Storm rammer Vestkysten");
        assert_eq!(items[0].link, "https://example.dk/a/3");
        assert_eq!(items[0].content, "Vindstød af orkanstyrke.");
        assert_eq!(items[0].published.to_rfc3339(), "2025-01-06T09:00:00+00:00");
    }

    #[test]
    fn malformed_bytes_are_a_parse_error() {
        let result = parse_feed(b"this is not xml", Utc::now());
        assert!(matches!(result, Err(AppError::Parse(_))));
    }

    #[test]
    fn strip_tags_handles_nested_markup() {
        assert_eq!(
            strip_tags("<div><p>En <a href=\"#\">artikel</a> om <em>noget</em>.</p></div>"),
            "En artikel om noget."
        );
        assert_eq!(strip_tags("  ren tekst  "), "ren tekst");
        assert_eq!(strip_tags(""), "");
    }
}
