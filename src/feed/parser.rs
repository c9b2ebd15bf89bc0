//! Feed document parsing.
//!
//! RSS 2.0, Atom and RSS 1.0 are detected by `feed-rs`. Channel elements the
//! parser does not model (`skipHours`, `skipDays` and, for RSS, hub links
//! carried in `atom:link`) are read from the raw document.

use std::sync::OnceLock;

use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use regex::Regex;
use url::Url;

use crate::error::{FeedcoreError, Result};
use crate::feed::types::{normalize_weekday, ParsedArticle, ParsedFeed};

fn skip_hours_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<skipHours\b[^>]*>(.*?)</skipHours>").expect("valid regex"))
}

fn skip_days_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<skipDays\b[^>]*>(.*?)</skipDays>").expect("valid regex"))
}

fn hour_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<hour>\s*(\d{1,2})\s*</hour>").expect("valid regex"))
}

fn day_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<day>\s*([A-Za-z]+)\s*</day>").expect("valid regex"))
}

fn hub_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<(?:atom:)?link\b[^>]*\brel\s*=\s*["']hub["'][^>]*>"#)
            .expect("valid regex")
    })
}

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?is)\bhref\s*=\s*["']([^"']+)["']"#).expect("valid regex"))
}

// Entries without an id keep an empty one instead of a synthesized hash,
// so link-only items match by link.
fn document_parser() -> parser::Parser {
    parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
}

/// Parse a feed body.
///
/// `base` is the feed's own link; relative article links are resolved
/// against it. Entries without a usable link are dropped.
pub fn parse(body: &[u8], base: &str) -> Result<ParsedFeed> {
    let feed = document_parser()
        .parse(body)
        .map_err(|e| FeedcoreError::Parse(e.to_string()))?;
    let raw = String::from_utf8_lossy(body);
    let base = Url::parse(base).ok();

    let hub_link = find_rel(&feed.links, "hub")
        .map(|l| l.href.clone())
        .or_else(|| scan_hub_link(&raw));

    let site_link = feed
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .map(|l| l.href.clone())
        .unwrap_or_default();

    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| convert_entry(entry, base.as_ref()))
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        description: feed.description.map(|d| d.content).unwrap_or_default(),
        site_link,
        hub_link,
        ttl: feed.ttl.map(i64::from),
        skip_hours: scan_skip_hours(&raw),
        skip_days: scan_skip_days(&raw),
        articles,
    })
}

/// Whether a body parses as a feed document at all.
pub fn is_feed(body: &[u8]) -> bool {
    document_parser().parse(body).is_ok()
}

fn find_rel<'a>(links: &'a [Link], rel: &str) -> Option<&'a Link> {
    links.iter().find(|l| l.rel.as_deref() == Some(rel))
}

fn convert_entry(entry: Entry, base: Option<&Url>) -> Option<ParsedArticle> {
    let href = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .or_else(|| {
            // Permalink GUIDs double as links.
            Url::parse(&entry.id)
                .ok()
                .filter(|u| matches!(u.scheme(), "http" | "https"))
                .map(|u| u.to_string())
        })?;

    let link = absolutize(&href, base)?;
    let description = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.map(|s| s.content))
        .unwrap_or_default();
    let guid = Some(entry.id).filter(|id| !id.is_empty());

    Some(ParsedArticle {
        title: entry.title.map(|t| t.content).unwrap_or_default(),
        description,
        link,
        date: entry.published.or(entry.updated),
        guid,
    })
}

fn absolutize(href: &str, base: Option<&Url>) -> Option<String> {
    match Url::parse(href) {
        Ok(u) => Some(u.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            base.and_then(|b| b.join(href).ok()).map(|u| u.to_string())
        }
        Err(_) => None,
    }
}

fn scan_hub_link(raw: &str) -> Option<String> {
    let tag = hub_link_re().find(raw)?;
    href_re()
        .captures(tag.as_str())
        .map(|c| c[1].trim().to_string())
}

fn scan_skip_hours(raw: &str) -> Vec<u32> {
    let Some(block) = skip_hours_re().captures(raw) else {
        return Vec::new();
    };
    let mut hours: Vec<u32> = hour_re()
        .captures_iter(&block[1])
        .filter_map(|c| c[1].parse::<u32>().ok())
        .map(|h| if h == 24 { 0 } else { h })
        .filter(|h| *h < 24)
        .collect();
    hours.sort_unstable();
    hours.dedup();
    hours
}

fn scan_skip_days(raw: &str) -> Vec<String> {
    let Some(block) = skip_days_re().captures(raw) else {
        return Vec::new();
    };
    let mut days: Vec<String> = Vec::new();
    for c in day_re().captures_iter(&block[1]) {
        if let Some(day) = normalize_weekday(&c[1]) {
            if !days.iter().any(|d| d == day) {
                days.push(day.to_string());
            }
        }
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Example</title>
    <link>https://example.com/</link>
    <description>An example feed</description>
    <atom:link rel="hub" href="https://hub.example.com/"/>
    <ttl>90</ttl>
    <skipHours><hour>1</hour><hour>2</hour><hour>24</hour></skipHours>
    <skipDays><day>Saturday</day><day>sunday</day></skipDays>
    <item>
      <title>First</title>
      <link>https://example.com/1</link>
      <guid>urn:first</guid>
      <description>&lt;p&gt;Hello&lt;/p&gt;</description>
      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>/2</link>
      <guid>urn:second</guid>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <link href="https://atom.example.com/"/>
  <link rel="hub" href="https://pubsubhubbub.example.com/"/>
  <id>urn:atom-example</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <title>Entry</title>
    <link href="https://atom.example.com/entry"/>
    <id>urn:entry</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <content type="html">&lt;b&gt;body&lt;/b&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_channel() {
        let feed = parse(RSS.as_bytes(), "https://example.com/feed.xml").unwrap();

        assert_eq!(feed.title, "Example");
        assert_eq!(feed.description, "An example feed");
        assert_eq!(feed.hub_link.as_deref(), Some("https://hub.example.com/"));
        assert_eq!(feed.ttl, Some(90));
        assert_eq!(feed.skip_hours, vec![0, 1, 2]);
        assert_eq!(feed.skip_days, vec!["Saturday", "Sunday"]);
    }

    #[test]
    fn test_parse_rss_items() {
        let feed = parse(RSS.as_bytes(), "https://example.com/feed.xml").unwrap();

        assert_eq!(feed.articles.len(), 2);
        let first = &feed.articles[0];
        assert_eq!(first.title, "First");
        assert_eq!(first.link, "https://example.com/1");
        assert_eq!(first.guid.as_deref(), Some("urn:first"));
        assert_eq!(first.description, "<p>Hello</p>");
        assert!(first.date.is_some());

        // Relative links resolve against the feed link
        assert_eq!(feed.articles[1].link, "https://example.com/2");
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse(ATOM.as_bytes(), "https://atom.example.com/feed").unwrap();

        assert_eq!(feed.title, "Atom Example");
        assert_eq!(feed.site_link, "https://atom.example.com/");
        assert_eq!(
            feed.hub_link.as_deref(),
            Some("https://pubsubhubbub.example.com/")
        );
        assert_eq!(feed.articles.len(), 1);
        assert_eq!(feed.articles[0].guid.as_deref(), Some("urn:entry"));
        assert_eq!(feed.articles[0].description, "<b>body</b>");
        assert!(feed.skip_hours.is_empty());
        assert_eq!(feed.ttl, None);
    }

    #[test]
    fn test_parse_items_without_guid() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>No guids</title>
    <link>https://example.com/</link>
    <item>
      <title>Plain</title>
      <link>https://example.com/plain</link>
    </item>
  </channel>
</rss>"#;
        let feed = parse(rss.as_bytes(), "https://example.com/feed.xml").unwrap();

        assert_eq!(feed.articles.len(), 1);
        assert_eq!(feed.articles[0].link, "https://example.com/plain");
        assert_eq!(feed.articles[0].guid, None);
    }

    #[test]
    fn test_parse_invalid() {
        let result = parse(b"<html><body>nope</body></html>", "https://example.com/");
        assert!(matches!(result, Err(FeedcoreError::Parse(_))));
        assert!(!is_feed(b"not xml at all"));
        assert!(is_feed(RSS.as_bytes()));
    }

    #[test]
    fn test_scan_hub_link_attribute_order() {
        let raw = r#"<atom:link href="https://hub.example.org/" rel="hub" />"#;
        assert_eq!(
            scan_hub_link(raw).as_deref(),
            Some("https://hub.example.org/")
        );
        assert_eq!(scan_hub_link("<link rel=\"self\" href=\"x\"/>"), None);
    }

    #[test]
    fn test_scan_skip_days_ignores_garbage() {
        let raw = "<skipDays><day>Caturday</day><day>Mon</day><day>monday</day></skipDays>";
        assert_eq!(scan_skip_days(raw), vec!["Monday"]);
    }
}
