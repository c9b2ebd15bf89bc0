//! Feed discovery.
//!
//! Resolves an arbitrary URL to one or more concrete feed endpoints: either
//! the URL is a feed itself, or it is an HTML page advertising feeds through
//! `<link rel="alternate">` tags.

use std::collections::{HashSet, VecDeque};

use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::content::html;
use crate::error::{FeedcoreError, Result};
use crate::feed::parser;
use crate::feed::types::DiscoveredFeed;

/// Upper bound on documents fetched for a single discovery.
const MAX_DOCUMENTS: usize = 16;

const FEED_TYPES: &[&str] = &["application/rss+xml", "application/atom+xml"];

/// Validate that `link` is an absolute http(s) URL and strip its fragment.
pub fn normalize_link(link: &str) -> Result<String> {
    let mut url = Url::parse(link.trim()).map_err(|_| FeedcoreError::NotAbsolute(link.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(FeedcoreError::NotAbsolute(link.to_string()));
    }
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Feed discoverer.
#[derive(Clone)]
pub struct Discoverer {
    client: Client,
}

impl Discoverer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Discover the feeds reachable from `link`.
    ///
    /// Returns `NoFeed` when nothing is found.
    pub async fn discover(&self, link: &str) -> Result<Vec<DiscoveredFeed>> {
        let start = normalize_link(link)?;
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([start.clone()]);
        let mut found = Vec::new();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) || visited.len() > MAX_DOCUMENTS {
                continue;
            }

            let body = match self.fetch(&current).await {
                Ok(body) => body,
                Err(e) if current == start => return Err(e),
                Err(e) => {
                    debug!("Skipping discovery candidate {}: {}", current, e);
                    continue;
                }
            };

            if let Ok(parsed) = parser::parse(&body, &current) {
                found.push(DiscoveredFeed {
                    link: current,
                    parsed,
                });
                continue;
            }

            let html = String::from_utf8_lossy(&body);
            for candidate in feed_links(&html, &current) {
                if !visited.contains(&candidate) {
                    queue.push_back(candidate);
                }
            }
        }

        if found.is_empty() {
            return Err(FeedcoreError::NoFeed(start));
        }
        Ok(found)
    }

    async fn fetch(&self, link: &str) -> Result<Vec<u8>> {
        let response = self.client.get(link).send().await?;
        if !response.status().is_success() {
            return Err(FeedcoreError::Http(format!(
                "HTTP Status: {}",
                response.status().as_u16()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Extract advertised feed links from an HTML document, resolved against
/// `base` and fragment-stripped, in document order without duplicates.
pub fn feed_links(html: &str, base: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base) else {
        return Vec::new();
    };
    let mut links: Vec<String> = Vec::new();

    for attrs in html::find_tags(html, "link") {
        let (Some(kind), Some(href)) = (attrs.get("type"), attrs.get("href")) else {
            continue;
        };
        if !FEED_TYPES.contains(&kind.to_lowercase().as_str()) || href.is_empty() {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);
        let resolved = resolved.to_string();
        if !links.contains(&resolved) {
            links.push(resolved);
        }
    }

    links
}
