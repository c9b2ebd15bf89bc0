//! Feed and article types.

use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::Serialize;

/// Canonical weekday names used in `skip_days`.
pub const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// A feed known to the system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feed {
    /// Stable identifier.
    pub id: i64,
    /// Absolute URL of the feed document. Unique.
    pub link: String,
    /// Feed title.
    pub title: String,
    /// Feed description.
    pub description: String,
    /// Link to the publisher's site.
    pub site_link: String,
    /// WebSub hub endpoint advertised by the feed.
    pub hub_link: Option<String>,
    /// Last fetch or parse failure. Empty on success.
    pub update_error: String,
    /// Last hub subscription failure. Empty on success.
    pub subscribe_error: String,
    /// Publisher refresh hint in minutes.
    pub ttl: Option<i64>,
    /// UTC hours (0-23) during which the feed is not polled.
    pub skip_hours: Vec<u32>,
    /// Weekdays during which the feed is not polled.
    pub skip_days: Vec<String>,
}

impl Feed {
    /// Whether a scheduled poll at `now` must be skipped.
    pub fn skips(&self, now: DateTime<Utc>) -> bool {
        if self.skip_hours.contains(&now.hour()) {
            return true;
        }
        let day = weekday_name(now.weekday());
        self.skip_days.iter().any(|d| d == day)
    }

    /// Polling interval for this feed: the larger of the global interval and
    /// the publisher TTL, never below `floor`.
    pub fn update_interval(&self, global: Duration, floor: Duration) -> Duration {
        let ttl = self
            .ttl
            .filter(|t| *t > 0)
            .map(|t| Duration::from_secs(t as u64 * 60))
            .unwrap_or_default();
        global.max(ttl).max(floor)
    }

    /// Copy publisher-controlled metadata from a freshly parsed document.
    ///
    /// `id` and `link` are never touched.
    pub fn refresh_from(&mut self, parsed: &ParsedFeed) {
        self.title = parsed.title.clone();
        self.description = parsed.description.clone();
        self.site_link = parsed.site_link.clone();
        self.hub_link = parsed.hub_link.clone();
        self.ttl = parsed.ttl;
        self.skip_hours = parsed.skip_hours.clone();
        self.skip_days = parsed.skip_days.clone();
    }
}

/// Data for creating a feed.
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub link: String,
    pub title: String,
    pub description: String,
    pub site_link: String,
    pub hub_link: Option<String>,
    pub ttl: Option<i64>,
    pub skip_hours: Vec<u32>,
    pub skip_days: Vec<String>,
}

impl NewFeed {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_hub_link(mut self, hub: impl Into<String>) -> Self {
        self.hub_link = Some(hub.into());
        self
    }

    /// Build a new feed from a parsed document found at `link`.
    pub fn from_parsed(link: impl Into<String>, parsed: &ParsedFeed) -> Self {
        Self {
            link: link.into(),
            title: parsed.title.clone(),
            description: parsed.description.clone(),
            site_link: parsed.site_link.clone(),
            hub_link: parsed.hub_link.clone(),
            ttl: parsed.ttl,
            skip_hours: parsed.skip_hours.clone(),
            skip_days: parsed.skip_days.clone(),
        }
    }
}

/// A persisted article.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    /// HTML description.
    pub description: String,
    /// Absolute link. Primary dedup key within a feed.
    pub link: String,
    pub date: Option<DateTime<Utc>>,
    /// Publisher GUID. Secondary dedup key within a feed.
    pub guid: Option<String>,
}

/// An article as seen by one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserArticle {
    #[serde(flatten)]
    pub article: Article,
    pub read: bool,
    pub favorite: bool,
    /// Aggregate popularity score, when requested.
    pub score: Option<f64>,
}

/// Parsed feed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub description: String,
    pub site_link: String,
    pub hub_link: Option<String>,
    /// Refresh hint in minutes.
    pub ttl: Option<i64>,
    pub skip_hours: Vec<u32>,
    pub skip_days: Vec<String>,
    pub articles: Vec<ParsedArticle>,
}

/// Article entry from a parsed document, before persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedArticle {
    pub title: String,
    pub description: String,
    pub link: String,
    pub date: Option<DateTime<Utc>>,
    pub guid: Option<String>,
}

impl ParsedArticle {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }
}

/// Result of one update cycle, delivered to monitors and update receivers.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedUpdate {
    pub feed: Feed,
    /// Articles persisted for the first time during this cycle.
    pub new_articles: Vec<Article>,
}

/// A feed endpoint found by discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredFeed {
    /// Absolute link of the feed document, fragment stripped.
    pub link: String,
    pub parsed: ParsedFeed,
}

/// Canonical English name of a weekday.
pub fn weekday_name(day: Weekday) -> &'static str {
    WEEKDAY_NAMES[day.num_days_from_monday() as usize]
}

/// Normalize a publisher-supplied weekday name (case-insensitive, full or
/// three-letter form).
pub fn normalize_weekday(name: &str) -> Option<&'static str> {
    let lower = name.trim().to_lowercase();
    if lower.len() < 3 {
        return None;
    }
    WEEKDAY_NAMES
        .iter()
        .find(|d| {
            let d = d.to_lowercase();
            d == lower || (lower.len() == 3 && d.starts_with(&lower))
        })
        .copied()
}
