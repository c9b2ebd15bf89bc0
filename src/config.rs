//! Configuration module for feedcore.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{FeedcoreError, Result};

/// Monitor names accepted in `feed_manager.monitors`.
pub const KNOWN_MONITORS: &[&str] = &["unread", "thumbnailer", "index"];

/// Score provider names accepted in `popularity.providers`.
pub const KNOWN_PROVIDERS: &[&str] = &["reddit", "facebook"];

/// Article processor names accepted in `content.article_processors`.
pub const KNOWN_PROCESSORS: &[&str] = &["absolutize-urls", "relative-url", "proxy-http"];

/// Outbound HTTP timeout configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Connection establishment deadline in milliseconds.
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    /// Read/write deadline in milliseconds.
    #[serde(default = "default_read_write_ms")]
    pub read_write_ms: u64,
}

fn default_connect_ms() -> u64 {
    1000
}

fn default_read_write_ms() -> u64 {
    1000
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn read_write(&self) -> Duration {
        Duration::from_millis(self.read_write_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            read_write_ms: default_read_write_ms(),
        }
    }
}

/// Feed manager configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedManagerConfig {
    /// Global update interval in milliseconds.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Lower bound for any per-feed interval in milliseconds.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Attached monitors (unread, thumbnailer, index).
    #[serde(default = "default_monitors")]
    pub monitors: Vec<String>,
    /// Number of thumbnail workers per update.
    #[serde(default = "default_thumbnail_workers")]
    pub thumbnail_workers: usize,
}

fn default_update_interval_ms() -> u64 {
    30 * 60 * 1000 // 30 minutes
}

fn default_min_interval_ms() -> u64 {
    30 * 60 * 1000 // 30 minutes
}

fn default_monitors() -> Vec<String> {
    vec!["unread".to_string(), "thumbnailer".to_string()]
}

fn default_thumbnail_workers() -> usize {
    20
}

impl FeedManagerConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Whether the named monitor is enabled.
    pub fn has_monitor(&self, name: &str) -> bool {
        self.monitors.iter().any(|m| m == name)
    }
}

impl Default for FeedManagerConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            monitors: default_monitors(),
            thumbnail_workers: default_thumbnail_workers(),
        }
    }
}

/// WebSub (PubSubHubbub) configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubbubConfig {
    /// Public callback URL prefix. Empty disables push subscriptions.
    #[serde(default)]
    pub callback_url: String,
    /// Value of the `From` header sent to hubs.
    #[serde(default)]
    pub from: String,
}

impl HubbubConfig {
    pub fn is_configured(&self) -> bool {
        !self.callback_url.is_empty()
    }
}

/// Popularity scoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PopularityConfig {
    /// Delay between two scored articles in milliseconds.
    #[serde(default = "default_popularity_delay_ms")]
    pub delay_ms: u64,
    /// Interval between scoring passes in milliseconds.
    #[serde(default = "default_popularity_interval_ms")]
    pub interval_ms: u64,
    /// Enabled providers (reddit, facebook).
    #[serde(default)]
    pub providers: Vec<String>,
    /// Reddit info endpoint.
    #[serde(default = "default_reddit_endpoint")]
    pub reddit_endpoint: String,
    /// Facebook graph endpoint.
    #[serde(default = "default_facebook_endpoint")]
    pub facebook_endpoint: String,
}

fn default_popularity_delay_ms() -> u64 {
    5000
}

fn default_popularity_interval_ms() -> u64 {
    30 * 60 * 1000 // 30 minutes
}

fn default_reddit_endpoint() -> String {
    "https://www.reddit.com/api/info.json".to_string()
}

fn default_facebook_endpoint() -> String {
    "https://graph.facebook.com/".to_string()
}

impl PopularityConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PopularityConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_popularity_delay_ms(),
            interval_ms: default_popularity_interval_ms(),
            providers: Vec::new(),
            reddit_endpoint: default_reddit_endpoint(),
            facebook_endpoint: default_facebook_endpoint(),
        }
    }
}

/// Content enrichment configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    /// Article extractor (html, or empty to disable).
    #[serde(default = "default_extractor")]
    pub extractor: String,
    /// Thumbnail strategy (description, extract).
    #[serde(default = "default_thumbnailer")]
    pub thumbnailer: String,
    /// Search index provider (memory, or empty to disable).
    #[serde(default)]
    pub search_provider: String,
    /// Article processors applied to new articles, in order.
    #[serde(default = "default_article_processors")]
    pub article_processors: Vec<String>,
}

fn default_extractor() -> String {
    "html".to_string()
}

fn default_thumbnailer() -> String {
    "description".to_string()
}

fn default_article_processors() -> Vec<String> {
    vec!["relative-url".to_string()]
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            extractor: default_extractor(),
            thumbnailer: default_thumbnailer(),
            search_provider: String::new(),
            article_processors: default_article_processors(),
        }
    }
}

/// Feed parser configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedParserConfig {
    /// Proxy template for plain-HTTP resources, with a `{url}` placeholder.
    #[serde(default)]
    pub proxy_http_url_template: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/feedcore.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedcore.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Listener for the hub callback endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub feed_manager: FeedManagerConfig,
    #[serde(default)]
    pub hubbub: HubbubConfig,
    #[serde(default)]
    pub popularity: PopularityConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub feed_parser: FeedParserConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedcoreError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedcoreError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDCORE_HUBBUB_CALLBACK_URL`: Override the hub callback URL
    /// - `FEEDCORE_DATABASE_PATH`: Override the database path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FEEDCORE_HUBBUB_CALLBACK_URL") {
            if !url.is_empty() {
                self.hubbub.callback_url = url;
            }
        }
        if let Ok(path) = std::env::var("FEEDCORE_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.feed_manager.thumbnail_workers == 0 {
            return Err(FeedcoreError::Config(
                "feed_manager.thumbnail_workers must be at least 1".to_string(),
            ));
        }
        if self.feed_manager.update_interval_ms == 0 {
            return Err(FeedcoreError::Config(
                "feed_manager.update_interval_ms must be positive".to_string(),
            ));
        }
        check_names("feed_manager.monitors", &self.feed_manager.monitors, KNOWN_MONITORS)?;
        check_names("popularity.providers", &self.popularity.providers, KNOWN_PROVIDERS)?;
        check_names(
            "content.article_processors",
            &self.content.article_processors,
            KNOWN_PROCESSORS,
        )?;
        match self.content.thumbnailer.as_str() {
            "description" | "extract" => {}
            other => {
                return Err(FeedcoreError::Config(format!(
                    "unknown content.thumbnailer: {other}"
                )))
            }
        }
        match self.content.extractor.as_str() {
            "" | "html" => {}
            other => {
                return Err(FeedcoreError::Config(format!(
                    "unknown content.extractor: {other}"
                )))
            }
        }
        match self.content.search_provider.as_str() {
            "" | "memory" => {}
            other => {
                return Err(FeedcoreError::Config(format!(
                    "unknown content.search_provider: {other}"
                )))
            }
        }
        if self.content.thumbnailer == "extract" && self.content.extractor.is_empty() {
            return Err(FeedcoreError::Config(
                "content.thumbnailer = \"extract\" requires content.extractor".to_string(),
            ));
        }
        if self.hubbub.is_configured() {
            let url = url::Url::parse(&self.hubbub.callback_url).map_err(|e| {
                FeedcoreError::Config(format!("invalid hubbub.callback_url: {e}"))
            })?;
            if url.cannot_be_a_base() {
                return Err(FeedcoreError::Config(
                    "hubbub.callback_url must be an absolute http(s) URL".to_string(),
                ));
            }
        }
        if self
            .content
            .article_processors
            .iter()
            .any(|p| p == "proxy-http")
            && !self.feed_parser.proxy_http_url_template.contains("{url}")
        {
            return Err(FeedcoreError::Config(
                "proxy-http requires feed_parser.proxy_http_url_template with a {url} placeholder"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn check_names(key: &str, names: &[String], known: &[&str]) -> Result<()> {
    for name in names {
        if !known.contains(&name.as_str()) {
            return Err(FeedcoreError::Config(format!("unknown {key} entry: {name}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.timeout.connect_ms, 1000);
        assert_eq!(config.timeout.read_write_ms, 1000);

        assert_eq!(config.feed_manager.update_interval(), Duration::from_secs(1800));
        assert_eq!(config.feed_manager.min_interval(), Duration::from_secs(1800));
        assert_eq!(config.feed_manager.monitors, vec!["unread", "thumbnailer"]);
        assert_eq!(config.feed_manager.thumbnail_workers, 20);

        assert!(!config.hubbub.is_configured());
        assert!(config.hubbub.from.is_empty());

        assert_eq!(config.popularity.delay(), Duration::from_secs(5));
        assert_eq!(config.popularity.interval(), Duration::from_secs(1800));
        assert!(config.popularity.providers.is_empty());

        assert_eq!(config.content.extractor, "html");
        assert_eq!(config.content.thumbnailer, "description");
        assert!(config.content.search_provider.is_empty());
        assert_eq!(config.content.article_processors, vec!["relative-url"]);

        assert!(config.feed_parser.proxy_http_url_template.is_empty());
        assert_eq!(config.database.path, "data/feedcore.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/feedcore.log");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[timeout]
connect_ms = 2000
read_write_ms = 3000

[feed_manager]
update_interval_ms = 60000
min_interval_ms = 1000
monitors = ["unread", "index"]
thumbnail_workers = 4

[hubbub]
callback_url = "https://reader.example.com/hubbub"
from = "admin@example.com"

[popularity]
delay_ms = 100
providers = ["reddit", "facebook"]

[content]
extractor = "html"
thumbnailer = "extract"
search_provider = "memory"
article_processors = ["absolutize-urls", "relative-url", "proxy-http"]

[feed_parser]
proxy_http_url_template = "/proxy?url={url}"

[database]
path = "custom/feeds.db"

[logging]
level = "debug"
file = "custom/feedcore.log"

[server]
host = "127.0.0.1"
port = 9090
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.timeout.connect(), Duration::from_secs(2));
        assert_eq!(config.timeout.read_write(), Duration::from_secs(3));
        assert_eq!(config.feed_manager.update_interval_ms, 60000);
        assert_eq!(config.feed_manager.min_interval_ms, 1000);
        assert!(config.feed_manager.has_monitor("index"));
        assert!(!config.feed_manager.has_monitor("thumbnailer"));
        assert_eq!(config.feed_manager.thumbnail_workers, 4);
        assert_eq!(
            config.hubbub.callback_url,
            "https://reader.example.com/hubbub"
        );
        assert_eq!(config.hubbub.from, "admin@example.com");
        assert_eq!(config.popularity.delay_ms, 100);
        assert_eq!(config.popularity.providers.len(), 2);
        assert_eq!(config.content.thumbnailer, "extract");
        assert_eq!(config.content.search_provider, "memory");
        assert_eq!(config.content.article_processors.len(), 3);
        assert_eq!(
            config.feed_parser.proxy_http_url_template,
            "/proxy?url={url}"
        );
        assert_eq!(config.database.path, "custom/feeds.db");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[feed_manager]
thumbnail_workers = 8
"#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.feed_manager.thumbnail_workers, 8);
        assert_eq!(config.feed_manager.update_interval_ms, 30 * 60 * 1000);
        assert_eq!(config.timeout.connect_ms, 1000);
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.database.path, "data/feedcore.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("[timeout\nconnect_ms = ");
        assert!(result.is_err());
        if let Err(FeedcoreError::Config(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(FeedcoreError::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedcore.toml");
        std::fs::write(&path, "[database]\npath = \"x.db\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.path, "x.db");
    }

    #[test]
    fn test_apply_env_overrides() {
        let original = std::env::var("FEEDCORE_HUBBUB_CALLBACK_URL").ok();

        std::env::set_var("FEEDCORE_HUBBUB_CALLBACK_URL", "https://env.example.com/cb");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.hubbub.callback_url, "https://env.example.com/cb");

        std::env::set_var("FEEDCORE_HUBBUB_CALLBACK_URL", "");
        let mut config = Config::default();
        config.hubbub.callback_url = "https://file.example.com/cb".to_string();
        config.apply_env_overrides();
        assert_eq!(config.hubbub.callback_url, "https://file.example.com/cb");

        if let Some(val) = original {
            std::env::set_var("FEEDCORE_HUBBUB_CALLBACK_URL", val);
        } else {
            std::env::remove_var("FEEDCORE_HUBBUB_CALLBACK_URL");
        }
    }

    #[test]
    fn test_validate_zero_workers() {
        let mut config = Config::default();
        config.feed_manager.thumbnail_workers = 0;
        assert!(matches!(config.validate(), Err(FeedcoreError::Config(_))));
    }

    #[test]
    fn test_validate_unknown_names() {
        let mut config = Config::default();
        config.popularity.providers = vec!["myspace".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("myspace"));

        let mut config = Config::default();
        config.feed_manager.monitors = vec!["bogus".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.content.thumbnailer = "magic".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_callback_url() {
        let mut config = Config::default();
        config.hubbub.callback_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.hubbub.callback_url = "https://example.com/hubbub".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_proxy_template() {
        let mut config = Config::default();
        config.content.article_processors = vec!["proxy-http".to_string()];
        assert!(config.validate().is_err());

        config.feed_parser.proxy_http_url_template = "/proxy?url={url}".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_extract_thumbnailer_needs_extractor() {
        let mut config = Config::default();
        config.content.thumbnailer = "extract".to_string();
        config.content.extractor = String::new();
        assert!(config.validate().is_err());
    }
}
