//! Social popularity providers.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::PopularityConfig;
use crate::error::{FeedcoreError, Result};

/// Reports a popularity count for an article.
#[async_trait]
pub trait ScoreProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Count for the article at `link`. `description` is the stored
    /// article description, for providers that score content.
    async fn score(&self, link: &str, description: &str) -> Result<i64>;
}

/// Reddit: sum of post scores and comment counts of submissions of the link.
pub struct RedditProvider {
    client: Client,
    endpoint: String,
}

impl RedditProvider {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ScoreProvider for RedditProvider {
    fn name(&self) -> &'static str {
        "reddit"
    }

    async fn score(&self, link: &str, _description: &str) -> Result<i64> {
        let body = get_json(&self.client, &self.endpoint, "url", link).await?;
        let children = body["data"]["children"].as_array().cloned().unwrap_or_default();
        Ok(children
            .iter()
            .map(|child| {
                let data = &child["data"];
                data["score"].as_i64().unwrap_or(0) + data["num_comments"].as_i64().unwrap_or(0)
            })
            .sum())
    }
}

/// Facebook Graph: share and comment counts of the link.
pub struct FacebookProvider {
    client: Client,
    endpoint: String,
}

impl FacebookProvider {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ScoreProvider for FacebookProvider {
    fn name(&self) -> &'static str {
        "facebook"
    }

    async fn score(&self, link: &str, _description: &str) -> Result<i64> {
        let body = get_json(&self.client, &self.endpoint, "id", link).await?;
        let share = &body["share"];
        Ok(share["share_count"].as_i64().unwrap_or(0) + share["comment_count"].as_i64().unwrap_or(0))
    }
}

/// Providers named in `config.providers`, in configuration order.
pub fn providers_from_config(
    config: &PopularityConfig,
    client: &Client,
) -> Vec<Arc<dyn ScoreProvider>> {
    config
        .providers
        .iter()
        .filter_map(|name| -> Option<Arc<dyn ScoreProvider>> {
            match name.as_str() {
                "reddit" => Some(Arc::new(RedditProvider::new(
                    client.clone(),
                    &config.reddit_endpoint,
                ))),
                "facebook" => Some(Arc::new(FacebookProvider::new(
                    client.clone(),
                    &config.facebook_endpoint,
                ))),
                _ => None,
            }
        })
        .collect()
}

async fn get_json(client: &Client, endpoint: &str, key: &str, link: &str) -> Result<Value> {
    let response = client.get(endpoint).query(&[(key, link)]).send().await?;
    if !response.status().is_success() {
        return Err(FeedcoreError::Http(format!(
            "HTTP Status: {}",
            response.status().as_u16()
        )));
    }
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| FeedcoreError::Parse(e.to_string()))
}
