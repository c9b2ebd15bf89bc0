//! Article processors: description rewrites applied to parsed articles
//! before they are stored.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use super::domain::HttpsProbe;
use super::html;
use crate::feed::ParsedArticle;
use crate::Result;

/// Rewrites an article description.
#[async_trait]
pub trait ArticleProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// The rewritten description, or `None` when nothing changed.
    ///
    /// Runs on every fetch of an article, so rewriting an already
    /// rewritten description must yield `None`.
    async fn process(&self, article: &ParsedArticle) -> Result<Option<String>>;
}

/// Resolves relative `src`/`href` values against the article link.
pub struct AbsolutizeUrls;

#[async_trait]
impl ArticleProcessor for AbsolutizeUrls {
    fn name(&self) -> &'static str {
        "absolutize-urls"
    }

    async fn process(&self, article: &ParsedArticle) -> Result<Option<String>> {
        let Ok(base) = Url::parse(&article.link) else {
            return Ok(None);
        };
        Ok(html::rewrite_urls(&article.description, true, |value| {
            if value.is_empty() || value.starts_with('#') {
                return None;
            }
            match Url::parse(value) {
                Err(url::ParseError::RelativeUrlWithoutBase) => {
                    base.join(value).ok().map(|u| u.to_string())
                }
                _ => None,
            }
        }))
    }
}

/// Upgrades plain-HTTP `src` values to HTTPS for hosts known to serve it.
pub struct RelativeUrl {
    probe: Arc<HttpsProbe>,
}

impl RelativeUrl {
    pub fn new(probe: Arc<HttpsProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl ArticleProcessor for RelativeUrl {
    fn name(&self) -> &'static str {
        "relative-url"
    }

    async fn process(&self, article: &ParsedArticle) -> Result<Option<String>> {
        let mut capable: HashMap<String, bool> = HashMap::new();
        for src in html::image_sources(&article.description)
            .iter()
            .chain(script_like_sources(&article.description).iter())
        {
            if let Some(host) = http_host(src) {
                if !capable.contains_key(&host) {
                    let https = self.probe.supports_https(&host).await;
                    capable.insert(host, https);
                }
            }
        }
        if !capable.values().any(|c| *c) {
            return Ok(None);
        }

        Ok(html::rewrite_urls(&article.description, false, |value| {
            let host = http_host(value)?;
            capable
                .get(&host)
                .copied()
                .unwrap_or(false)
                .then(|| format!("https://{}", &value["http://".len()..]))
        }))
    }
}

/// Routes remaining plain-HTTP `src` values through a proxy URL template.
pub struct ProxyHttp {
    template: String,
}

impl ProxyHttp {
    /// `template` must contain a `{url}` placeholder.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl ArticleProcessor for ProxyHttp {
    fn name(&self) -> &'static str {
        "proxy-http"
    }

    async fn process(&self, article: &ParsedArticle) -> Result<Option<String>> {
        Ok(html::rewrite_urls(&article.description, false, |value| {
            http_host(value)?;
            Some(
                self.template
                    .replace("{url}", &urlencoding::encode(value)),
            )
        }))
    }
}

/// Lowercased host of an absolute `http://` URL.
fn http_host(value: &str) -> Option<String> {
    if !value.get(..7)?.eq_ignore_ascii_case("http://") {
        return None;
    }
    let url = Url::parse(value).ok()?;
    url.host_str().map(str::to_lowercase)
}

/// `src` values of embeds other than images.
fn script_like_sources(description: &str) -> Vec<String> {
    ["iframe", "video", "audio", "source", "embed"]
        .iter()
        .flat_map(|tag| html::find_tags(description, tag))
        .filter_map(|mut attrs| attrs.remove("src"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Domain, DomainRepository};
    use crate::http::build_probe_client;

    fn article(description: &str) -> ParsedArticle {
        ParsedArticle::new("https://example.com/posts/1").with_description(description)
    }

    #[tokio::test]
    async fn test_absolutize_urls() {
        let a = article(r##"<a href="../about">x</a><img src="img.png"><a href="#top">t</a>"##);
        let out = AbsolutizeUrls.process(&a).await.unwrap().unwrap();
        assert_eq!(
            out,
            r##"<a href="https://example.com/about">x</a><img src="https://example.com/posts/img.png"><a href="#top">t</a>"##
        );

        let unchanged = article(r#"<img src="https://cdn.example.com/a.png">"#);
        assert_eq!(AbsolutizeUrls.process(&unchanged).await.unwrap(), None);

        // A second pass over rewritten output is a no-op
        assert_eq!(AbsolutizeUrls.process(&article(&out)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_relative_url_upgrades_capable_hosts() {
        let db = Database::open_in_memory().await.unwrap();
        let domains = DomainRepository::new(db.pool());
        for (host, https) in [("secure.invalid", true), ("plain.invalid", false)] {
            domains
                .update(&Domain {
                    host: host.to_string(),
                    https,
                })
                .await
                .unwrap();
        }
        let processor = RelativeUrl::new(Arc::new(HttpsProbe::new(
            db,
            build_probe_client().unwrap(),
        )));

        let a = article(
            r#"<img src="http://secure.invalid/a.png"><img src="http://plain.invalid/b.png"><a href="http://secure.invalid/">l</a>"#,
        );
        let out = processor.process(&a).await.unwrap().unwrap();
        assert_eq!(
            out,
            r#"<img src="https://secure.invalid/a.png"><img src="http://plain.invalid/b.png"><a href="http://secure.invalid/">l</a>"#
        );

        let none = article(r#"<img src="http://plain.invalid/b.png">"#);
        assert_eq!(processor.process(&none).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_proxy_http() {
        let processor = ProxyHttp::new("/proxy?url={url}");
        let a = article(r#"<img src="http://x.example.com/a.png?s=1"><img src="https://y/b.png">"#);
        let out = processor.process(&a).await.unwrap().unwrap();
        assert_eq!(
            out,
            r#"<img src="/proxy?url=http%3A%2F%2Fx.example.com%2Fa.png%3Fs%3D1"><img src="https://y/b.png">"#
        );
        assert_eq!(processor.process(&article(&out)).await.unwrap(), None);
    }

    #[test]
    fn test_http_host() {
        assert_eq!(http_host("http://Example.COM/x").as_deref(), Some("example.com"));
        assert_eq!(http_host("https://example.com/x"), None);
        assert_eq!(http_host("/x"), None);
        assert_eq!(http_host(""), None);
    }
}
