//! Article content extraction.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::html;
use crate::db::{Database, Extract, ExtractRepository};
use crate::error::{FeedcoreError, Result};
use crate::feed::Article;

/// Longest extracted text kept, in characters.
const MAX_CONTENT_CHARS: usize = 20_000;

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").expect("valid regex"))
}

/// Content containers, most specific first.
fn section_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        ["article", "main", "body"]
            .iter()
            .map(|tag| {
                Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*)</{tag}>")).expect("valid regex")
            })
            .collect()
    })
}

/// Produces readable content for an article.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, article: &Article) -> Result<Extract>;
}

/// Extractor that reads the article page's own markup: title, Open Graph
/// image, document language and visible text.
pub struct HtmlExtractor {
    client: Client,
}

impl HtmlExtractor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Extractor for HtmlExtractor {
    async fn extract(&self, article: &Article) -> Result<Extract> {
        let response = self.client.get(&article.link).send().await?;
        if !response.status().is_success() {
            return Err(FeedcoreError::Http(format!(
                "HTTP Status: {}",
                response.status().as_u16()
            )));
        }
        let body = response.text().await?;
        Ok(extract_from_html(article.id, &article.link, &body))
    }
}

/// Extract content from an already fetched page.
pub fn extract_from_html(article_id: i64, link: &str, page: &str) -> Extract {
    let metas = html::find_tags(page, "meta");
    let meta = |key: &str| {
        metas
            .iter()
            .find(|m| {
                m.get("property").or_else(|| m.get("name")).map(String::as_str) == Some(key)
            })
            .and_then(|m| m.get("content"))
            .filter(|c| !c.is_empty())
            .cloned()
    };

    let title = meta("og:title")
        .or_else(|| {
            title_re()
                .captures(page)
                .map(|c| html::visible_text(&c[1]))
        })
        .unwrap_or_default();

    let base = Url::parse(link).ok();
    let resolve = |src: String| match (&base, Url::parse(&src)) {
        (_, Ok(u)) => Some(u.to_string()),
        (Some(b), Err(url::ParseError::RelativeUrlWithoutBase)) => {
            b.join(&src).ok().map(|u| u.to_string())
        }
        _ => None,
    };

    let body = section_res()
        .iter()
        .find_map(|re| re.captures(page).map(|c| c[1].to_string()))
        .unwrap_or_else(|| page.to_string());

    let top_image = meta("og:image")
        .or_else(|| html::image_sources(&body).into_iter().next())
        .and_then(resolve)
        .unwrap_or_default();

    let language = html::find_tags(page, "html")
        .into_iter()
        .next()
        .and_then(|mut attrs| attrs.remove("lang"))
        .unwrap_or_default();

    let content: String = html::visible_text(&body)
        .chars()
        .take(MAX_CONTENT_CHARS)
        .collect();

    Extract {
        article_id,
        title,
        content,
        top_image,
        language,
        processed: true,
    }
}

/// Stored extract of `article`, extracting and storing it on first use.
///
/// A failed extraction is stored as an empty processed extract so it is not
/// retried on every access.
pub async fn extract_for_article(
    db: &Database,
    extractor: &dyn Extractor,
    article: &Article,
) -> Result<Extract> {
    let repo = ExtractRepository::new(db.pool());
    match repo.get(article.id).await {
        Ok(extract) => return Ok(extract),
        Err(FeedcoreError::NoContent) => {}
        Err(e) => return Err(e),
    }

    let extract = match extractor.extract(article).await {
        Ok(extract) => extract,
        Err(e) => {
            debug!("Extraction of {} failed: {}", article.link, e);
            Extract {
                article_id: article.id,
                processed: true,
                ..Default::default()
            }
        }
    };
    repo.update(&extract).await?;
    Ok(extract)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FeedRepository;
    use crate::feed::{NewFeed, ParsedArticle};
    use crate::http::build_client;
    use crate::config::TimeoutConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <title>Fallback &amp; title</title>
  <meta property="og:image" content="/images/top.jpg">
</head>
<body>
  <nav>Menu</nav>
  <article><h1>Heading</h1><p>First paragraph.</p><img src="inline.png"></article>
</body>
</html>"#;

    #[test]
    fn test_extract_from_html() {
        let extract = extract_from_html(7, "https://example.com/posts/1", PAGE);

        assert_eq!(extract.article_id, 7);
        assert_eq!(extract.title, "Fallback & title");
        assert_eq!(extract.top_image, "https://example.com/images/top.jpg");
        assert_eq!(extract.language, "en");
        assert_eq!(extract.content, "Heading First paragraph.");
        assert!(extract.processed);
    }

    #[test]
    fn test_extract_prefers_og_title_and_falls_back_to_img() {
        let page = r#"<html><head><meta name="og:title" content="OG"></head>
<body><p>x</p><img src="https://cdn.example.com/a.png"></body></html>"#;
        let extract = extract_from_html(1, "https://example.com/", page);
        assert_eq!(extract.title, "OG");
        assert_eq!(extract.top_image, "https://cdn.example.com/a.png");
        assert!(extract.language.is_empty());
    }

    #[tokio::test]
    async fn test_extract_for_article_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let db = Database::open_in_memory().await.unwrap();
        let feeds = FeedRepository::new(db.pool());
        let feed = feeds.create(&NewFeed::new(server.uri())).await.unwrap();
        let link = format!("{}/posts/1", server.uri());
        let article = feeds
            .update(&feed, &[ParsedArticle::new(link)])
            .await
            .unwrap()
            .remove(0);

        let extractor = HtmlExtractor::new(build_client(&TimeoutConfig::default()).unwrap());
        let first = extract_for_article(&db, &extractor, &article).await.unwrap();
        let second = extract_for_article(&db, &extractor, &article).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.language, "en");
    }

    #[tokio::test]
    async fn test_failed_extraction_is_stored_as_processed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let db = Database::open_in_memory().await.unwrap();
        let feeds = FeedRepository::new(db.pool());
        let feed = feeds.create(&NewFeed::new(server.uri())).await.unwrap();
        let article = feeds
            .update(&feed, &[ParsedArticle::new(format!("{}/gone", server.uri()))])
            .await
            .unwrap()
            .remove(0);

        let extractor = HtmlExtractor::new(build_client(&TimeoutConfig::default()).unwrap());
        let extract = extract_for_article(&db, &extractor, &article).await.unwrap();
        assert!(extract.processed);
        assert!(extract.content.is_empty());
    }
}
