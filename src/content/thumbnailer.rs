//! Article thumbnails.
//!
//! A thumbnail is the first sufficiently large image associated with an
//! article, scaled down to fit 380x285 and stored as a `data:` URI.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{Frame, ImageFormat};
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::extractor::{extract_for_article, Extractor};
use super::html;
use crate::db::{Database, Thumbnail, ThumbnailRepository};
use crate::error::{FeedcoreError, Result};
use crate::feed::Article;

pub const THUMBNAIL_WIDTH: u32 = 380;
pub const THUMBNAIL_HEIGHT: u32 = 285;

/// Images with an area at or below this are not thumbnail candidates.
pub const MIN_SOURCE_AREA: u64 = 320 * 240;

const JPEG_QUALITY: u8 = 80;

/// Generates and stores the thumbnail of an article.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn generate(&self, article: &Article) -> Result<()>;
}

/// Thumbnails from the images embedded in the article description.
pub struct DescriptionThumbnailer {
    db: Database,
    images: ImageSource,
}

impl DescriptionThumbnailer {
    pub fn new(db: Database, client: Client) -> Self {
        Self {
            db,
            images: ImageSource { client },
        }
    }
}

#[async_trait]
impl Thumbnailer for DescriptionThumbnailer {
    async fn generate(&self, article: &Article) -> Result<()> {
        let repo = ThumbnailRepository::new(self.db.pool());
        if already_processed(&repo, article.id).await? {
            return Ok(());
        }

        let found = self.images.first_thumbnail(description_images(article)).await;
        repo.update(&finish(article.id, found)).await
    }
}

/// Thumbnails from the description, falling back to the top image of the
/// article's extract.
pub struct ExtractThumbnailer {
    db: Database,
    images: ImageSource,
    extractor: Arc<dyn Extractor>,
}

impl ExtractThumbnailer {
    pub fn new(db: Database, client: Client, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            db,
            images: ImageSource { client },
            extractor,
        }
    }
}

#[async_trait]
impl Thumbnailer for ExtractThumbnailer {
    async fn generate(&self, article: &Article) -> Result<()> {
        let repo = ThumbnailRepository::new(self.db.pool());
        if already_processed(&repo, article.id).await? {
            return Ok(());
        }

        let mut found = self.images.first_thumbnail(description_images(article)).await;
        if found.is_none() {
            let extract = extract_for_article(&self.db, self.extractor.as_ref(), article).await?;
            if !extract.top_image.is_empty() {
                found = self.images.first_thumbnail(vec![extract.top_image]).await;
            }
        }
        repo.update(&finish(article.id, found)).await
    }
}

async fn already_processed(repo: &ThumbnailRepository<'_>, article_id: i64) -> Result<bool> {
    match repo.get(article_id).await {
        Ok(thumbnail) => Ok(thumbnail.processed),
        Err(FeedcoreError::NoContent) => Ok(false),
        Err(e) => Err(e),
    }
}

fn finish(article_id: i64, found: Option<(String, String)>) -> Thumbnail {
    let (thumbnail, link) = found.unwrap_or_default();
    Thumbnail {
        article_id,
        thumbnail,
        link,
        processed: true,
    }
}

/// Absolute http(s) image sources of the article description.
fn description_images(article: &Article) -> Vec<String> {
    html::image_sources(&article.description)
        .into_iter()
        .filter(|src| {
            Url::parse(src)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false)
        })
        .collect()
}

/// Downloads candidate images and turns the first usable one into a
/// thumbnail.
struct ImageSource {
    client: Client,
}

impl ImageSource {
    /// `(data URI, source link)` of the first candidate that yields a
    /// thumbnail.
    async fn first_thumbnail(&self, candidates: Vec<String>) -> Option<(String, String)> {
        for link in candidates {
            let bytes = match self.download(&link).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("Skipping thumbnail candidate {}: {}", link, e);
                    continue;
                }
            };

            let made = tokio::task::spawn_blocking(move || make_thumbnail(&bytes))
                .await
                .map_err(|e| FeedcoreError::Image(format!("thumbnail task failed: {e}")));
            match made {
                Ok(Ok(Some(uri))) => return Some((uri, link)),
                Ok(Ok(None)) => {}
                Ok(Err(e)) | Err(e) => debug!("Skipping thumbnail candidate {}: {}", link, e),
            }
        }
        None
    }

    async fn download(&self, link: &str) -> Result<Vec<u8>> {
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

/// Decode `bytes` and produce a thumbnail `data:` URI.
///
/// Returns `None` when the image is too small to be a candidate. GIF
/// sources keep their format (first frame only); everything else becomes
/// a JPEG.
pub fn make_thumbnail(bytes: &[u8]) -> Result<Option<String>> {
    let format = image::guess_format(bytes)?;
    let img = image::load_from_memory_with_format(bytes, format)?;

    if u64::from(img.width()) * u64::from(img.height()) <= MIN_SOURCE_AREA {
        return Ok(None);
    }

    let img = if img.width() > THUMBNAIL_WIDTH || img.height() > THUMBNAIL_HEIGHT {
        img.resize(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT, FilterType::Lanczos3)
    } else {
        img
    };

    let mut buf = Vec::new();
    let mime = if format == ImageFormat::Gif {
        GifEncoder::new(Cursor::new(&mut buf)).encode_frame(Frame::new(img.to_rgba8()))?;
        "image/gif"
    } else {
        JpegEncoder::new_with_quality(Cursor::new(&mut buf), JPEG_QUALITY)
            .encode_image(&img.to_rgb8())?;
        "image/jpeg"
    };

    Ok(Some(format!("data:{};base64,{}", mime, STANDARD.encode(&buf))))
}
