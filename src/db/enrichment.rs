//! Per-article enrichment entities: popularity scores, extracts and
//! thumbnails. A missing row reads as `NoContent`.

use serde::Serialize;

use super::DbPool;
use crate::{FeedcoreError, Result};

/// Popularity scores of an article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct Scores {
    pub article_id: i64,
    /// Aggregate score.
    pub score: f64,
    /// Day-0 bucket.
    pub score1: i64,
    pub score2: i64,
    pub score3: i64,
    pub score4: i64,
    /// Bucket for day 4 and later.
    pub score5: i64,
}

impl Scores {
    pub fn new(article_id: i64) -> Self {
        Self {
            article_id,
            ..Default::default()
        }
    }

    pub fn buckets(&self) -> [i64; 5] {
        [self.score1, self.score2, self.score3, self.score4, self.score5]
    }

    pub fn set_buckets(&mut self, buckets: [i64; 5]) {
        [self.score1, self.score2, self.score3, self.score4, self.score5] = buckets;
    }
}

/// Readable content extracted from an article's page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct Extract {
    pub article_id: i64,
    pub title: String,
    pub content: String,
    pub top_image: String,
    pub language: String,
    /// Extraction was attempted, even if it found nothing.
    pub processed: bool,
}

/// Thumbnail of an article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct Thumbnail {
    pub article_id: i64,
    /// `data:` URI of the resized image. Empty when none was found.
    pub thumbnail: String,
    /// Source image link.
    pub link: String,
    /// Generation was attempted, even if it found nothing.
    pub processed: bool,
}

/// Repository for article scores.
pub struct ScoresRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> ScoresRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, article_id: i64) -> Result<Scores> {
        sqlx::query_as::<_, Scores>(
            "SELECT article_id, score, score1, score2, score3, score4, score5 \
             FROM articles_scores WHERE article_id = ?",
        )
        .bind(article_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(FeedcoreError::NoContent)
    }

    pub async fn update(&self, scores: &Scores) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO articles_scores (article_id, score, score1, score2, score3, score4, score5)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(article_id) DO UPDATE SET
                score = excluded.score, score1 = excluded.score1, score2 = excluded.score2,
                score3 = excluded.score3, score4 = excluded.score4, score5 = excluded.score5
            "#,
        )
        .bind(scores.article_id)
        .bind(scores.score)
        .bind(scores.score1)
        .bind(scores.score2)
        .bind(scores.score3)
        .bind(scores.score4)
        .bind(scores.score5)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}

/// Repository for article extracts.
pub struct ExtractRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> ExtractRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, article_id: i64) -> Result<Extract> {
        sqlx::query_as::<_, Extract>(
            "SELECT article_id, title, content, top_image, language, processed \
             FROM articles_extracts WHERE article_id = ?",
        )
        .bind(article_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(FeedcoreError::NoContent)
    }

    pub async fn update(&self, extract: &Extract) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO articles_extracts (article_id, title, content, top_image, language, processed)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(article_id) DO UPDATE SET
                title = excluded.title, content = excluded.content,
                top_image = excluded.top_image, language = excluded.language,
                processed = excluded.processed
            "#,
        )
        .bind(extract.article_id)
        .bind(&extract.title)
        .bind(&extract.content)
        .bind(&extract.top_image)
        .bind(&extract.language)
        .bind(extract.processed)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}

/// Repository for article thumbnails.
pub struct ThumbnailRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> ThumbnailRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, article_id: i64) -> Result<Thumbnail> {
        sqlx::query_as::<_, Thumbnail>(
            "SELECT article_id, thumbnail, link, processed \
             FROM articles_thumbnails WHERE article_id = ?",
        )
        .bind(article_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(FeedcoreError::NoContent)
    }

    pub async fn update(&self, thumbnail: &Thumbnail) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO articles_thumbnails (article_id, thumbnail, link, processed)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(article_id) DO UPDATE SET
                thumbnail = excluded.thumbnail, link = excluded.link, processed = excluded.processed
            "#,
        )
        .bind(thumbnail.article_id)
        .bind(&thumbnail.thumbnail)
        .bind(&thumbnail.link)
        .bind(thumbnail.processed)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}
