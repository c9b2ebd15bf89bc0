//! Feed repository, including the article diff that classifies new articles.

use sqlx::{Sqlite, Transaction};

use super::{format_datetime, parse_datetime, DbPool};
use crate::feed::{Article, Feed, NewFeed, ParsedArticle};
use crate::{FeedcoreError, Result};

const FEED_COLUMNS: &str = "f.id, f.link, f.title, f.description, f.site_link, f.hub_link, \
     f.update_error, f.subscribe_error, f.ttl, f.skip_hours, f.skip_days";

/// Row type for feeds.
#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedRow {
    id: i64,
    link: String,
    title: String,
    description: String,
    site_link: String,
    hub_link: Option<String>,
    update_error: String,
    subscribe_error: String,
    ttl: Option<i64>,
    skip_hours: String,
    skip_days: String,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            link: row.link,
            title: row.title,
            description: row.description,
            site_link: row.site_link,
            hub_link: row.hub_link.filter(|h| !h.is_empty()),
            update_error: row.update_error,
            subscribe_error: row.subscribe_error,
            ttl: row.ttl,
            skip_hours: row
                .skip_hours
                .split(',')
                .filter_map(|h| h.trim().parse().ok())
                .collect(),
            skip_days: row
                .skip_days
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

fn join_hours(hours: &[u32]) -> String {
    hours
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Repository for feed operations.
pub struct FeedRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Get a feed by ID.
    pub async fn get(&self, id: i64) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds f WHERE f.id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(Feed::from))
    }

    /// Find a feed by its link.
    pub async fn find_by_link(&self, link: &str) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds f WHERE f.link = ?"
        ))
        .bind(link)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(Feed::from))
    }

    /// List all feeds.
    pub async fn all(&self) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds f ORDER BY f.id"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// List feeds that must be polled: no hub subscription row, or a failed one.
    pub async fn all_unsubscribed(&self) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            r#"
            SELECT {FEED_COLUMNS}
            FROM feeds f
            LEFT JOIN hubbub_subscriptions s ON s.feed_id = f.id
            WHERE s.feed_id IS NULL OR s.subscription_failure = 1
            ORDER BY f.id
            "#
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// List the feeds attached to a user.
    pub async fn for_user(&self, login: &str) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            r#"
            SELECT {FEED_COLUMNS}
            FROM feeds f
            INNER JOIN users_feeds uf ON uf.feed_id = f.id
            WHERE uf.user_login = ?
            ORDER BY f.id
            "#
        ))
        .bind(login)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Create a new feed.
    pub async fn create(&self, feed: &NewFeed) -> Result<Feed> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO feeds (link, title, description, site_link, hub_link, ttl, skip_hours, skip_days)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&feed.link)
        .bind(&feed.title)
        .bind(&feed.description)
        .bind(&feed.site_link)
        .bind(&feed.hub_link)
        .bind(feed.ttl)
        .bind(join_hours(&feed.skip_hours))
        .bind(feed.skip_days.join(","))
        .fetch_one(self.pool)
        .await?;

        self.get(id)
            .await?
            .ok_or_else(|| FeedcoreError::NotFound("feed".to_string()))
    }

    /// Persist feed metadata and error columns. `link` is never changed.
    pub async fn update_metadata(&self, feed: &Feed) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_metadata(&mut tx, feed).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Persist feed metadata and merge `articles` in one transaction.
    ///
    /// Returns the articles inserted for the first time. Each article is
    /// matched by `(feed_id, guid)` when it carries a GUID, otherwise by
    /// `(feed_id, link)`; a matched article is updated in place. An insert
    /// that collides on the link falls back to an update by link, so an
    /// article is reported new at most once.
    pub async fn update(&self, feed: &Feed, articles: &[ParsedArticle]) -> Result<Vec<Article>> {
        let mut tx = self.pool.begin().await?;
        write_metadata(&mut tx, feed).await?;

        let mut new_articles = Vec::new();
        for article in articles {
            if let Some(inserted) = merge_article(&mut tx, feed.id, article).await? {
                new_articles.push(inserted);
            }
        }

        tx.commit().await?;
        Ok(new_articles)
    }

    /// Delete a feed. Articles, attachments and enrichment rows cascade.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Logins of the users attached to a feed.
    pub async fn users(&self, id: i64) -> Result<Vec<String>> {
        let logins = sqlx::query_scalar::<_, String>(
            "SELECT user_login FROM users_feeds WHERE feed_id = ? ORDER BY user_login",
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?;
        Ok(logins)
    }

    /// Attach a feed to a user. Attaching twice is a no-op.
    pub async fn attach_to(&self, id: i64, login: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO users_feeds (user_login, feed_id) VALUES (?, ?)")
            .bind(login)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Detach a feed from a user, dropping the user's tags and overlays for it.
    pub async fn detach_from(&self, id: i64, login: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        for sql in [
            "DELETE FROM users_articles_unread WHERE user_login = ? AND article_id IN \
             (SELECT id FROM articles WHERE feed_id = ?)",
            "DELETE FROM users_articles_favorite WHERE user_login = ? AND article_id IN \
             (SELECT id FROM articles WHERE feed_id = ?)",
        ] {
            sqlx::query(sql).bind(login).bind(id).execute(&mut *tx).await?;
        }
        let result = sqlx::query("DELETE FROM users_feeds WHERE user_login = ? AND feed_id = ?")
            .bind(login)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace a user's tags on a feed.
    pub async fn set_user_tags(&self, id: i64, login: &str, tags: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM users_feeds_tags WHERE user_login = ? AND feed_id = ?")
            .bind(login)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            sqlx::query(
                "INSERT OR IGNORE INTO users_feeds_tags (user_login, feed_id, tag) VALUES (?, ?, ?)",
            )
            .bind(login)
            .bind(id)
            .bind(tag)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// A user's tags on a feed, sorted.
    pub async fn user_tags(&self, id: i64, login: &str) -> Result<Vec<String>> {
        let tags = sqlx::query_scalar::<_, String>(
            "SELECT tag FROM users_feeds_tags WHERE user_login = ? AND feed_id = ? ORDER BY tag",
        )
        .bind(login)
        .bind(id)
        .fetch_all(self.pool)
        .await?;
        Ok(tags)
    }
}

async fn write_metadata(tx: &mut Transaction<'_, Sqlite>, feed: &Feed) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE feeds
        SET title = ?, description = ?, site_link = ?, hub_link = ?, update_error = ?,
            subscribe_error = ?, ttl = ?, skip_hours = ?, skip_days = ?
        WHERE id = ?
        "#,
    )
    .bind(&feed.title)
    .bind(&feed.description)
    .bind(&feed.site_link)
    .bind(&feed.hub_link)
    .bind(&feed.update_error)
    .bind(&feed.subscribe_error)
    .bind(feed.ttl)
    .bind(join_hours(&feed.skip_hours))
    .bind(feed.skip_days.join(","))
    .bind(feed.id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(FeedcoreError::NotFound(format!("feed {}", feed.id)));
    }
    Ok(())
}

/// Merge one parsed article; returns it when it was inserted.
async fn merge_article(
    tx: &mut Transaction<'_, Sqlite>,
    feed_id: i64,
    article: &ParsedArticle,
) -> Result<Option<Article>> {
    let date = article.date.as_ref().map(format_datetime);

    let updated = match &article.guid {
        Some(guid) => sqlx::query(
            "UPDATE OR IGNORE articles SET title = ?, description = ?, link = ?, date = ? \
             WHERE feed_id = ? AND guid = ?",
        )
        .bind(&article.title)
        .bind(&article.description)
        .bind(&article.link)
        .bind(&date)
        .bind(feed_id)
        .bind(guid)
        .execute(&mut **tx)
        .await?
        .rows_affected(),
        None => update_by_link(tx, feed_id, article, &date).await?,
    };
    if updated > 0 {
        return Ok(None);
    }

    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO articles (feed_id, link, guid, title, description, date) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(feed_id)
    .bind(&article.link)
    .bind(&article.guid)
    .bind(&article.title)
    .bind(&article.description)
    .bind(&date)
    .execute(&mut **tx)
    .await?;

    if inserted.rows_affected() == 0 {
        // Known link under a different GUID
        if article.guid.is_some() {
            update_by_link(tx, feed_id, article, &date).await?;
        }
        return Ok(None);
    }

    Ok(Some(Article {
        id: inserted.last_insert_rowid(),
        feed_id,
        title: article.title.clone(),
        description: article.description.clone(),
        link: article.link.clone(),
        date: date.as_deref().and_then(parse_datetime),
        guid: article.guid.clone(),
    }))
}

async fn update_by_link(
    tx: &mut Transaction<'_, Sqlite>,
    feed_id: i64,
    article: &ParsedArticle,
    date: &Option<String>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE articles SET title = ?, description = ?, date = ? WHERE feed_id = ? AND link = ?",
    )
    .bind(&article.title)
    .bind(&article.description)
    .bind(date)
    .bind(feed_id)
    .bind(&article.link)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}
