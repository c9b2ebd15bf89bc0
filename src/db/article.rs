//! Article repository and per-user overlays (unread, favorite).

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};

use super::{format_datetime, parse_datetime, DbPool, QueryOptions};
use crate::feed::{Article, UserArticle};
use crate::Result;

const ARTICLE_COLUMNS: &str = "a.id, a.feed_id, a.title, a.description, a.link, a.date, a.guid";

/// Row type for articles.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ArticleRow {
    id: i64,
    feed_id: i64,
    title: String,
    description: String,
    link: String,
    date: Option<String>,
    guid: Option<String>,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            id: row.id,
            feed_id: row.feed_id,
            title: row.title,
            description: row.description,
            link: row.link,
            date: row.date.as_deref().and_then(parse_datetime),
            guid: row.guid,
        }
    }
}

/// Row type for an article seen by a user.
#[derive(Debug, Clone, sqlx::FromRow)]
struct UserArticleRow {
    #[sqlx(flatten)]
    article: ArticleRow,
    read: bool,
    favorite: bool,
    score: f64,
}

/// Repository for article operations.
pub struct ArticleRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> ArticleRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Get an article by ID.
    pub async fn get(&self, id: i64) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a WHERE a.id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(Article::from))
    }

    /// All articles of a feed, newest first.
    pub async fn for_feed(&self, feed_id: i64) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a WHERE a.feed_id = ? \
             ORDER BY a.date DESC, a.id DESC"
        ))
        .bind(feed_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Article::from).collect())
    }

    /// Articles of a feed dated at or after `since`.
    pub async fn latest_for_feed(
        &self,
        feed_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a \
             WHERE a.feed_id = ? AND a.date IS NOT NULL AND a.date >= ? \
             ORDER BY a.date DESC"
        ))
        .bind(feed_id)
        .bind(format_datetime(&since))
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Article::from).collect())
    }

    /// Articles visible to a user.
    pub async fn for_user(&self, login: &str, opts: &QueryOptions) -> Result<Vec<UserArticle>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {ARTICLE_COLUMNS}, \
             (un.article_id IS NULL) AS read, \
             (fa.article_id IS NOT NULL) AS favorite, \
             COALESCE(s.score, 0.0) AS score"
        ));
        opts.push_selection(&mut qb, login);
        opts.push_ordering(&mut qb);

        let rows = qb
            .build_query_as::<UserArticleRow>()
            .fetch_all(self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| UserArticle {
                article: row.article.into(),
                read: row.read,
                favorite: row.favorite,
                score: opts.include_scores.then_some(row.score),
            })
            .collect())
    }

    /// IDs of the articles visible to a user.
    pub async fn ids(&self, login: &str, opts: &QueryOptions) -> Result<Vec<i64>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT a.id");
        opts.push_selection(&mut qb, login);
        opts.push_ordering(&mut qb);

        let ids = qb
            .build_query_scalar::<i64>()
            .fetch_all(self.pool)
            .await?;
        Ok(ids)
    }

    /// Count the articles visible to a user. Paging is ignored.
    pub async fn count(&self, login: &str, opts: &QueryOptions) -> Result<i64> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*)");
        opts.push_selection(&mut qb, login);

        let count = qb.build_query_scalar::<i64>().fetch_one(self.pool).await?;
        Ok(count)
    }

    /// Mark the selected articles read (`true`) or unread (`false`) for a
    /// user. Returns the number of overlay rows changed.
    pub async fn read(
        &self,
        login: &str,
        read: bool,
        opts: &QueryOptions,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut qb: QueryBuilder<Sqlite> = if read {
            let mut qb = QueryBuilder::new("DELETE FROM users_articles_unread WHERE user_login = ");
            qb.push_bind(login.to_string());
            qb.push(" AND article_id IN (SELECT a.id");
            qb
        } else {
            let mut qb = QueryBuilder::new(
                "INSERT OR IGNORE INTO users_articles_unread (user_login, article_id, insert_date) \
                 SELECT uf.user_login, a.id, ",
            );
            qb.push_bind(format_datetime(&now));
            qb
        };
        opts.push_selection(&mut qb, login);
        if read {
            qb.push(")");
        }

        let result = qb.build().execute(self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Mark the selected articles favorite (`true`) or not (`false`) for a
    /// user. Returns the number of overlay rows changed.
    pub async fn favor(&self, login: &str, favorite: bool, opts: &QueryOptions) -> Result<u64> {
        let mut qb: QueryBuilder<Sqlite> = if favorite {
            QueryBuilder::new(
                "INSERT OR IGNORE INTO users_articles_favorite (user_login, article_id) \
                 SELECT uf.user_login, a.id",
            )
        } else {
            let mut qb =
                QueryBuilder::new("DELETE FROM users_articles_favorite WHERE user_login = ");
            qb.push_bind(login.to_string());
            qb.push(" AND article_id IN (SELECT a.id");
            qb
        };
        opts.push_selection(&mut qb, login);
        if !favorite {
            qb.push(")");
        }

        let result = qb.build().execute(self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Create unread rows for every user attached to `feed_id`.
    pub async fn insert_unread(
        &self,
        feed_id: i64,
        article_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if article_ids.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO users_articles_unread (user_login, article_id, insert_date) \
             SELECT uf.user_login, a.id, ",
        );
        qb.push_bind(format_datetime(&now));
        qb.push(" FROM articles a INNER JOIN users_feeds uf ON uf.feed_id = a.feed_id WHERE a.feed_id = ");
        qb.push_bind(feed_id);
        qb.push(" AND a.id IN (");
        let mut ids = qb.separated(", ");
        for id in article_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");

        let result = qb.build().execute(self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Delete unread rows inserted before `before`.
    pub async fn remove_stale_unread_records(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM users_articles_unread WHERE insert_date < ?")
            .bind(format_datetime(&before))
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
