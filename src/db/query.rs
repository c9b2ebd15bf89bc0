//! Article query options shared by the per-user article operations.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};

use super::format_datetime;

/// Field used to order article listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Date,
    Id,
    Score,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filters, paging and ordering for per-user article queries.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Restrict to these feeds. Empty means all of the user's feeds.
    pub feed_ids: Vec<i64>,
    /// Only articles with `id > after_id`.
    pub after_id: Option<i64>,
    /// Only articles with `id < before_id`.
    pub before_id: Option<i64>,
    /// Only articles dated after this instant.
    pub after_date: Option<DateTime<Utc>>,
    /// Only articles dated before this instant.
    pub before_date: Option<DateTime<Utc>>,
    pub unread_only: bool,
    pub read_only: bool,
    pub favorite_only: bool,
    /// Only articles of feeds the user has not tagged.
    pub untagged_only: bool,
    /// Fill in `UserArticle::score`.
    pub include_scores: bool,
    /// List unread articles before read ones.
    pub unread_first: bool,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.feed_ids = ids.into_iter().collect();
        self
    }

    pub fn unread_only(mut self) -> Self {
        self.unread_only = true;
        self
    }

    pub fn favorite_only(mut self) -> Self {
        self.favorite_only = true;
        self
    }

    pub fn with_paging(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn sorted_by(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_field = field;
        self.sort_order = order;
        self
    }

    /// Append the FROM/JOIN/WHERE part selecting a user's articles.
    ///
    /// Aliases: `a` articles, `uf` attachment, `un` unread row, `fa`
    /// favorite row, `s` scores.
    pub(crate) fn push_selection(&self, qb: &mut QueryBuilder<'_, Sqlite>, login: &str) {
        qb.push(
            " FROM articles a \
             INNER JOIN users_feeds uf ON uf.feed_id = a.feed_id AND uf.user_login = ",
        );
        qb.push_bind(login.to_string());
        qb.push(
            " LEFT JOIN users_articles_unread un \
               ON un.article_id = a.id AND un.user_login = uf.user_login \
             LEFT JOIN users_articles_favorite fa \
               ON fa.article_id = a.id AND fa.user_login = uf.user_login \
             LEFT JOIN articles_scores s ON s.article_id = a.id \
             WHERE 1 = 1",
        );

        if !self.feed_ids.is_empty() {
            qb.push(" AND a.feed_id IN (");
            let mut ids = qb.separated(", ");
            for id in &self.feed_ids {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
        }
        if let Some(id) = self.after_id {
            qb.push(" AND a.id > ").push_bind(id);
        }
        if let Some(id) = self.before_id {
            qb.push(" AND a.id < ").push_bind(id);
        }
        if let Some(date) = &self.after_date {
            qb.push(" AND a.date > ").push_bind(format_datetime(date));
        }
        if let Some(date) = &self.before_date {
            qb.push(" AND a.date < ").push_bind(format_datetime(date));
        }
        if self.unread_only {
            qb.push(" AND un.article_id IS NOT NULL");
        }
        if self.read_only {
            qb.push(" AND un.article_id IS NULL");
        }
        if self.favorite_only {
            qb.push(" AND fa.article_id IS NOT NULL");
        }
        if self.untagged_only {
            qb.push(
                " AND NOT EXISTS (SELECT 1 FROM users_feeds_tags t \
                 WHERE t.user_login = uf.user_login AND t.feed_id = a.feed_id)",
            );
        }
    }

    /// Append ORDER BY and paging.
    pub(crate) fn push_ordering(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        let order = match self.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        qb.push(" ORDER BY ");
        if self.unread_first {
            qb.push("(un.article_id IS NULL) ASC, ");
        }
        match self.sort_field {
            SortField::Date => qb.push(format!("a.date {order}, a.id {order}")),
            SortField::Id => qb.push(format!("a.id {order}")),
            SortField::Score => qb.push(format!("COALESCE(s.score, 0) {order}, a.id {order}")),
        };

        if let Some(limit) = self.limit {
            qb.push(" LIMIT ").push_bind(limit);
            if let Some(offset) = self.offset {
                qb.push(" OFFSET ").push_bind(offset);
            }
        }
    }
}
