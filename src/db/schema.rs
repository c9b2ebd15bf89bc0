//! Database schema and migrations for feedcore.
//!
//! Migrations are applied in order when the database is opened; the
//! `schema_version` table records which ones have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: users, feeds and articles
    r#"
CREATE TABLE users (
    login       TEXT PRIMARY KEY,
    first_name  TEXT NOT NULL DEFAULT '',
    last_name   TEXT NOT NULL DEFAULT '',
    email       TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE feeds (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    link            TEXT NOT NULL UNIQUE,
    title           TEXT NOT NULL DEFAULT '',
    description     TEXT NOT NULL DEFAULT '',
    site_link       TEXT NOT NULL DEFAULT '',
    hub_link        TEXT,
    update_error    TEXT NOT NULL DEFAULT '',
    subscribe_error TEXT NOT NULL DEFAULT '',
    ttl             INTEGER,                    -- minutes
    skip_hours      TEXT NOT NULL DEFAULT '',   -- comma separated 0-23
    skip_days       TEXT NOT NULL DEFAULT ''    -- comma separated weekday names
);

CREATE TABLE users_feeds (
    user_login  TEXT NOT NULL REFERENCES users(login) ON DELETE CASCADE,
    feed_id     INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    PRIMARY KEY (user_login, feed_id)
);

CREATE TABLE users_feeds_tags (
    user_login  TEXT NOT NULL,
    feed_id     INTEGER NOT NULL,
    tag         TEXT NOT NULL,
    PRIMARY KEY (user_login, feed_id, tag),
    FOREIGN KEY (user_login, feed_id) REFERENCES users_feeds(user_login, feed_id) ON DELETE CASCADE
);

CREATE TABLE articles (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id     INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    link        TEXT NOT NULL,
    guid        TEXT,
    title       TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    date        TEXT,                           -- RFC 3339, UTC
    UNIQUE (feed_id, link)
);

CREATE UNIQUE INDEX idx_articles_feed_guid ON articles(feed_id, guid) WHERE guid IS NOT NULL;
CREATE INDEX idx_articles_date ON articles(date);
"#,
    // v2: per-user overlays
    r#"
CREATE TABLE users_articles_unread (
    user_login  TEXT NOT NULL REFERENCES users(login) ON DELETE CASCADE,
    article_id  INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    insert_date TEXT NOT NULL,
    PRIMARY KEY (user_login, article_id)
);

CREATE INDEX idx_unread_insert_date ON users_articles_unread(insert_date);

CREATE TABLE users_articles_favorite (
    user_login  TEXT NOT NULL REFERENCES users(login) ON DELETE CASCADE,
    article_id  INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    PRIMARY KEY (user_login, article_id)
);
"#,
    // v3: enrichment entities
    r#"
CREATE TABLE articles_scores (
    article_id  INTEGER PRIMARY KEY REFERENCES articles(id) ON DELETE CASCADE,
    score       REAL NOT NULL DEFAULT 0,
    score1      INTEGER NOT NULL DEFAULT 0,
    score2      INTEGER NOT NULL DEFAULT 0,
    score3      INTEGER NOT NULL DEFAULT 0,
    score4      INTEGER NOT NULL DEFAULT 0,
    score5      INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE articles_thumbnails (
    article_id  INTEGER PRIMARY KEY REFERENCES articles(id) ON DELETE CASCADE,
    thumbnail   TEXT NOT NULL DEFAULT '',       -- data URI
    link        TEXT NOT NULL DEFAULT '',       -- source image
    processed   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE articles_extracts (
    article_id  INTEGER PRIMARY KEY REFERENCES articles(id) ON DELETE CASCADE,
    title       TEXT NOT NULL DEFAULT '',
    content     TEXT NOT NULL DEFAULT '',
    top_image   TEXT NOT NULL DEFAULT '',
    language    TEXT NOT NULL DEFAULT '',
    processed   INTEGER NOT NULL DEFAULT 0
);
"#,
    // v4: hub subscriptions and HTTPS capability cache
    r#"
CREATE TABLE hubbub_subscriptions (
    feed_id              INTEGER PRIMARY KEY REFERENCES feeds(id) ON DELETE CASCADE,
    link                 TEXT NOT NULL,        -- hub endpoint
    lease_duration       INTEGER NOT NULL DEFAULT 0,  -- seconds
    verification_time    TEXT,
    subscription_failure INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE https_domains (
    host    TEXT PRIMARY KEY,
    https   INTEGER NOT NULL
);
"#,
];
