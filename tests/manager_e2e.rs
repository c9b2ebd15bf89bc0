//! Feed manager end-to-end tests against mock feed servers.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use feedcore::content::Thumbnailer;
use feedcore::db::{ArticleRepository, FeedRepository, NewUser, UserRepository};
use feedcore::feed::NewFeed;
use feedcore::monitor::{IndexOperation, SearchIndex};
use feedcore::{Article, Database, FeedManager, Result};
use tokio::sync::mpsc;
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{atom, fast_config, request_count, wait_until, DEFAULT_TIMEOUT};

#[tokio::test]
async fn test_activate_and_poll() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(atom(&[("urn:a1", "A1", "https://example.com/a1")])),
        )
        .mount(&server)
        .await;

    let db = Database::open_in_memory().await.unwrap();
    let manager = FeedManager::new(fast_config(100), db).unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    manager.add_update_receiver(tx).await;
    manager.start();

    let feed = manager
        .add_feed_by_link(&format!("{}/feed", server.uri()))
        .await
        .unwrap();
    assert!(feed.id > 0);

    let first = timeout(Duration::from_millis(300), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.feed.id, feed.id);
    assert_eq!(first.new_articles.len(), 1);
    assert_eq!(first.new_articles[0].title, "A1");

    let second = timeout(Duration::from_millis(200), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.feed.id, feed.id);
    assert!(second.new_articles.is_empty());

    manager.stop().await;
}

struct SlowThumbnailer {
    delay: Duration,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl Thumbnailer for SlowThumbnailer {
    async fn generate(&self, article: &Article) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.seen.lock().unwrap().push(article.title.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_slow_thumbnailer_keeps_update_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(atom(&[("urn:a1", "A1", "https://example.com/a1")])),
        )
        .mount(&server)
        .await;

    let mut config = fast_config(100);
    config.feed_manager.monitors = vec!["unread".to_string(), "thumbnailer".to_string()];
    let thumbnailer = Arc::new(SlowThumbnailer {
        delay: Duration::from_millis(400),
        seen: Mutex::new(Vec::new()),
    });
    let db = Database::open_in_memory().await.unwrap();
    let manager = FeedManager::builder(config, db)
        .with_thumbnailer(thumbnailer.clone())
        .build()
        .unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    manager.add_update_receiver(tx).await;
    manager.start();

    manager
        .add_feed_by_link(&format!("{}/feed", server.uri()))
        .await
        .unwrap();

    // Later polls finish before the thumbnail does; they are held back
    // until the first update has been delivered
    let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.new_articles.len(), 1);
    assert_eq!(*thumbnailer.seen.lock().unwrap(), vec!["A1"]);

    let second = timeout(Duration::from_millis(200), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(second.new_articles.is_empty());

    manager.stop().await;
}

#[tokio::test]
async fn test_dedup_by_guid() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(atom(&[
            ("g1", "One", &format!("{base}/a")),
            ("g2", "Two", &format!("{base}/b")),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(atom(&[
            ("g1", "One", &format!("{base}/a-renamed")),
            ("g2", "Two", &format!("{base}/b")),
            ("g3", "Three", &format!("{base}/c")),
        ])))
        .mount(&server)
        .await;

    let db = Database::open_in_memory().await.unwrap();
    let manager = FeedManager::new(fast_config(60_000), db.clone()).unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    manager.add_update_receiver(tx).await;

    let feed = FeedRepository::new(db.pool())
        .create(&NewFeed::new(format!("{base}/feed")))
        .await
        .unwrap();

    // Start, take the first poll, restart for the second.
    manager.start();
    let first = timeout(DEFAULT_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    manager.stop().await;
    manager.start();
    let second = timeout(DEFAULT_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    manager.stop().await;

    assert_eq!(first.new_articles.len(), 2);
    assert_eq!(second.new_articles.len(), 1);
    assert_eq!(second.new_articles[0].guid.as_deref(), Some("g3"));

    let stored = ArticleRepository::new(db.pool())
        .for_feed(feed.id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
    let g1 = stored
        .iter()
        .find(|a| a.guid.as_deref() == Some("g1"))
        .unwrap();
    assert_eq!(g1.link, format!("{base}/a-renamed"));
}

#[derive(Default)]
struct RecordingIndex {
    operations: Mutex<Vec<(IndexOperation, usize)>>,
}

#[async_trait]
impl SearchIndex for RecordingIndex {
    async fn index(&self, articles: &[Article], op: IndexOperation) -> Result<()> {
        self.operations.lock().unwrap().push((op, articles.len()));
        Ok(())
    }
}

#[tokio::test]
async fn test_deletion_cascade() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(atom(&[("urn:x", "X", "https://example.com/x")])),
        )
        .mount(&server)
        .await;

    let db = Database::open_in_memory().await.unwrap();
    let users = UserRepository::new(db.pool());
    for login in ["ann", "bob", "cid"] {
        users.create(&NewUser::new(login)).await.unwrap();
    }

    let mut config = fast_config(60_000);
    config.feed_manager.monitors = vec!["unread".to_string(), "index".to_string()];
    let index = Arc::new(RecordingIndex::default());
    let manager = FeedManager::builder(config, db.clone())
        .with_search_index(index.clone())
        .build()
        .unwrap();
    manager.start();

    let link = format!("{}/feed", server.uri());
    let mut feed = None;
    for login in ["ann", "bob", "cid"] {
        feed = Some(manager.attach_feed(login, &link).await.unwrap());
    }
    let feed = feed.unwrap();

    let repo = FeedRepository::new(db.pool());
    assert_eq!(repo.users(feed.id).await.unwrap().len(), 3);
    for login in ["ann", "bob", "cid"] {
        assert!(repo.detach_from(feed.id, login).await.unwrap());
    }
    manager.remove_feed_by_link(&link).await.unwrap();

    let repo = &repo;
    let id = feed.id;
    assert!(wait_until(|| async move { repo.get(id).await.unwrap().is_none() }).await);
    assert!(repo.all().await.unwrap().iter().all(|f| f.id != feed.id));
    assert!(index
        .operations
        .lock()
        .unwrap()
        .iter()
        .any(|(op, _)| *op == IndexOperation::Delete));

    manager.stop().await;
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(atom(&[("urn:y", "Y", "https://example.com/y")])),
        )
        .mount(&server)
        .await;

    let db = Database::open_in_memory().await.unwrap();
    let repo = FeedRepository::new(db.pool());
    for i in 0..50 {
        repo.create(&NewFeed::new(format!("{}/feed/{i}", server.uri())))
            .await
            .unwrap();
    }

    let manager = FeedManager::new(fast_config(50), db).unwrap();
    manager.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    manager.stop().await;
    assert!(!manager.is_running());

    let after_stop = request_count(&server).await;
    assert!(after_stop >= 50);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(request_count(&server).await, after_stop);
}
