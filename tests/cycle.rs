use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use flat_watch::cycle::{run_cycle, Pipeline};
use flat_watch::db::{SeenStore, SqliteSeenStore, StoreError};
use flat_watch::fetch::{FetchError, PageFetcher};
use flat_watch::model::{Listing, SearchCriteria};
use flat_watch::notify::{Notifier, NotifyError};

const SOURCE: &str = "https://inberlinwohnen.de/wohnungsfinder/";

fn criteria() -> SearchCriteria {
    SearchCriteria {
        max_cold_rent: 440.0,
        min_rooms: 1.0,
        max_rooms: 2.0,
        max_area: 50.0,
    }
}

fn item(id: &str, rooms: &str, area: &str, rent: &str, street: &str) -> String {
    format!(
        r#"<div id="apartment-{id}"><button class="list__item__title">{rooms} Zimmer, {area} m², {rent} € | {street}</button></div>"#
    )
}

fn page(items: &[String]) -> String {
    format!("<html><body>{}</body></html>", items.concat())
}

/// A matches the criteria, B is too expensive.
fn page_a_b() -> String {
    page(&[
        item("A", "1,0", "40,00", "400,00", "Weg 1"),
        item("B", "1,0", "30,00", "500,00", "Weg 2"),
    ])
}

struct StaticFetcher {
    markup: String,
}

impl StaticFetcher {
    fn new(markup: String) -> Self {
        Self { markup }
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
        Ok(self.markup.clone())
    }
}

struct SlowFetcher;

#[async_trait]
impl PageFetcher for SlowFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(page_a_b())
    }
}

struct FailingFetcher;

#[async_trait]
impl PageFetcher for FailingFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
        Err(FetchError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
        })
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    responses: Arc<Mutex<VecDeque<Result<(), NotifyError>>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    fn with_responses(responses: Vec<Result<(), NotifyError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, listing: &Listing) -> Result<(), NotifyError> {
        self.sent.lock().await.push(listing.id.clone());
        self.responses.lock().await.pop_front().unwrap_or(Ok(()))
    }
}

fn refused() -> Result<(), NotifyError> {
    Err(NotifyError::Status {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: "down".into(),
    })
}

/// Lookups succeed, every write fails.
struct ReadOnlyStore;

#[async_trait]
impl SeenStore for ReadOnlyStore {
    async fn has_seen(&self, _listing_id: &str) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn mark_seen(&self, _listing_id: &str, _at: DateTime<Utc>) -> Result<(), StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }
}

#[derive(Default)]
struct CountingStore {
    calls: AtomicUsize,
}

#[async_trait]
impl SeenStore for CountingStore {
    async fn has_seen(&self, _listing_id: &str) -> Result<bool, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }

    async fn mark_seen(&self, _listing_id: &str, _at: DateTime<Utc>) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn memory_store() -> SqliteSeenStore {
    SqliteSeenStore::open("sqlite::memory:").await.unwrap()
}

fn pipeline<'a>(
    fetcher: &'a dyn PageFetcher,
    store: &'a dyn SeenStore,
    notifier: &'a dyn Notifier,
) -> Pipeline<'a> {
    Pipeline {
        fetcher,
        store,
        notifier,
        criteria: criteria(),
        source_url: Url::parse(SOURCE).unwrap(),
        fetch_timeout: Duration::from_secs(5),
        mark_seen_on_failure: false,
        debug_dir: None,
    }
}

#[tokio::test]
async fn only_new_matching_listing_is_notified_once() {
    let store = memory_store().await;
    let fetcher = StaticFetcher::new(page_a_b());
    let notifier = RecordingNotifier::default();
    let p = pipeline(&fetcher, &store, &notifier);

    let first = run_cycle(&p).await.unwrap();
    assert_eq!(first.extracted, 2);
    assert_eq!(first.matched, 1);
    assert_eq!(first.new, 1);
    assert_eq!(first.notified, 1);
    assert!(first.found_new());
    assert_eq!(notifier.sent().await, vec!["A".to_string()]);
    assert!(store.has_seen("A").await.unwrap());
    assert!(!store.has_seen("B").await.unwrap());

    let second = run_cycle(&p).await.unwrap();
    assert_eq!(second.matched, 1);
    assert_eq!(second.new, 0);
    assert!(!second.found_new());
    assert_eq!(notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn every_new_listing_gets_one_send_attempt() {
    let store = memory_store().await;
    let fetcher = StaticFetcher::new(page(&[
        item("1", "2,0", "40,00", "400,00", "Weg 1"),
        item("2", "2,0", "41,00", "410,00", "Weg 2"),
        item("3", "2,0", "42,00", "420,00", "Weg 3"),
    ]));
    let notifier = RecordingNotifier::with_responses(vec![Ok(()), refused(), Ok(())]);
    let p = pipeline(&fetcher, &store, &notifier);

    let report = run_cycle(&p).await.unwrap();
    assert_eq!(notifier.sent().await, vec!["1", "2", "3"]);
    assert_eq!(report.new, 3);
    assert_eq!(report.notified, 2);
    assert_eq!(report.notify_failed, 1);
    assert_eq!(report.marked, 2);
}

#[tokio::test]
async fn failed_send_is_retried_next_cycle() {
    let store = memory_store().await;
    let fetcher = StaticFetcher::new(page_a_b());
    let notifier = RecordingNotifier::with_responses(vec![refused()]);
    let p = pipeline(&fetcher, &store, &notifier);

    let first = run_cycle(&p).await.unwrap();
    assert_eq!(first.notify_failed, 1);
    assert_eq!(first.marked, 0);
    assert_eq!(first.new_ids, vec!["A".to_string()]);
    assert_eq!(first.unsent_ids, vec!["A".to_string()]);
    assert!(!store.has_seen("A").await.unwrap());

    let second = run_cycle(&p).await.unwrap();
    assert_eq!(second.notified, 1);
    assert_eq!(notifier.sent().await, vec!["A", "A"]);
    assert!(store.has_seen("A").await.unwrap());
}

#[tokio::test]
async fn failed_send_is_dropped_when_configured() {
    let store = memory_store().await;
    let fetcher = StaticFetcher::new(page_a_b());
    let notifier = RecordingNotifier::with_responses(vec![refused()]);
    let mut p = pipeline(&fetcher, &store, &notifier);
    p.mark_seen_on_failure = true;

    let first = run_cycle(&p).await.unwrap();
    assert_eq!(first.notify_failed, 1);
    assert_eq!(first.marked, 1);
    assert!(first.unsent_ids.is_empty());
    assert!(store.has_seen("A").await.unwrap());

    let second = run_cycle(&p).await.unwrap();
    assert_eq!(second.new, 0);
    assert_eq!(notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn no_new_listings_sends_nothing() {
    let store = memory_store().await;
    store.mark_seen("A", Utc::now()).await.unwrap();
    let fetcher = StaticFetcher::new(page_a_b());
    let notifier = RecordingNotifier::default();

    let report = run_cycle(&pipeline(&fetcher, &store, &notifier)).await.unwrap();
    assert_eq!(report.new, 0);
    assert!(notifier.sent().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn fetch_timeout_is_an_empty_cycle() {
    // Paused time and the SQLite worker thread do not mix; use a store that
    // counts calls instead.
    let store = CountingStore::default();
    let notifier = RecordingNotifier::default();
    let p = pipeline(&SlowFetcher, &store, &notifier);

    let report = run_cycle(&p).await.unwrap();
    assert!(report.fetch_failed);
    assert!(!report.found_new());
    assert!(notifier.sent().await.is_empty());
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fetch_error_is_an_empty_cycle() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();

    let report = run_cycle(&pipeline(&FailingFetcher, &store, &notifier))
        .await
        .unwrap();
    assert!(report.fetch_failed);
    assert_eq!(report.extracted, 0);
    assert!(notifier.sent().await.is_empty());
}

#[tokio::test]
async fn store_write_failure_aborts_cycle() {
    let fetcher = StaticFetcher::new(page(&[
        item("1", "2,0", "40,00", "400,00", "Weg 1"),
        item("2", "2,0", "41,00", "410,00", "Weg 2"),
    ]));
    let notifier = RecordingNotifier::default();

    let err = run_cycle(&pipeline(&fetcher, &ReadOnlyStore, &notifier))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
    // The first listing was delivered before its write failed; the second
    // was never attempted.
    assert_eq!(notifier.sent().await, vec!["1"]);
}

#[tokio::test]
async fn malformed_entry_does_not_block_others() {
    let store = memory_store().await;
    let fetcher = StaticFetcher::new(page(&[
        item("bad", "k.A.", "40,00", "400,00", "Weg 1"),
        item("good", "2,0", "41,00", "410,00", "Weg 2"),
    ]));
    let notifier = RecordingNotifier::default();

    let report = run_cycle(&pipeline(&fetcher, &store, &notifier)).await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(notifier.sent().await, vec!["good"]);
}

#[tokio::test]
async fn empty_page_is_dumped_for_inspection() {
    let dir = tempfile::tempdir().unwrap();
    let store = memory_store().await;
    let fetcher = StaticFetcher::new("<html><body>nothing here</body></html>".into());
    let notifier = RecordingNotifier::default();
    let mut p = pipeline(&fetcher, &store, &notifier);
    p.debug_dir = Some(dir.path());

    let report = run_cycle(&p).await.unwrap();
    assert_eq!(report.extracted, 0);
    let dumped: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(dumped.len(), 1);
}
