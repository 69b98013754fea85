//! End-to-end unlock flows: real `HttpBackend` against an in-process mock site.

mod support;

use async_trait::async_trait;
use ezy_coin::core::config::SessionSettings;
use ezy_coin::prompt::{AutoConfirm, Prompter};
use ezy_coin::scraping::Document;
use ezy_coin::unlock::{self, UnlockContext};
use ezy_coin::bulk_unlock::{self, BulkOutcome};
use ezy_coin::{CoinBackend, HttpBackend, Session, SessionOptions};
use std::sync::Arc;
use std::time::Duration;
use support::{listing_page, MockSite, Mode};
use url::Url;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

struct Decline;

#[async_trait]
impl Prompter for Decline {
    async fn confirm(&self, _message: &str) -> bool {
        false
    }

    async fn alert(&self, _message: &str) {}
}

async fn start_session(site: &MockSite, html: &str, settings: SessionSettings) -> Arc<Session> {
    init_logger();
    let config = site.site();
    let document = Arc::new(Document::parse(html, Arc::clone(&config)).unwrap());
    let backend = Arc::new(HttpBackend::new(reqwest::Client::new(), &config).unwrap());
    let listing = Url::parse(&format!("{}/novel/a/", site.origin)).unwrap();
    Session::start(
        &listing,
        document,
        backend,
        SessionOptions {
            settings,
            auto_unlock: false,
        },
    )
    .await
    .unwrap()
}

fn node(session: &Session, chapter_id: &str) -> usize {
    session.document().find_by_chapter_id(chapter_id).unwrap()
}

#[tokio::test]
async fn unlock_all_over_http() {
    let site = MockSite::start(100, Mode::Purchase).await;
    let settings = SessionSettings {
        concurrency_limit: 1,
        ..SessionSettings::default()
    };
    let session = start_session(&site, &listing_page(100, &[(3, 2), (2, 4), (1, 6)]), settings).await;
    assert_eq!(session.total_cost(), 12);

    let outcome = bulk_unlock::unlock_all(&session, &AutoConfirm).await.unwrap();
    let BulkOutcome::Completed(report) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(report.unlocked, 3);
    assert_eq!(report.total_cost, 12);
    assert_eq!(site.purchased_chapters(), vec!["1", "2", "3"]);

    let forms = site.state.purchases.lock().unwrap().clone();
    assert!(forms.iter().all(|f| f.get("action").map(String::as_str) == Some("wp_manga_buy_chapter")));
    assert!(forms.iter().all(|f| f.get("nonce").map(String::as_str) == Some("n0nce")));
    assert!(site
        .state
        .requested_with
        .lock()
        .unwrap()
        .iter()
        .all(|h| h.as_deref() == Some("XMLHttpRequest")));

    assert_eq!(session.balance().current().await, 88);
    assert_eq!(session.document().balance_display().as_deref(), Some("Balance: 88"));
    assert!(session.document().locked_items().is_empty());
    let first = session.document().chapter(node(&session, "1")).unwrap();
    assert_eq!(first.link.unwrap().href, "/novel/a/chapter-1/");
    session.shutdown();
}

#[tokio::test]
async fn declining_unlock_all_sends_no_purchase() {
    let site = MockSite::start(100, Mode::Purchase).await;
    let session = start_session(&site, &listing_page(100, &[(2, 5), (1, 5)]), SessionSettings::default()).await;

    let outcome = bulk_unlock::unlock_all(&session, &Decline).await.unwrap();
    assert!(matches!(outcome, BulkOutcome::Declined));
    assert_eq!(site.purchase_count(), 0);
    assert_eq!(session.document().locked_items().len(), 2);
}

#[tokio::test]
async fn remote_balance_short_of_total_aborts() {
    let site = MockSite::start(7, Mode::Purchase).await;
    let session = start_session(&site, &listing_page(100, &[(2, 5), (1, 5)]), SessionSettings::default()).await;

    let outcome = bulk_unlock::unlock_all(&session, &AutoConfirm).await.unwrap();
    assert!(matches!(outcome, BulkOutcome::InsufficientBalance));
    assert_eq!(site.purchase_count(), 0);
    assert_eq!(session.balance().current().await, 7);
}

#[tokio::test]
async fn logical_rejection_keeps_item_locked() {
    let site = MockSite::start(100, Mode::Reject).await;
    let session = start_session(&site, &listing_page(100, &[(1, 5)]), SessionSettings::default()).await;
    let item = node(&session, "1");

    let err = unlock::try_unlock(&session, item, UnlockContext::Listing)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("You do not have enough coins"));
    assert!(!unlock::unlock(&session, item, UnlockContext::Listing).await);

    assert_eq!(site.purchase_count(), 2);
    assert_eq!(session.balance().current().await, 100);
    let chapter = session.document().chapter(item).unwrap();
    assert!(chapter.has_class("premium-block"));
    assert!(!chapter.coin.unwrap().disabled);
    assert!(session.processing().is_empty());
}

#[tokio::test]
async fn server_errors_and_bad_bodies_are_failures() {
    for mode in [Mode::ServerError, Mode::Garbage] {
        let site = MockSite::start(100, mode).await;
        let session = start_session(&site, &listing_page(100, &[(1, 5)]), SessionSettings::default()).await;
        let item = node(&session, "1");
        assert!(!unlock::unlock(&session, item, UnlockContext::Listing).await, "{:?}", mode);
        assert_eq!(session.document().locked_items().len(), 1);
        assert_eq!(session.balance().current().await, 100);
    }
}

#[tokio::test]
async fn double_click_sends_one_request() {
    let site = MockSite::start(100, Mode::Purchase)
        .await
        .with_delay(Duration::from_millis(100));
    let session = start_session(&site, &listing_page(100, &[(1, 5)]), SessionSettings::default()).await;
    let item = node(&session, "1");

    let (a, b) = tokio::join!(unlock::click(&session, item), unlock::click(&session, item));
    assert!(a ^ b);
    assert_eq!(site.purchase_count(), 1);
    assert_eq!(session.balance().current().await, 95);
}

#[tokio::test]
async fn slow_purchase_times_out() {
    let site = MockSite::start(100, Mode::Purchase)
        .await
        .with_delay(Duration::from_secs(5));
    let settings = SessionSettings {
        request_timeout: Duration::from_millis(200),
        ..SessionSettings::default()
    };
    let session = start_session(&site, &listing_page(100, &[(1, 5)]), settings).await;
    let item = node(&session, "1");

    let started = std::time::Instant::now();
    let err = unlock::try_unlock(&session, item, UnlockContext::Listing)
        .await
        .unwrap_err();
    assert!(matches!(err, unlock::UnlockError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(session.document().chapter(item).unwrap().has_class("premium-block"));
    assert!(session.processing().is_empty());
}

#[tokio::test]
async fn balance_page_is_read_over_http() {
    let site = MockSite::start(4321, Mode::Purchase).await;
    let config = site.site();
    let backend = HttpBackend::new(reqwest::Client::new(), &config).unwrap();
    let balance = backend
        .fetch_balance(&config.balance_regex().unwrap())
        .await
        .unwrap();
    assert_eq!(balance, Some(4321));
}
