//! Integration tests for the crawler
//!
//! These tests use wiremock to serve a small mock catalogue and run full
//! crawl sessions against it end-to-end, checking fetch counts, session
//! summaries and what ends up in the record store.

use catalog_watch::config::{parse_config, Config};
use catalog_watch::crawler::run_crawl;
use catalog_watch::model::{ChangeKind, Record, RecordFields, SessionStatus};
use catalog_watch::storage::{RecordStatus, RecordStore, SqliteStorage};
use catalog_watch::CrawlError;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock server
fn create_test_config(server: &MockServer, db_path: &Path, skip_existing: bool) -> Config {
    parse_config(&format!(
        r#"
[crawler]
max-concurrent-requests = 4
batch-size = 2
max-retries = 3
skip-existing = {}
request-timeout-ms = 2000
retry-base-delay-ms = 1
retry-max-delay-ms = 2

[target]
base-url = "{}/"

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"

[output]
database-path = '{}'
"#,
        skip_existing,
        server.uri(),
        db_path.display()
    ))
    .expect("test config should be valid")
}

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("catalog.db")
}

fn item_url(server: &MockServer, slug: &str) -> String {
    format!("{}/catalogue/{}/index.html", server.uri(), slug)
}

fn listing_page(page: u32, total: u32, hrefs: &[String]) -> String {
    let items: String = hrefs
        .iter()
        .map(|href| {
            format!(
                r#"<li><article class="product_pod"><h3><a href="{}">book</a></h3></article></li>"#,
                href
            )
        })
        .collect();

    format!(
        r#"<html><body><ol class="row">{}</ol>
        <ul class="pager"><li class="current">Page {} of {}</li></ul></body></html>"#,
        items, page, total
    )
}

fn book_page(name: &str, price_excl: &str, price_incl: &str) -> String {
    format!(
        r#"<html><body>
<ul class="breadcrumb">
  <li><a href="/index.html">Home</a></li>
  <li><a href="/catalogue/category/books_1/index.html">Books</a></li>
  <li><a href="/catalogue/category/books/poetry_23/index.html">Poetry</a></li>
  <li class="active">{name}</li>
</ul>
<div class="item active"><img src="/media/cover.jpg"></div>
<div class="product_main">
  <h1>{name}</h1>
  <p class="price_color">£{price_incl}</p>
  <p class="star-rating Three"></p>
</div>
<div id="product_description"><h2>Product Description</h2></div>
<p>A description of {name}.</p>
<table class="table table-striped">
  <tr><th>Price (excl. tax)</th><td>£{price_excl}</td></tr>
  <tr><th>Price (incl. tax)</th><td>£{price_incl}</td></tr>
  <tr><th>Availability</th><td>In stock (5 available)</td></tr>
  <tr><th>Number of reviews</th><td>0</td></tr>
</table>
</body></html>"#
    )
}

/// Mounts a paginated index: `pages[0]` is the root, `pages[n]` is page n+1.
///
/// Root links are relative to `/`, later pages to `/catalogue/`, like the real site.
async fn mount_index(server: &MockServer, pages: &[&[&str]]) {
    let total = pages.len() as u32;

    for (i, slugs) in pages.iter().enumerate() {
        let page = i as u32 + 1;
        let (route, hrefs): (String, Vec<String>) = if page == 1 {
            (
                "/".to_string(),
                slugs
                    .iter()
                    .map(|s| format!("catalogue/{}/index.html", s))
                    .collect(),
            )
        } else {
            (
                format!("/catalogue/page-{}.html", page),
                slugs.iter().map(|s| format!("{}/index.html", s)).collect(),
            )
        };

        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(
                page, total, &hrefs,
            )))
            .mount(server)
            .await;
    }
}

async fn mount_book(server: &MockServer, slug: &str, name: &str, price: &str) {
    let page = book_page(name, price, price);
    mount_book_with(
        server,
        slug,
        ResponseTemplate::new(200).set_body_string(page),
        None,
    )
    .await;
}

async fn mount_book_with(
    server: &MockServer,
    slug: &str,
    response: ResponseTemplate,
    expected_hits: Option<u64>,
) {
    let mock = Mock::given(method("GET"))
        .and(path(format!("/catalogue/{}/index.html", slug)))
        .respond_with(response);

    let mock = match expected_hits {
        Some(n) => mock.expect(n),
        None => mock,
    };

    mock.mount(server).await;
}

/// Three books over two index pages
async fn mount_standard_site(server: &MockServer) {
    mount_index(server, &[&["book-1_1", "book-2_2"], &["book-3_3"]]).await;
    mount_book(server, "book-1_1", "Book One", "10.00").await;
    mount_book(server, "book-2_2", "Book Two", "20.00").await;
    mount_book(server, "book-3_3", "Book Three", "30.00").await;
}

fn open_store(dir: &TempDir) -> SqliteStorage {
    SqliteStorage::new(&db_path(dir)).expect("store should open")
}

#[tokio::test]
async fn test_first_crawl_classifies_everything_as_new() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_standard_site(&server).await;

    let config = create_test_config(&server, &db_path(&dir), true);
    let summary = run_crawl(config, CancellationToken::new()).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.frontier_size, 3);
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.new_count, 3);
    assert_eq!(summary.updated_count, 0);
    assert_eq!(summary.deleted_count, 0);

    let store = open_store(&dir);
    let entries = store.changelog_for_run(summary.run_id).unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.kind == ChangeKind::New));

    let stored = store
        .find_by_url(&item_url(&server, "book-3_3"))
        .unwrap()
        .expect("book three should be stored");
    assert_eq!(stored.record.fields.name, "Book Three");
    assert_eq!(stored.record.fields.category, "Poetry");
    assert_eq!(stored.record.fields.price_incl_tax, 30.0);
    assert_eq!(stored.record.fields.rating, Some(3));
}

#[tokio::test]
async fn test_recrawl_without_changes_is_idempotent() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_standard_site(&server).await;

    let first = run_crawl(
        create_test_config(&server, &db_path(&dir), false),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(first.new_count, 3);

    let second = run_crawl(
        create_test_config(&server, &db_path(&dir), false),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(second.attempted, 3);
    assert_eq!(second.new_count, 0);
    assert_eq!(second.updated_count, 0);
    assert_eq!(second.unchanged_count, 3);
    assert_eq!(second.deleted_count, 0);

    let store = open_store(&dir);
    assert!(store.changelog_for_run(second.run_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_price_change_is_reported_as_update() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_standard_site(&server).await;

    run_crawl(
        create_test_config(&server, &db_path(&dir), false),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let url = item_url(&server, "book-1_1");
    let before = open_store(&dir).find_by_url(&url).unwrap().unwrap();

    server.reset().await;
    mount_index(&server, &[&["book-1_1", "book-2_2"], &["book-3_3"]]).await;
    mount_book_with(
        &server,
        "book-1_1",
        ResponseTemplate::new(200).set_body_string(book_page("Book One", "10.00", "12.00")),
        None,
    )
    .await;
    mount_book(&server, "book-2_2", "Book Two", "20.00").await;
    mount_book(&server, "book-3_3", "Book Three", "30.00").await;

    let summary = run_crawl(
        create_test_config(&server, &db_path(&dir), false),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.updated_count, 1);
    assert_eq!(summary.unchanged_count, 2);
    assert_eq!(summary.fields_changed.get("price_incl_tax"), Some(&1));

    let store = open_store(&dir);
    let entries = store.changelog_for_run(summary.run_id).unwrap();
    assert_eq!(entries.len(), 1);

    let entry = &entries[0];
    assert_eq!(entry.kind, ChangeKind::Updated);
    assert_eq!(entry.source_url, url);
    assert_eq!(entry.changed_fields(), vec!["price_incl_tax"]);
    assert_eq!(entry.changes[0].old, "10.00");
    assert_eq!(entry.changes[0].new, "12.00");
    assert_eq!(
        entry.previous_fingerprint.as_deref(),
        Some(before.record.fingerprint.as_str())
    );
    assert_ne!(entry.new_fingerprint, entry.previous_fingerprint);

    let after = store.find_by_url(&url).unwrap().unwrap();
    assert_eq!(after.record.fields.price_incl_tax, 12.0);
}

#[tokio::test]
async fn test_resume_skips_known_urls() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    {
        let mut store = open_store(&dir);
        for (slug, name) in [("book-1_1", "Book One"), ("book-2_2", "Book Two")] {
            let fields = RecordFields {
                source_url: item_url(&server, slug),
                name: name.to_string(),
                description: None,
                category: "Poetry".to_string(),
                price_excl_tax: 10.0,
                price_incl_tax: 10.0,
                availability: "In stock".to_string(),
                review_count: 0,
                image_url: None,
                rating: None,
            };
            store.upsert(&Record::new(fields, Utc::now(), None)).unwrap();
        }
    }

    mount_index(&server, &[&["book-1_1", "book-2_2"], &["book-3_3"]]).await;
    let page =
        |name: &str| ResponseTemplate::new(200).set_body_string(book_page(name, "1.00", "1.00"));
    mount_book_with(&server, "book-1_1", page("Book One"), Some(0)).await;
    mount_book_with(&server, "book-2_2", page("Book Two"), Some(0)).await;
    mount_book_with(&server, "book-3_3", page("Book Three"), Some(1)).await;

    let summary = run_crawl(
        create_test_config(&server, &db_path(&dir), true),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.frontier_size, 3);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.new_count, 1);
    assert_eq!(summary.deleted_count, 0);

    server.verify().await;
}

#[tokio::test]
async fn test_transient_failure_is_retried_exactly_max_retries_times() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_index(&server, &[&["book-1_1", "book-2_2"], &["book-3_3"]]).await;
    mount_book(&server, "book-1_1", "Book One", "10.00").await;
    mount_book_with(&server, "book-2_2", ResponseTemplate::new(500), Some(3)).await;
    mount_book(&server, "book-3_3", "Book Three", "30.00").await;

    let summary = run_crawl(
        create_test_config(&server, &db_path(&dir), true),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.status, SessionStatus::CompletedWithErrors);
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);

    server.verify().await;
}

#[tokio::test]
async fn test_permanent_failure_is_isolated() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_index(
        &server,
        &[&["book-1_1", "book-2_2"], &["book-3_3", "book-4_4"], &["book-5_5"]],
    )
    .await;
    mount_book(&server, "book-1_1", "Book One", "10.00").await;
    mount_book_with(&server, "book-2_2", ResponseTemplate::new(404), Some(1)).await;
    mount_book(&server, "book-3_3", "Book Three", "30.00").await;
    mount_book(&server, "book-4_4", "Book Four", "40.00").await;
    mount_book(&server, "book-5_5", "Book Five", "50.00").await;

    let summary = run_crawl(
        create_test_config(&server, &db_path(&dir), true),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.attempted, 5);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.new_count, 4);

    let store = open_store(&dir);
    assert!(store
        .find_by_url(&item_url(&server, "book-5_5"))
        .unwrap()
        .is_some());
    assert!(store
        .find_by_url(&item_url(&server, "book-2_2"))
        .unwrap()
        .is_none());

    server.verify().await;
}

#[tokio::test]
async fn test_vanished_item_is_deleted_but_failed_item_is_not() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_standard_site(&server).await;

    run_crawl(
        create_test_config(&server, &db_path(&dir), false),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    // book-3 is gone from the index; book-2 is still listed but now fails
    server.reset().await;
    mount_index(&server, &[&["book-1_1", "book-2_2"]]).await;
    mount_book(&server, "book-1_1", "Book One", "10.00").await;
    mount_book_with(&server, "book-2_2", ResponseTemplate::new(404), None).await;

    let summary = run_crawl(
        create_test_config(&server, &db_path(&dir), false),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.deleted_count, 1);

    let store = open_store(&dir);
    let entries = store.changelog_for_run(summary.run_id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, ChangeKind::Deleted);
    assert_eq!(entries[0].source_url, item_url(&server, "book-3_3"));

    let vanished = store
        .find_by_url(&item_url(&server, "book-3_3"))
        .unwrap()
        .unwrap();
    assert_eq!(vanished.status, RecordStatus::Deleted);

    let failed = store
        .find_by_url(&item_url(&server, "book-2_2"))
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, RecordStatus::Active);
}

#[tokio::test]
async fn test_incomplete_frontier_skips_deletion_pass() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_standard_site(&server).await;

    run_crawl(
        create_test_config(&server, &db_path(&dir), false),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    // Page 2 (holding book-3) is broken this time
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(
            1,
            2,
            &[
                "catalogue/book-1_1/index.html".to_string(),
                "catalogue/book-2_2/index.html".to_string(),
            ],
        )))
        .mount(&server)
        .await;
    mount_book(&server, "book-1_1", "Book One", "10.00").await;
    mount_book(&server, "book-2_2", "Book Two", "20.00").await;

    let summary = run_crawl(
        create_test_config(&server, &db_path(&dir), false),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.frontier_size, 2);
    assert_eq!(summary.deleted_count, 0);

    let store = open_store(&dir);
    assert_eq!(store.count_records_by_status(RecordStatus::Active).unwrap(), 3);
}

#[tokio::test]
async fn test_parse_failure_counts_as_item_failure() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_index(&server, &[&["book-1_1", "book-2_2"]]).await;
    mount_book(&server, "book-1_1", "Book One", "10.00").await;
    mount_book_with(
        &server,
        "book-2_2",
        ResponseTemplate::new(200).set_body_string("<html><body>maintenance</body></html>"),
        Some(1),
    )
    .await;

    let summary = run_crawl(
        create_test_config(&server, &db_path(&dir), true),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    let store = open_store(&dir);
    assert_eq!(store.count_parse_failures(summary.run_id).unwrap(), 1);
}

#[tokio::test]
async fn test_all_items_failing_is_a_systemic_failure() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_index(&server, &[&["book-1_1", "book-2_2"], &["book-3_3"]]).await;
    // Book pages are not mounted, so every item gets a 404

    let result = run_crawl(
        create_test_config(&server, &db_path(&dir), true),
        CancellationToken::new(),
    )
    .await;

    match result {
        Err(CrawlError::AllItemsFailed(summary)) => {
            assert_eq!(summary.status, SessionStatus::Failed);
            assert_eq!(summary.attempted, 3);
            assert_eq!(summary.failed, 3);
        }
        other => panic!("expected AllItemsFailed, got {:?}", other),
    }

    let run = open_store(&dir).get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, SessionStatus::Failed);
    assert_eq!(run.failed, 3);
}

#[tokio::test]
async fn test_unreachable_index_is_fatal() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let result = run_crawl(
        create_test_config(&server, &db_path(&dir), true),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(CrawlError::Frontier(_))));

    let run = open_store(&dir).get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, SessionStatus::Failed);
}

#[tokio::test]
async fn test_cancelled_session_dispatches_no_items() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_index(&server, &[&["book-1_1", "book-2_2"]]).await;
    let page =
        |name: &str| ResponseTemplate::new(200).set_body_string(book_page(name, "1.00", "1.00"));
    mount_book_with(&server, "book-1_1", page("Book One"), Some(0)).await;
    mount_book_with(&server, "book-2_2", page("Book Two"), Some(0)).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = run_crawl(create_test_config(&server, &db_path(&dir), true), cancel)
        .await
        .unwrap();

    assert_eq!(summary.status, SessionStatus::Cancelled);
    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.deleted_count, 0);

    server.verify().await;
}
