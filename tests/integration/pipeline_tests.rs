//! Integration tests for the crawl pipeline
//!
//! These tests use wiremock to serve a listing page, detail pages and images,
//! and run the full coordinator against them end-to-end.

use menagerie::config::Config;
use menagerie::pipeline::DiscoveryOutcome;
use menagerie::storage::export_snapshot;
use menagerie::{Coordinator, CrawlReport, StageState};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LION_BYTES: &[u8] = b"\xff\xd8\xff\xe0lion";

/// Creates a test configuration pointing at the mock server
fn create_test_config(server: &MockServer, asset_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.source.listing_url = format!("{}/list", server.uri());
    config.source.detail_base_url = format!("{}/wiki/", server.uri());
    config.output.asset_dir = Some(asset_dir.path().to_path_buf());
    config.fetch.timeout_secs = 5;
    config.backoff.wait_timeout_ms = 50;
    config.backoff.initial_delay_ms = 10;
    config.backoff.multiplier = 1.0;
    config.backoff.max_attempts = 40;
    config.backoff.max_jitter_ms = 0;
    config
}

/// Wraps body rows in a listing table
fn listing(rows: &str) -> String {
    format!(
        r#"<html><body>
        <table class="wikitable sortable">
            <tr><th>Animal</th><th>Young</th><th>Collateral adjective</th></tr>
            {}
        </table>
        </body></html>"#,
        rows
    )
}

/// Image reference the detail pages use, scheme-relative like the real site
fn image_ref(server: &MockServer, file: &str) -> String {
    let host = server.uri().trim_start_matches("http:").to_string();
    format!("{}/media/{}", host, file)
}

fn detail_page_with_image(src: &str) -> String {
    format!(
        r#"<html><body>
        <table class="infobox"><tr><td><img src="{}"></td></tr></table>
        <p>Article text</p>
        </body></html>"#,
        src
    )
}

async fn mount_html(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

async fn mount_lion(server: &MockServer) {
    mount_html(
        server,
        "/list",
        listing(r#"<tr><td><a href="/wiki/Lion">Lion</a></td><td>cub</td><td>Feline</td></tr>"#),
    )
    .await;
    mount_lion_pages(server).await;
}

/// Mounts the Lion detail page and its image, leaving the listing to the caller
async fn mount_lion_pages(server: &MockServer) {
    mount_html(
        server,
        "/wiki/Lion",
        detail_page_with_image(&image_ref(server, "lion.jpg")),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/media/lion.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(LION_BYTES)
                .insert_header("content-type", "image/jpeg"),
        )
        .mount(server)
        .await;
}

async fn run(config: Config) -> CrawlReport {
    tokio::time::timeout(Duration::from_secs(30), Coordinator::new(config).run())
        .await
        .expect("Crawl did not finish")
        .expect("Crawl failed to start")
}

#[tokio::test]
async fn test_full_crawl_single_record() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_lion(&server).await;

    let report = run(create_test_config(&server, &dir)).await;

    assert!(report.all_done());
    assert_eq!(report.discovery.outcome, DiscoveryOutcome::Completed);
    assert_eq!(report.discovery.records_enqueued, 1);
    assert_eq!(report.detail.pages_received, 1);
    assert_eq!(report.detail.assets_found, 1);
    assert_eq!(report.detail.orphaned_records, 0);
    assert_eq!(report.persistence.written, 1);

    assert_eq!(
        report.snapshot.tags.get("Feline"),
        Some(&vec!["Lion".to_string()])
    );
    let asset_url = format!("{}/media/lion.jpg", server.uri());
    assert_eq!(
        report.snapshot.asset_refs.get(&asset_url),
        Some(&"Lion".to_string())
    );

    let file = dir.path().join("Lion.jpg");
    assert_eq!(std::fs::read(&file).unwrap(), LION_BYTES);
    assert_eq!(
        report.snapshot.local_assets.get("Lion"),
        Some(&file.to_string_lossy().into_owned())
    );
}

#[tokio::test]
async fn test_placeholder_glyph_registers_no_tags() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_html(
        &server,
        "/list",
        listing(r#"<tr><td><a href="/wiki/Xenops">Xenops</a></td><td>-</td><td>—</td></tr>"#),
    )
    .await;
    mount_html(
        &server,
        "/wiki/Xenops",
        "<html><body><p>No panel</p></body></html>".to_string(),
    )
    .await;

    let report = run(create_test_config(&server, &dir)).await;

    assert!(report.all_done());
    assert_eq!(report.discovery.records_enqueued, 1);
    assert_eq!(report.discovery.tag_registrations, 0);
    assert!(report.snapshot.tags.is_empty());
}

#[tokio::test]
async fn test_page_without_infobox_stores_nothing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_html(
        &server,
        "/list",
        listing(r#"<tr><td><a href="/wiki/Okapi">Okapi</a></td><td>calf</td><td>Okapine</td></tr>"#),
    )
    .await;
    mount_html(
        &server,
        "/wiki/Okapi",
        "<html><body><img src=\"/media/okapi.jpg\"></body></html>".to_string(),
    )
    .await;

    let report = run(create_test_config(&server, &dir)).await;

    assert!(report.all_done());
    assert_eq!(report.discovery.records_enqueued, 1);
    assert_eq!(report.detail.pages_received, 1);
    assert_eq!(report.detail.no_asset_pages, 1);
    assert_eq!(report.detail.orphaned_records, 0);
    assert!(report.snapshot.asset_refs.is_empty());
    assert!(report.snapshot.local_assets.is_empty());
    assert_eq!(report.persistence.written, 0);
    assert!(!dir.path().join("Okapi.jpg").exists());
}

#[tokio::test]
async fn test_missing_tag_column_enqueues_nothing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_html(
        &server,
        "/list",
        r#"<table class="wikitable sortable">
            <tr><th>Animal</th><th>Young</th></tr>
            <tr><td><a href="/wiki/Lion">Lion</a></td><td>cub</td></tr>
        </table>"#
            .to_string(),
    )
    .await;

    let report = run(create_test_config(&server, &dir)).await;

    assert!(report.all_done());
    assert!(matches!(
        report.discovery.outcome,
        DiscoveryOutcome::TagColumnMissing(_)
    ));
    assert_eq!(report.discovery.records_enqueued, 0);
    assert!(report.snapshot.is_empty());
}

#[tokio::test]
async fn test_missing_table_ends_cleanly() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_html(
        &server,
        "/list",
        "<html><body><p>Maintenance</p></body></html>".to_string(),
    )
    .await;

    let report = run(create_test_config(&server, &dir)).await;

    assert!(report.all_done());
    assert_eq!(report.discovery.outcome, DiscoveryOutcome::TableMissing);
    assert_eq!(report.discovery.records_enqueued, 0);
    assert_eq!(report.detail.pages_received, 0);
    assert_eq!(report.persistence.assets_received, 0);
}

#[tokio::test]
async fn test_unavailable_listing_ends_cleanly() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let report = run(create_test_config(&server, &dir)).await;

    assert!(report.all_done());
    assert!(matches!(
        report.discovery.outcome,
        DiscoveryOutcome::ListingUnavailable(_)
    ));
}

#[tokio::test]
async fn test_detail_fetch_failure_is_counted() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_html(
        &server,
        "/list",
        listing(
            r#"<tr><td><a href="/wiki/Lion">Lion</a></td><td>cub</td><td>Feline</td></tr>
               <tr><td><a href="/wiki/Ghost">Ghost</a></td><td>-</td><td>Spectral</td></tr>"#,
        ),
    )
    .await;
    mount_lion_pages(&server).await;
    Mock::given(method("GET"))
        .and(path("/wiki/Ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let report = run(create_test_config(&server, &dir)).await;

    assert!(report.all_done());
    assert_eq!(report.discovery.records_enqueued, 2);
    assert_eq!(report.detail.fetch_failures, 1);
    assert_eq!(report.detail.pages_received, 1);
    assert_eq!(report.detail.orphaned_records, 0);
    assert_eq!(report.persistence.written, 1);
    // Tags are registered at discovery time regardless of the page fetch
    assert_eq!(
        report.snapshot.tags.get("Spectral"),
        Some(&vec!["Ghost".to_string()])
    );
    assert!(!report.snapshot.local_assets.contains_key("Ghost"));
}

#[tokio::test]
async fn test_starved_workers_abandon_late_pages() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_html(
        &server,
        "/list",
        listing(
            r#"<tr><td><a href="/wiki/Hare">Hare</a></td><td>leveret</td><td>Leporine</td></tr>
               <tr><td><a href="/wiki/Sloth">Sloth</a></td><td>-</td><td>Tardigrade</td></tr>"#,
        ),
    )
    .await;
    mount_html(
        &server,
        "/wiki/Hare",
        "<html><body><p>Fast</p></body></html>".to_string(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/wiki/Sloth"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body><p>Slow</p></body></html>")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let mut config = create_test_config(&server, &dir);
    config.backoff.max_attempts = 3;

    let report = run(config).await;

    assert!(report.all_done());
    assert_eq!(report.discovery.records_enqueued, 2);
    assert!(report.detail.workers_starved > 0);
    assert!(report.detail.abandoned > 0);
    assert_eq!(
        report.detail.pages_received,
        report.detail.abandoned + report.detail.no_asset_pages
    );
    for (_, state) in &report.stage_states {
        assert_eq!(*state, StageState::Done);
    }
}

#[tokio::test]
async fn test_rerun_keeps_existing_asset() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_lion(&server).await;

    let existing = dir.path().join("Lion.jpg");
    std::fs::write(&existing, b"previous run").unwrap();

    let report = run(create_test_config(&server, &dir)).await;

    assert!(report.all_done());
    assert_eq!(report.persistence.assets_received, 1);
    assert_eq!(report.persistence.skipped_existing, 1);
    assert_eq!(report.persistence.written, 0);
    assert_eq!(std::fs::read(&existing).unwrap(), b"previous run");
    assert_eq!(
        report.snapshot.local_assets.get("Lion"),
        Some(&existing.to_string_lossy().into_owned())
    );
}

#[tokio::test]
async fn test_export_after_crawl() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_lion(&server).await;

    let report = run(create_test_config(&server, &dir)).await;
    let db_path = dir.path().join("menagerie.db");

    let first = export_snapshot(&db_path, &report.run_record(), &report.snapshot).unwrap();
    assert_eq!(first.tags, 1);
    assert_eq!(first.asset_refs, 1);
    assert_eq!(first.local_assets, 1);

    let second = export_snapshot(&db_path, &report.run_record(), &report.snapshot).unwrap();
    assert!(second.run_id > first.run_id);
}
