mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use webharvest::limits::CoordinationStore;
use webharvest::store::JobStore as _;
use serde_json::json;
use uuid::Uuid;

use webharvest::core::types::{
    BatchScrapeRequest, CrawlRequest, JobStatus, MapRequest, ScrapeFormat, ScrapeRequest,
};
use webharvest::AppState;

fn page(title: &str, links: &[String]) -> Html<String> {
    let anchors: String = links
        .iter()
        .map(|l| format!(r#"<a href="{l}">{l}</a>"#))
        .collect();
    Html(format!(
        "<html><head><title>{title}</title></head><body><main><h1>{title}</h1>\
         <p>Content for {title}.</p>{anchors}</main></body></html>"
    ))
}

async fn wait_terminal(state: &AppState, id: Uuid) -> JobStatus {
    for _ in 0..300 {
        let status = state.jobs.crawl_status(id).await.unwrap();
        if status.status.is_terminal() {
            return status.status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("crawl {id} did not reach a terminal state in time");
}

async fn wait_batch_terminal(state: &AppState, id: Uuid) -> JobStatus {
    for _ in 0..300 {
        let status = state.jobs.batch_status(id).await.unwrap();
        if status.status.is_terminal() {
            return status.status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("batch {id} did not reach a terminal state in time");
}

fn crawl_request(value: serde_json::Value) -> CrawlRequest {
    serde_json::from_value(value).unwrap()
}

// Scenario: first scrape renders and caches, the second is served from
// cache, and a different format set misses.
#[tokio::test]
async fn scrape_caches_by_fingerprint() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_handler = Arc::clone(&hits);
    let site = common::spawn_site(Router::new().route(
        "/page",
        get(move || {
            let hits = Arc::clone(&hits_handler);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                page("cached", &[])
            }
        }),
    ))
    .await;

    let state = common::test_state().await;
    let request = ScrapeRequest {
        url: format!("{site}/page"),
        formats: vec![ScrapeFormat::Markdown],
        max_age: 172_800_000,
        ..Default::default()
    };

    let first = state.jobs.scrape(&request).await.unwrap();
    assert!(first.success);
    assert!(first.warning.is_none());
    let first_markdown = first.data.markdown.clone().unwrap();
    assert!(first_markdown.contains("cached"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let second = state.jobs.scrape(&request).await.unwrap();
    assert!(second.success);
    assert_eq!(second.warning.as_deref(), Some("served from cache"));
    assert_eq!(second.data.markdown.as_deref(), Some(first_markdown.as_str()));
    assert_eq!(hits.load(Ordering::SeqCst), 1, "cache hit must not re-render");

    // A different format set has a different fingerprint.
    let html_request = ScrapeRequest {
        formats: vec![ScrapeFormat::Html],
        ..request.clone()
    };
    let third = state.jobs.scrape(&html_request).await.unwrap();
    assert!(third.success);
    assert!(third.warning.is_none());
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // maxAge = 0 always re-renders.
    let uncached = ScrapeRequest {
        max_age: 0,
        ..request.clone()
    };
    let fourth = state.jobs.scrape(&uncached).await.unwrap();
    assert!(fourth.success);
    assert!(fourth.warning.is_none());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

// Scenario: include/exclude path patterns bound the crawl and the counter
// invariant holds at completion.
#[tokio::test]
async fn crawl_honors_path_patterns_and_limits() {
    let site = {
        let router = Router::new()
            .route(
                "/guide/intro",
                get(|| async {
                    page(
                        "intro",
                        &[
                            "/guide/two".to_string(),
                            "/guide/internal/secret".to_string(),
                            "/blog/post".to_string(),
                            "https://external.invalid/x".to_string(),
                        ],
                    )
                }),
            )
            .route(
                "/guide/two",
                get(|| async { page("two", &["/guide/three".to_string()]) }),
            )
            .route("/guide/three", get(|| async { page("three", &[]) }))
            .route("/guide/internal/secret", get(|| async { page("secret", &[]) }))
            .route("/blog/post", get(|| async { page("post", &[]) }));
        common::spawn_site(router).await
    };

    let state = common::test_state().await;
    let request = crawl_request(json!({
        "url": format!("{site}/guide/intro"),
        "maxDiscoveryDepth": 2,
        "limit": 50,
        "includePaths": ["^/guide/.*"],
        "excludePaths": ["^/guide/internal/.*"],
        "sitemap": "ignore",
        "delay": 0,
        "maxConcurrency": 2
    }));

    let created = state.jobs.start_crawl(request).await.unwrap();
    let id = Uuid::parse_str(&created.id).unwrap();
    let status = wait_terminal(&state, id).await;
    assert_eq!(status, JobStatus::Completed);

    let result = state.jobs.crawl_status(id).await.unwrap();
    assert!(!result.data.is_empty());
    for page in &result.data {
        let path = url::Url::parse(&page.url).unwrap().path().to_string();
        assert!(path.starts_with("/guide/"), "unexpected page {path}");
        assert!(
            !path.starts_with("/guide/internal/"),
            "excluded page crawled: {path}"
        );
        assert!(page.markdown.is_some());
        assert_eq!(page.status_code, 200);
    }
    let urls: Vec<&str> = result.data.iter().map(|p| p.url.as_str()).collect();
    assert!(urls.iter().any(|u| u.ends_with("/guide/two")));
    assert!(urls.iter().any(|u| u.ends_with("/guide/three")));

    // completed + failed <= totalDiscovered <= limit.
    assert!(result.completed + result.failed <= result.total);
    assert!(result.total <= 50);
    assert_eq!(result.completed, result.data.len() as u64);
}

#[tokio::test]
async fn robots_disallow_all_blocks_the_crawl() {
    let site = {
        let router = Router::new()
            .route(
                "/robots.txt",
                get(|| async { "User-agent: *\nDisallow: /\n" }),
            )
            .route("/", get(|| async { page("home", &["/next".to_string()]) }))
            .route("/next", get(|| async { page("next", &[]) }));
        common::spawn_site(router).await
    };

    let state = common::test_state().await;
    let request = crawl_request(json!({
        "url": format!("{site}/"),
        "limit": 10,
        "sitemap": "ignore",
        "delay": 0
    }));
    let created = state.jobs.start_crawl(request).await.unwrap();
    let id = Uuid::parse_str(&created.id).unwrap();
    let status = wait_terminal(&state, id).await;
    assert_eq!(status, JobStatus::Completed);

    let result = state.jobs.crawl_status(id).await.unwrap();
    assert_eq!(result.total, 0);
    assert!(result.data.is_empty());
}

// Scenario: a 429 with Retry-After delays the next request to that host,
// and one success clears the backoff.
#[tokio::test]
async fn throttling_applies_and_clears_backoff() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_handler = Arc::clone(&calls);
    let site = common::spawn_site(Router::new().route(
        "/flaky",
        get(move || {
            let calls = Arc::clone(&calls_handler);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        [("Retry-After", "1")],
                        "slow down".to_string(),
                    )
                        .into_response()
                } else {
                    page("ok", &[]).into_response()
                }
            }
        }),
    ))
    .await;

    let state = common::test_state().await;
    let request = ScrapeRequest {
        url: format!("{site}/flaky"),
        max_age: 0,
        ..Default::default()
    };

    let first = state.jobs.scrape(&request).await.unwrap();
    assert!(!first.success);
    assert_eq!(first.data.metadata.status_code, 429);

    // The second request must wait out the Retry-After window.
    let started = tokio::time::Instant::now();
    let second = state.jobs.scrape(&request).await.unwrap();
    assert!(second.success);
    assert!(
        started.elapsed() >= Duration::from_millis(950),
        "expected >=1s spacing, got {:?}",
        started.elapsed()
    );

    // Backoff cleared after the success.
    let backoff = state
        .coordination
        .get_i64(&format!(
            "rate_limit:{}:backoff",
            url::Url::parse(&site).unwrap().host_str().unwrap()
        ))
        .await
        .unwrap();
    assert!(backoff.is_none() || backoff == Some(0));
}

// Scenario: a batch of URLs with bounded concurrency attempts everything
// and never exceeds the in-flight cap.
#[tokio::test]
async fn batch_bounds_concurrency_and_counts_everything() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let site = {
        let in_flight = Arc::clone(&in_flight);
        let max_seen = Arc::clone(&max_seen);
        common::spawn_site(Router::new().route(
            "/item/{n}",
            get(move |axum::extract::Path(n): axum::extract::Path<u32>| {
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    page(&format!("item {n}"), &[])
                }
            }),
        ))
        .await
    };

    // Per-domain limit raised so the batch cap is the binding constraint.
    let state = common::test_state_with(|c| c.rate_limit_per_domain = 100).await;
    let urls: Vec<String> = (0..30).map(|n| format!("{site}/item/{n}")).collect();
    let request: BatchScrapeRequest = serde_json::from_value(json!({
        "urls": urls,
        "maxConcurrency": 10
    }))
    .unwrap();

    let created = state.jobs.start_batch(request).await.unwrap();
    let id = Uuid::parse_str(&created.id).unwrap();
    let status = wait_batch_terminal(&state, id).await;
    assert_eq!(status, JobStatus::Completed);

    let result = state.jobs.batch_status(id).await.unwrap();
    assert_eq!(result.total, 30);
    assert_eq!(result.completed + result.failed, 30);
    assert_eq!(result.data.len(), 30);
    assert!(
        max_seen.load(Ordering::SeqCst) <= 10,
        "in-flight exceeded the cap: {}",
        max_seen.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn batch_handles_invalid_and_empty_input() {
    let state = common::test_state().await;

    // Empty list with ignoreInvalidURLs completes with zero counters.
    let request: BatchScrapeRequest = serde_json::from_value(json!({
        "urls": [],
        "ignoreInvalidURLs": true
    }))
    .unwrap();
    let created = state.jobs.start_batch(request).await.unwrap();
    let id = Uuid::parse_str(&created.id).unwrap();
    let status = wait_batch_terminal(&state, id).await;
    assert_eq!(status, JobStatus::Completed);
    let result = state.jobs.batch_status(id).await.unwrap();
    assert_eq!(result.completed, 0);
    assert_eq!(result.failed, 0);

    // Invalid URLs recorded as failures when not ignored.
    let request: BatchScrapeRequest = serde_json::from_value(json!({
        "urls": ["not a url", "ftp://nope"],
        "ignoreInvalidURLs": false
    }))
    .unwrap();
    let created = state.jobs.start_batch(request).await.unwrap();
    assert_eq!(
        created.invalid_urls.as_ref().map(|v| v.len()),
        Some(2)
    );
    let id = Uuid::parse_str(&created.id).unwrap();
    let status = wait_batch_terminal(&state, id).await;
    assert_eq!(status, JobStatus::Completed);
    let result = state.jobs.batch_status(id).await.unwrap();
    assert_eq!(result.total, 2);
    assert_eq!(result.failed, 2);
    assert_eq!(result.completed, 0);
}

// Scenario: sitemap-only mapping returns exactly the same-domain sitemap
// contents, capped at the limit.
#[tokio::test]
async fn map_sitemap_only_returns_sitemap_urls() {
    let site_holder: Arc<std::sync::Mutex<String>> =
        Arc::new(std::sync::Mutex::new(String::new()));
    let sitemap_holder = Arc::clone(&site_holder);
    let router = Router::new()
        .route(
            "/sitemap.xml",
            get(move || {
                let base = sitemap_holder.lock().unwrap().clone();
                async move {
                    format!(
                        r#"<?xml version="1.0"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/a</loc></url>
  <url><loc>{base}/b</loc></url>
  <url><loc>{base}/c</loc></url>
  <url><loc>https://elsewhere.invalid/offsite</loc></url>
</urlset>"#
                    )
                }
            }),
        )
        .route("/", get(|| async { page("home", &["/on-page".to_string()]) }));
    let site = common::spawn_site(router).await;
    *site_holder.lock().unwrap() = site.clone();

    let state = common::test_state().await;
    let request: MapRequest = serde_json::from_value(json!({
        "url": format!("{site}/"),
        "sitemapOnly": true,
        "limit": 2
    }))
    .unwrap();
    let response = state.jobs.map_site(&request).await.unwrap();

    assert!(response.metadata.sitemap_found);
    assert!(response.metadata.truncated);
    assert_eq!(response.links.len(), 2);
    for link in &response.links {
        assert!(link.starts_with(&site), "off-site link leaked: {link}");
        assert!(!link.contains("on-page"), "on-page link in sitemap-only map");
    }
}

#[tokio::test]
async fn map_merges_page_links_and_filters_by_search() {
    let site = {
        let router = Router::new().route(
            "/",
            get(|| async {
                page(
                    "home",
                    &[
                        "/docs/alpha".to_string(),
                        "/docs/beta".to_string(),
                        "/pricing".to_string(),
                    ],
                )
            }),
        );
        common::spawn_site(router).await
    };

    let state = common::test_state().await;
    let request: MapRequest = serde_json::from_value(json!({
        "url": format!("{site}/"),
        "search": "docs",
        "limit": 100
    }))
    .unwrap();
    let response = state.jobs.map_site(&request).await.unwrap();
    assert!(!response.metadata.sitemap_found);
    assert_eq!(response.links.len(), 2);
    assert!(response.links.iter().all(|l| l.contains("/docs/")));
}

// Scenario: cancellation midway reaches `canceled`, stamps finishedAt, and
// stops inserting pages.
#[tokio::test]
async fn crawl_cancel_midway() {
    let site = {
        let mut router = Router::new().route(
            "/",
            get(|| async {
                let links: Vec<String> = (0..20).map(|n| format!("/p/{n}")).collect();
                page("home", &links)
            }),
        );
        router = router.route(
            "/p/{n}",
            get(|axum::extract::Path(n): axum::extract::Path<u32>| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                page(&format!("p{n}"), &[])
            }),
        );
        common::spawn_site(router).await
    };

    let state = common::test_state().await;
    let request = crawl_request(json!({
        "url": format!("{site}/"),
        "limit": 30,
        "sitemap": "ignore",
        "delay": 0,
        "maxConcurrency": 1
    }));
    let created = state.jobs.start_crawl(request).await.unwrap();
    let id = Uuid::parse_str(&created.id).unwrap();

    // Let the crawl get going, then cancel.
    tokio::time::sleep(Duration::from_millis(450)).await;
    state.jobs.cancel_crawl(id).await.unwrap();

    let status = wait_terminal(&state, id).await;
    assert_eq!(status, JobStatus::Canceled);

    let at_cancel = state.jobs.crawl_status(id).await.unwrap();
    let job = state.store.get_crawl_job(id).await.unwrap().unwrap();
    assert!(job.finished_at.is_some());
    assert!(job.canceled);
    assert!(
        (at_cancel.data.len() as u64) < 20,
        "cancellation should stop the crawl early"
    );

    // No rows arrive after the terminal state.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let later = state.jobs.crawl_status(id).await.unwrap();
    assert_eq!(later.data.len(), at_cancel.data.len());
    assert_eq!(later.completed, at_cancel.completed);
}

// maxPages = 0 terminates immediately with zero pages.
#[tokio::test]
async fn crawl_with_zero_limit_completes_empty() {
    let site = {
        let router = Router::new().route("/", get(|| async { page("home", &[]) }));
        common::spawn_site(router).await
    };

    let state = common::test_state().await;
    let request = crawl_request(json!({
        "url": format!("{site}/"),
        "limit": 0,
        "sitemap": "ignore",
        "delay": 0
    }));
    let created = state.jobs.start_crawl(request).await.unwrap();
    let id = Uuid::parse_str(&created.id).unwrap();
    let status = wait_terminal(&state, id).await;
    assert_eq!(status, JobStatus::Completed);
    let result = state.jobs.crawl_status(id).await.unwrap();
    assert_eq!(result.total, 0);
    assert!(result.data.is_empty());
}
