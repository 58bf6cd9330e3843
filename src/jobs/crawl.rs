use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info};
use uuid::Uuid;

use crate::core::types::{
    CrawlJobRecord, CrawlPageRecord, JobStatus, ScrapeFormat, ScrapeOutcome, SitemapMode,
};
use crate::crawl::{policy_from_request, CrawlFrontier, RobotsCache, SitemapResolver};
use crate::scraping::ScrapeExecutor;
use crate::store::JobStore;

pub const CRAWLER_USER_AGENT: &str = concat!("webharvest/", env!("CARGO_PKG_VERSION"));

/// Drives one crawl job: seeds the frontier, schedules scrapes with bounded
/// concurrency, persists pages, and walks the job through its lifecycle.
pub struct CrawlOrchestrator {
    store: Arc<dyn JobStore>,
    executor: Arc<ScrapeExecutor>,
    http_client: reqwest::Client,
    max_pages_hard_cap: usize,
}

impl CrawlOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<ScrapeExecutor>,
        http_client: reqwest::Client,
        max_pages_hard_cap: usize,
    ) -> Self {
        Self {
            store,
            executor,
            http_client,
            max_pages_hard_cap,
        }
    }

    /// Run the job to a terminal state. Store failures abort the crawl and
    /// mark it failed; per-page failures only bump the failed counter.
    pub async fn run(&self, job: CrawlJobRecord) -> JobStatus {
        let job_id = job.id;
        let seed = job.seed_url.clone();
        info!("crawl {job_id} starting: {seed}");

        let final_status = match self.crawl(job).await {
            Ok(status) => status,
            Err(e) => {
                error!("crawl {job_id} failed: {e:#}");
                let _ = self
                    .store
                    .finish_crawl_job(job_id, JobStatus::Failed, Some(e.to_string()))
                    .await;
                JobStatus::Failed
            }
        };
        info!("crawl {job_id} finished: {}", final_status.as_str());
        final_status
    }

    async fn crawl(&self, job: CrawlJobRecord) -> Result<JobStatus> {
        let job_id = job.id;
        let request = job.request;

        self.store.mark_crawl_started(job_id).await?;

        let policy = policy_from_request(&request, self.max_pages_hard_cap)?;
        let robots = RobotsCache::new(self.http_client.clone(), CRAWLER_USER_AGENT);
        let mut frontier = CrawlFrontier::new(policy, robots);

        if matches!(request.sitemap, SitemapMode::Include | SitemapMode::Only) {
            let advertised = frontier.robots().sitemaps_for(&request.url).await;
            let resolver = SitemapResolver::new(self.http_client.clone());
            let (urls, found) = resolver.resolve(&request.url, &advertised).await;
            if found {
                frontier.ingest_sitemap_urls(urls);
            }
        }

        let scrape_options = request.scrape_options.clone().unwrap_or_default();
        // Intra-crawl pacing: the requested delay, widened by the host's
        // robots.txt Crawl-delay when one is declared.
        let mut delay = Duration::from_millis(request.delay);
        if request.respect_robots_txt {
            if let Some(robots_delay) = frontier.robots().crawl_delay_for(&request.url).await {
                let robots_delay = Duration::from_millis((robots_delay * 1000.0) as u64);
                if robots_delay > delay {
                    delay = robots_delay;
                }
            }
        }
        let max_concurrency = request.max_concurrency.max(1);

        let mut in_flight: FuturesUnordered<_> = FuturesUnordered::new();
        let mut canceled = false;

        loop {
            if self.store.is_crawl_canceled(job_id).await? {
                canceled = true;
                break;
            }

            while in_flight.len() < max_concurrency {
                let Some(url) = frontier.next().await else {
                    break;
                };
                self.store.incr_crawl_discovered(job_id).await?;
                let depth = frontier.depth_of(&url);
                let executor = Arc::clone(&self.executor);
                let mut page_request = scrape_options.to_request(&url);
                // Discovery requires the link set even when the caller did
                // not ask for it.
                if !page_request.formats.contains(&ScrapeFormat::Links) {
                    page_request.formats.push(ScrapeFormat::Links);
                }
                in_flight.push(async move {
                    let started = tokio::time::Instant::now();
                    let outcome = executor.scrape(&page_request).await;
                    (url, depth, outcome, started.elapsed().as_millis() as u64)
                });
            }

            let Some((url, depth, outcome, elapsed_ms)) = in_flight.next().await else {
                break;
            };
            self.record_page(job_id, &url, &outcome, elapsed_ms).await?;
            if outcome.success {
                if let Some(links) = &outcome.data.links {
                    frontier.add_discovered(links, depth);
                }
            }

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        // In-flight scrapes finish cleanly (tokens and engines released),
        // but nothing observed after cancellation is persisted.
        while let Some((url, _, _, _)) = in_flight.next().await {
            if canceled {
                info!("crawl {job_id}: discarding post-cancel result for {url}");
            }
        }

        let status = if canceled {
            JobStatus::Canceled
        } else {
            JobStatus::Completed
        };
        self.store.finish_crawl_job(job_id, status, None).await?;
        Ok(status)
    }

    /// Page row is durable before the counter bump, so pollers never see
    /// `completed` run ahead of stored pages.
    async fn record_page(
        &self,
        job_id: Uuid,
        url: &str,
        outcome: &ScrapeOutcome,
        elapsed_ms: u64,
    ) -> Result<()> {
        if !outcome.success {
            self.store.incr_crawl_counters(job_id, 0, 1).await?;
            return Ok(());
        }
        let data = &outcome.data;
        let page = CrawlPageRecord {
            id: Uuid::new_v4(),
            crawl_job_id: job_id,
            url: url.to_string(),
            normalized_url: crate::crawl::normalize::normalize(url, false),
            status_code: data.metadata.status_code,
            markdown: data.markdown.clone(),
            html: data.html.clone(),
            raw_html: data.raw_html.clone(),
            links: data.links.clone().unwrap_or_default(),
            images: data.images.clone().unwrap_or_default(),
            metadata: data.metadata.clone(),
            content_hash: data.content_hash.clone(),
            error: None,
            created_at: chrono::Utc::now(),
            processing_time_ms: elapsed_ms,
        };
        self.store.insert_crawl_page(page).await?;
        self.store.incr_crawl_counters(job_id, 1, 0).await?;
        Ok(())
    }
}
