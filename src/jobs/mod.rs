//! Job orchestration: the crawl and batch orchestrators plus the
//! request→job adapter shared by the HTTP API and the tool-call surface.

pub mod batch;
pub mod crawl;
pub mod map;

pub use batch::BatchOrchestrator;
pub use crawl::CrawlOrchestrator;

use std::sync::Arc;

use prometheus::IntGauge;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::config::HarvestConfig;
use crate::core::error::ApiError;
use crate::core::types::{
    BatchJobRecord, BatchResultRecord, BatchScrapeRequest, BatchStatusResponse, CrawlJobRecord,
    CrawlRequest, CrawlStatusResponse, JobCreatedResponse, JobStatus, MapRequest, MapResponse,
    ProjectRecord, ScrapeRequest, ScrapeResponse,
};
use crate::crawl::{normalize, policy_from_request};
use crate::scraping::ScrapeExecutor;
use crate::store::{JobStore, ResponseCache};

/// Request→job adapter over the orchestrators, the executor, and the
/// response cache. One instance is shared by the `/v2` handlers and the
/// RPC tools.
pub struct JobService {
    store: Arc<dyn JobStore>,
    executor: Arc<ScrapeExecutor>,
    cache: ResponseCache,
    http_client: reqwest::Client,
    config: HarvestConfig,
    active_crawls: IntGauge,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<ScrapeExecutor>,
        http_client: reqwest::Client,
        config: HarvestConfig,
        active_crawls: IntGauge,
    ) -> Self {
        Self {
            cache: ResponseCache::new(Arc::clone(&store)),
            store,
            executor,
            http_client,
            config,
            active_crawls,
        }
    }

    // -- scrape -----------------------------------------------------------

    /// Single-URL scrape: cache lookup first, then a synchronous render.
    /// Target failures come back as `success: false` payloads, not errors.
    pub async fn scrape(&self, request: &ScrapeRequest) -> Result<ScrapeResponse, ApiError> {
        if !normalize::is_valid(&request.url) {
            return Err(ApiError::Validation(format!(
                "invalid URL: {}",
                request.url
            )));
        }

        if let Some(cached) = self
            .cache
            .lookup(request)
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?
        {
            return Ok(ScrapeResponse {
                success: true,
                data: cached,
                warning: Some("served from cache".to_string()),
                error: None,
            });
        }

        let outcome = self.executor.scrape(request).await;
        if outcome.success {
            if let Err(e) = self.cache.record(request, &outcome.data).await {
                warn!("cache write failed for {}: {e}", request.url);
            }
        }
        Ok(ScrapeResponse {
            success: outcome.success,
            data: outcome.data,
            warning: None,
            error: outcome.error,
        })
    }

    // -- crawl ------------------------------------------------------------

    /// Persist a crawl job and hand it to a background orchestrator.
    pub async fn start_crawl(&self, request: CrawlRequest) -> Result<JobCreatedResponse, ApiError> {
        if !normalize::is_valid(&request.url) {
            return Err(ApiError::Validation(format!(
                "invalid URL: {}",
                request.url
            )));
        }
        // Reject bad path patterns at submission time.
        policy_from_request(&request, self.config.max_pages_hard_cap)
            .map_err(|e| ApiError::Validation(format!("invalid path pattern: {e}")))?;

        let job = CrawlJobRecord::new(request);
        let id = job.id;
        self.store
            .insert_crawl_job(job.clone())
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?;

        let orchestrator = CrawlOrchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.executor),
            self.http_client.clone(),
            self.config.max_pages_hard_cap,
        );
        let gauge = self.active_crawls.clone();
        let webhook = job.webhook_url.clone();
        let store = Arc::clone(&self.store);
        let client = self.http_client.clone();
        tokio::spawn(async move {
            gauge.inc();
            // The worker boundary: a panicking task still settles the job.
            let status = match tokio::spawn(async move { orchestrator.run(job).await }).await {
                Ok(status) => status,
                Err(e) => {
                    error!("crawl worker panicked: {e}");
                    let _ = store
                        .finish_crawl_job(
                            id,
                            JobStatus::Failed,
                            Some(format!("worker panic: {e}")),
                        )
                        .await;
                    JobStatus::Failed
                }
            };
            gauge.dec();
            notify_webhook(&client, &store, webhook.as_deref(), id, status, "crawl").await;
        });

        Ok(JobCreatedResponse {
            success: true,
            id: id.to_string(),
            url: format!("/v2/crawl/{id}"),
            invalid_urls: None,
        })
    }

    pub async fn crawl_status(&self, id: Uuid) -> Result<CrawlStatusResponse, ApiError> {
        let job = self
            .store
            .get_crawl_job(id)
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound("crawl job".to_string()))?;
        let pages = self
            .store
            .list_crawl_pages(id)
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?;
        Ok(CrawlStatusResponse {
            success: true,
            status: job.status,
            total: job.total_discovered,
            completed: job.completed,
            failed: job.failed,
            error: job.error,
            data: pages,
        })
    }

    /// Flip the cancel flag; the orchestrator observes it between
    /// iterations and settles the job to `canceled`.
    pub async fn cancel_crawl(&self, id: Uuid) -> Result<(), ApiError> {
        let job = self
            .store
            .get_crawl_job(id)
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound("crawl job".to_string()))?;
        let requested = self
            .store
            .cancel_crawl(id)
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?;
        if requested && job.status == JobStatus::Queued {
            // Never picked up; settle it directly.
            let _ = self
                .store
                .finish_crawl_job(id, JobStatus::Canceled, None)
                .await;
        }
        info!("crawl {id} cancellation requested");
        Ok(())
    }

    // -- batch ------------------------------------------------------------

    pub async fn start_batch(
        &self,
        request: BatchScrapeRequest,
    ) -> Result<JobCreatedResponse, ApiError> {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for url in &request.urls {
            if normalize::is_valid(url) {
                valid.push(url.clone());
            } else {
                invalid.push(url.clone());
            }
        }

        let record_invalid_as_failures = !request.ignore_invalid_urls;
        let mut job = BatchJobRecord::new(valid.clone(), request);
        if record_invalid_as_failures {
            job.total_urls += invalid.len() as u64;
        }
        let id = job.id;
        self.store
            .insert_batch_job(job.clone())
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?;

        if record_invalid_as_failures {
            for url in &invalid {
                let row = BatchResultRecord {
                    id: Uuid::new_v4(),
                    batch_job_id: id,
                    url: url.clone(),
                    success: false,
                    status_code: 0,
                    markdown: None,
                    html: None,
                    metadata: Default::default(),
                    content_hash: None,
                    error: Some("invalid URL".to_string()),
                    created_at: chrono::Utc::now(),
                };
                self.store
                    .insert_batch_result(row)
                    .await
                    .map_err(|e| ApiError::Store(e.to_string()))?;
                self.store
                    .incr_batch_counters(id, 0, 1)
                    .await
                    .map_err(|e| ApiError::Store(e.to_string()))?;
            }
        }

        let orchestrator =
            BatchOrchestrator::new(Arc::clone(&self.store), Arc::clone(&self.executor));
        let webhook = job.webhook_url.clone();
        let store = Arc::clone(&self.store);
        let client = self.http_client.clone();
        tokio::spawn(async move {
            let status = match tokio::spawn(async move { orchestrator.run(job).await }).await {
                Ok(status) => status,
                Err(e) => {
                    error!("batch worker panicked: {e}");
                    let _ = store
                        .finish_batch_job(
                            id,
                            JobStatus::Failed,
                            Some(format!("worker panic: {e}")),
                        )
                        .await;
                    JobStatus::Failed
                }
            };
            notify_webhook(&client, &store, webhook.as_deref(), id, status, "batch").await;
        });

        Ok(JobCreatedResponse {
            success: true,
            id: id.to_string(),
            url: format!("/v2/batch/scrape/{id}"),
            invalid_urls: if invalid.is_empty() {
                None
            } else {
                Some(invalid)
            },
        })
    }

    pub async fn batch_status(&self, id: Uuid) -> Result<BatchStatusResponse, ApiError> {
        let job = self
            .store
            .get_batch_job(id)
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound("batch job".to_string()))?;
        let results = self
            .store
            .list_batch_results(id)
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?;
        Ok(BatchStatusResponse {
            success: true,
            status: job.status,
            total: job.total_urls,
            completed: job.completed,
            failed: job.failed,
            error: job.error,
            data: results,
        })
    }

    // -- map --------------------------------------------------------------

    pub async fn map_site(&self, request: &MapRequest) -> Result<MapResponse, ApiError> {
        if !normalize::is_valid(&request.url) {
            return Err(ApiError::Validation(format!(
                "invalid URL: {}",
                request.url
            )));
        }
        if request.limit > 100_000 {
            return Err(ApiError::Validation(
                "limit must be at most 100000".to_string(),
            ));
        }
        Ok(map::map_site(&self.http_client, request).await)
    }

    // -- projects ---------------------------------------------------------

    pub async fn create_project(
        &self,
        name: String,
        description: Option<String>,
    ) -> Result<ProjectRecord, ApiError> {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("project name is required".to_string()));
        }
        let project = ProjectRecord {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            description,
            created_at: chrono::Utc::now(),
        };
        self.store
            .insert_project(project.clone())
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?;
        Ok(project)
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>, ApiError> {
        self.store
            .list_projects()
            .await
            .map_err(|e| ApiError::Store(e.to_string()))
    }
}

/// Best-effort terminal-state notification.
async fn notify_webhook(
    client: &reqwest::Client,
    store: &Arc<dyn JobStore>,
    webhook: Option<&str>,
    id: Uuid,
    status: JobStatus,
    kind: &str,
) {
    let Some(webhook) = webhook else {
        return;
    };
    let (completed, failed) = match kind {
        "crawl" => match store.get_crawl_job(id).await {
            Ok(Some(job)) => (job.completed, job.failed),
            _ => (0, 0),
        },
        _ => match store.get_batch_job(id).await {
            Ok(Some(job)) => (job.completed, job.failed),
            _ => (0, 0),
        },
    };
    let payload = serde_json::json!({
        "type": format!("{kind}.{}", status.as_str()),
        "id": id.to_string(),
        "status": status.as_str(),
        "completed": completed,
        "failed": failed,
    });
    match client
        .post(webhook)
        .json(&payload)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
    {
        Ok(resp) if !resp.status().is_success() => {
            warn!("webhook {webhook} answered {}", resp.status())
        }
        Ok(_) => {}
        Err(e) => warn!("webhook {webhook} failed: {e}"),
    }
}
