use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{error, info};
use uuid::Uuid;

use crate::core::types::{BatchJobRecord, BatchResultRecord, JobStatus};
use crate::scraping::ScrapeExecutor;
use crate::store::JobStore;

/// Fans out an explicit URL list through the scrape executor with bounded
/// concurrency, persisting one result row per URL and keeping the batch
/// counters current after every finished scrape.
pub struct BatchOrchestrator {
    store: Arc<dyn JobStore>,
    executor: Arc<ScrapeExecutor>,
}

impl BatchOrchestrator {
    pub fn new(store: Arc<dyn JobStore>, executor: Arc<ScrapeExecutor>) -> Self {
        Self { store, executor }
    }

    pub async fn run(&self, job: BatchJobRecord) -> JobStatus {
        let job_id = job.id;
        info!("batch {job_id} starting: {} urls", job.urls.len());
        match self.process(job).await {
            Ok(()) => {
                info!("batch {job_id} completed");
                JobStatus::Completed
            }
            Err(e) => {
                error!("batch {job_id} failed: {e:#}");
                let _ = self
                    .store
                    .finish_batch_job(job_id, JobStatus::Failed, Some(e.to_string()))
                    .await;
                JobStatus::Failed
            }
        }
    }

    async fn process(&self, job: BatchJobRecord) -> Result<()> {
        let job_id = job.id;
        self.store.mark_batch_started(job_id).await?;

        let scrape_options = job.request.scrape_options.clone().unwrap_or_default();
        let max_concurrency = job.request.max_concurrency.max(1);

        let mut results = stream::iter(job.urls.into_iter())
            .map(|url| {
                let executor = Arc::clone(&self.executor);
                let request = scrape_options.to_request(&url);
                async move {
                    let outcome = executor.scrape(&request).await;
                    (url, outcome)
                }
            })
            .buffer_unordered(max_concurrency);

        while let Some((url, outcome)) = results.next().await {
            let success = outcome.success;
            let data = outcome.data;
            let row = BatchResultRecord {
                id: Uuid::new_v4(),
                batch_job_id: job_id,
                url,
                success,
                status_code: data.metadata.status_code,
                markdown: data.markdown,
                html: data.html,
                metadata: data.metadata,
                content_hash: data.content_hash,
                error: outcome.error,
                created_at: chrono::Utc::now(),
            };
            self.store.insert_batch_result(row).await?;
            if success {
                self.store.incr_batch_counters(job_id, 1, 0).await?;
            } else {
                self.store.incr_batch_counters(job_id, 0, 1).await?;
            }
        }

        self.store
            .finish_batch_job(job_id, JobStatus::Completed, None)
            .await?;
        Ok(())
    }
}
