use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::JobStore;
use crate::core::types::{
    ApiKeyRecord, BatchJobRecord, BatchResultRecord, CacheEntry, CrawlJobRecord, CrawlPageRecord,
    JobStatus, ProjectRecord,
};

/// In-process `JobStore`. Jobs and results live in `RwLock`ed maps; the
/// scrape-cache table is a bounded moka cache so a long-running instance
/// cannot grow without limit.
pub struct MemoryJobStore {
    crawl_jobs: RwLock<HashMap<Uuid, CrawlJobRecord>>,
    crawl_pages: RwLock<HashMap<Uuid, Vec<CrawlPageRecord>>>,
    batch_jobs: RwLock<HashMap<Uuid, BatchJobRecord>>,
    batch_results: RwLock<HashMap<Uuid, Vec<BatchResultRecord>>>,
    scrape_cache: moka::future::Cache<String, CacheEntry>,
    projects: RwLock<Vec<ProjectRecord>>,
    api_keys: RwLock<HashMap<Uuid, ApiKeyRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            crawl_jobs: RwLock::new(HashMap::new()),
            crawl_pages: RwLock::new(HashMap::new()),
            batch_jobs: RwLock::new(HashMap::new()),
            batch_results: RwLock::new(HashMap::new()),
            scrape_cache: moka::future::Cache::builder()
                .max_capacity(10_000)
                .build(),
            projects: RwLock::new(Vec::new()),
            api_keys: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_crawl_job(&self, job: CrawlJobRecord) -> Result<()> {
        self.crawl_jobs.write().await.insert(job.id, job);
        Ok(())
    }

    async fn get_crawl_job(&self, id: Uuid) -> Result<Option<CrawlJobRecord>> {
        Ok(self.crawl_jobs.read().await.get(&id).cloned())
    }

    async fn mark_crawl_started(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.crawl_jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            bail!("crawl job {id} not found");
        };
        if job.status == JobStatus::Queued {
            job.status = JobStatus::Scraping;
            job.started_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn finish_crawl_job(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut jobs = self.crawl_jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            bail!("crawl job {id} not found");
        };
        if job.status.is_terminal() {
            return Ok(());
        }
        job.status = status;
        job.error = error;
        job.finished_at = Some(Utc::now());
        if status == JobStatus::Canceled {
            job.canceled = true;
        }
        Ok(())
    }

    async fn incr_crawl_discovered(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.crawl_jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            job.total_discovered += 1;
        }
        Ok(())
    }

    async fn incr_crawl_counters(&self, id: Uuid, completed: u64, failed: u64) -> Result<()> {
        let mut jobs = self.crawl_jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            job.completed += completed;
            job.failed += failed;
        }
        Ok(())
    }

    async fn cancel_crawl(&self, id: Uuid) -> Result<bool> {
        let mut jobs = self.crawl_jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.canceled = true;
        Ok(true)
    }

    async fn is_crawl_canceled(&self, id: Uuid) -> Result<bool> {
        Ok(self
            .crawl_jobs
            .read()
            .await
            .get(&id)
            .map(|j| j.canceled)
            .unwrap_or(false))
    }

    async fn insert_crawl_page(&self, page: CrawlPageRecord) -> Result<()> {
        let mut pages = self.crawl_pages.write().await;
        let rows = pages.entry(page.crawl_job_id).or_default();
        // (crawl_job_id, normalized_url) keys the table; keep the first row.
        if rows.iter().any(|p| p.normalized_url == page.normalized_url) {
            return Ok(());
        }
        rows.push(page);
        Ok(())
    }

    async fn list_crawl_pages(&self, crawl_job_id: Uuid) -> Result<Vec<CrawlPageRecord>> {
        Ok(self
            .crawl_pages
            .read()
            .await
            .get(&crawl_job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_batch_job(&self, job: BatchJobRecord) -> Result<()> {
        self.batch_jobs.write().await.insert(job.id, job);
        Ok(())
    }

    async fn get_batch_job(&self, id: Uuid) -> Result<Option<BatchJobRecord>> {
        Ok(self.batch_jobs.read().await.get(&id).cloned())
    }

    async fn mark_batch_started(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.batch_jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            bail!("batch job {id} not found");
        };
        if job.status == JobStatus::Queued {
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn finish_batch_job(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut jobs = self.batch_jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            bail!("batch job {id} not found");
        };
        if job.status.is_terminal() {
            return Ok(());
        }
        job.status = status;
        job.error = error;
        job.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn incr_batch_counters(&self, id: Uuid, completed: u64, failed: u64) -> Result<()> {
        let mut jobs = self.batch_jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            job.completed += completed;
            job.failed += failed;
        }
        Ok(())
    }

    async fn insert_batch_result(&self, result: BatchResultRecord) -> Result<()> {
        self.batch_results
            .write()
            .await
            .entry(result.batch_job_id)
            .or_default()
            .push(result);
        Ok(())
    }

    async fn list_batch_results(&self, batch_job_id: Uuid) -> Result<Vec<BatchResultRecord>> {
        Ok(self
            .batch_results
            .read()
            .await
            .get(&batch_job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_cache_entry(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        match self.scrape_cache.get(fingerprint).await {
            Some(entry) if entry.expires_at > Utc::now() => Ok(Some(entry)),
            Some(_) => {
                // Expired rows are treated as absent and dropped lazily.
                self.scrape_cache.invalidate(fingerprint).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_cache_entry(&self, entry: CacheEntry) -> Result<()> {
        self.scrape_cache
            .insert(entry.fingerprint.clone(), entry)
            .await;
        Ok(())
    }

    async fn purge_expired_cache(&self) -> Result<u64> {
        let now = Utc::now();
        let mut purged = 0;
        for (key, entry) in self.scrape_cache.iter() {
            if entry.expires_at <= now {
                self.scrape_cache.invalidate(key.as_ref()).await;
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn insert_project(&self, project: ProjectRecord) -> Result<()> {
        self.projects.write().await.push(project);
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        Ok(self.projects.read().await.clone())
    }

    async fn insert_api_key(&self, key: ApiKeyRecord) -> Result<()> {
        self.api_keys.write().await.insert(key.id, key);
        Ok(())
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>> {
        Ok(self
            .api_keys
            .read()
            .await
            .values()
            .find(|k| k.key_hash == key_hash)
            .cloned())
    }

    async fn count_api_keys(&self) -> Result<u64> {
        Ok(self.api_keys.read().await.len() as u64)
    }

    async fn touch_api_key(&self, id: Uuid) -> Result<()> {
        let mut keys = self.api_keys.write().await;
        if let Some(key) = keys.get_mut(&id) {
            key.last_used_at = Some(Utc::now());
            key.usage_count += 1;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn active_job_count(&self) -> Result<u64> {
        let crawls = self
            .crawl_jobs
            .read()
            .await
            .values()
            .filter(|j| !j.status.is_terminal())
            .count() as u64;
        let batches = self
            .batch_jobs
            .read()
            .await
            .values()
            .filter(|j| !j.status.is_terminal())
            .count() as u64;
        Ok(crawls + batches)
    }
}
