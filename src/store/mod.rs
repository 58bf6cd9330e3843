//! Durable state for scrape/crawl/batch jobs, pages, cache entries,
//! projects, and API keys.
//!
//! The `JobStore` trait is the repository boundary: record types in
//! `core::types` map 1:1 to its tables, mutations are explicit methods (no
//! ORM), and the in-memory implementation provides the read-after-write
//! consistency the orchestrators rely on. `DATABASE_URL` is reserved for a
//! relational implementation of the same trait.

mod cache;
mod memory;

pub use cache::{fingerprint, ResponseCache};
pub use memory::MemoryJobStore;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::core::types::{
    ApiKeyRecord, BatchJobRecord, BatchResultRecord, CacheEntry, CrawlJobRecord, CrawlPageRecord,
    JobStatus, ProjectRecord,
};

#[async_trait]
pub trait JobStore: Send + Sync {
    // -- crawl jobs -------------------------------------------------------

    async fn insert_crawl_job(&self, job: CrawlJobRecord) -> Result<()>;

    async fn get_crawl_job(&self, id: Uuid) -> Result<Option<CrawlJobRecord>>;

    /// `queued → scraping`, stamping `started_at`.
    async fn mark_crawl_started(&self, id: Uuid) -> Result<()>;

    /// Transition to a terminal status, stamping `finished_at`. Terminal
    /// jobs are immutable afterwards.
    async fn finish_crawl_job(&self, id: Uuid, status: JobStatus, error: Option<String>)
        -> Result<()>;

    async fn incr_crawl_discovered(&self, id: Uuid) -> Result<()>;

    /// Bump the completed/failed counters. Callers persist the page row
    /// first so observers never see a counter ahead of the stored pages.
    async fn incr_crawl_counters(&self, id: Uuid, completed: u64, failed: u64) -> Result<()>;

    /// Request cancellation; the orchestrator observes the flag between
    /// iterations.
    async fn cancel_crawl(&self, id: Uuid) -> Result<bool>;

    async fn is_crawl_canceled(&self, id: Uuid) -> Result<bool>;

    async fn insert_crawl_page(&self, page: CrawlPageRecord) -> Result<()>;

    async fn list_crawl_pages(&self, crawl_job_id: Uuid) -> Result<Vec<CrawlPageRecord>>;

    // -- batch jobs -------------------------------------------------------

    async fn insert_batch_job(&self, job: BatchJobRecord) -> Result<()>;

    async fn get_batch_job(&self, id: Uuid) -> Result<Option<BatchJobRecord>>;

    /// `queued → processing`, stamping `started_at`.
    async fn mark_batch_started(&self, id: Uuid) -> Result<()>;

    async fn finish_batch_job(&self, id: Uuid, status: JobStatus, error: Option<String>)
        -> Result<()>;

    async fn incr_batch_counters(&self, id: Uuid, completed: u64, failed: u64) -> Result<()>;

    async fn insert_batch_result(&self, result: BatchResultRecord) -> Result<()>;

    async fn list_batch_results(&self, batch_job_id: Uuid) -> Result<Vec<BatchResultRecord>>;

    // -- scrape cache -----------------------------------------------------

    async fn get_cache_entry(&self, fingerprint: &str) -> Result<Option<CacheEntry>>;

    async fn put_cache_entry(&self, entry: CacheEntry) -> Result<()>;

    /// Drop expired rows. Correctness does not depend on this; lookups
    /// already treat expired rows as absent.
    async fn purge_expired_cache(&self) -> Result<u64>;

    // -- projects ---------------------------------------------------------

    async fn insert_project(&self, project: ProjectRecord) -> Result<()>;

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>>;

    // -- api keys ---------------------------------------------------------

    async fn insert_api_key(&self, key: ApiKeyRecord) -> Result<()>;

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>>;

    async fn count_api_keys(&self) -> Result<u64>;

    /// Stamp `last_used_at` and bump `usage_count`.
    async fn touch_api_key(&self, id: Uuid) -> Result<()>;

    // -- health -----------------------------------------------------------

    async fn ping(&self) -> Result<()>;

    /// Jobs currently in a non-terminal state, reported by readiness checks.
    async fn active_job_count(&self) -> Result<u64>;
}
