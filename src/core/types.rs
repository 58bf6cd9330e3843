use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Scrape request / result wire types (Firecrawl-v2 shaped, camelCase)
// ---------------------------------------------------------------------------

/// Output representations a scrape can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScrapeFormat {
    #[serde(rename = "markdown")]
    Markdown,
    #[serde(rename = "html")]
    Html,
    #[serde(rename = "rawHtml")]
    RawHtml,
    #[serde(rename = "links")]
    Links,
    #[serde(rename = "images")]
    Images,
    #[serde(rename = "screenshot")]
    Screenshot,
}

impl ScrapeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeFormat::Markdown => "markdown",
            ScrapeFormat::Html => "html",
            ScrapeFormat::RawHtml => "rawHtml",
            ScrapeFormat::Links => "links",
            ScrapeFormat::Images => "images",
            ScrapeFormat::Screenshot => "screenshot",
        }
    }
}

/// Browser actions executed after navigation, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Wait {
        #[serde(default = "default_wait_ms")]
        milliseconds: u64,
    },
    Click {
        selector: String,
    },
    #[serde(rename = "type")]
    TypeText {
        selector: String,
        text: String,
    },
    Scroll {
        #[serde(default)]
        y: i64,
    },
    Press {
        key: String,
    },
    Screenshot {
        #[serde(rename = "fullPage", default)]
        full_page: bool,
    },
}

fn default_wait_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(default = "default_formats")]
    pub formats: Vec<ScrapeFormat>,
    #[serde(rename = "onlyMainContent", default = "default_true")]
    pub only_main_content: bool,
    #[serde(rename = "includeTags", default)]
    pub include_tags: Option<Vec<String>>,
    #[serde(rename = "excludeTags", default)]
    pub exclude_tags: Option<Vec<String>>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(rename = "waitFor", default)]
    pub wait_for: Option<u64>,
    #[serde(default)]
    pub mobile: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    /// Cache max age in milliseconds. 0 disables both cache read and write.
    #[serde(rename = "maxAge", default = "default_max_age_ms")]
    pub max_age: u64,
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
    /// Resource types aborted before they hit the network (image, media, font, ...).
    #[serde(rename = "blockResources", default)]
    pub block_resources: Option<Vec<String>>,
    #[serde(default)]
    pub cookies: Option<Vec<CookieInput>>,
}

fn default_formats() -> Vec<ScrapeFormat> {
    vec![ScrapeFormat::Markdown]
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Two days, matching the public API default.
fn default_max_age_ms() -> u64 {
    172_800_000
}

impl Default for ScrapeRequest {
    fn default() -> Self {
        Self {
            url: String::new(),
            formats: default_formats(),
            only_main_content: true,
            include_tags: None,
            exclude_tags: None,
            headers: None,
            wait_for: None,
            mobile: false,
            timeout: default_timeout_ms(),
            max_age: default_max_age_ms(),
            actions: None,
            block_resources: None,
            cookies: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieInput {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    #[serde(rename = "sourceURL")]
    pub source_url: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Two-character language code when one is declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(rename = "publishedDate", skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(rename = "modifiedDate", skip_serializing_if = "Option::is_none")]
    pub modified_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(rename = "processingTime", skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<String>,
}

/// Format-specific payload of a scrape. Only the requested representations
/// are populated; everything else stays `None` and off the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeData {
    pub metadata: PageMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(rename = "rawHtml", skip_serializing_if = "Option::is_none")]
    pub raw_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(rename = "contentHash", skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Outcome of one scrape. Failures are structured results, never panics:
/// a navigation timeout or remote error yields `success: false` with
/// `metadata.status_code` 0 and `error` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub success: bool,
    pub data: ScrapeData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScrapeOutcome {
    pub fn failure(url: &str, status_code: u16, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: ScrapeData {
                metadata: PageMetadata {
                    source_url: url.to_string(),
                    status_code,
                    ..Default::default()
                },
                ..Default::default()
            },
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Crawl / batch / map request wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SitemapMode {
    #[default]
    Include,
    Ignore,
    Only,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    #[serde(rename = "includePaths", default)]
    pub include_paths: Option<Vec<String>>,
    #[serde(rename = "excludePaths", default)]
    pub exclude_paths: Option<Vec<String>>,
    #[serde(rename = "maxDiscoveryDepth", default = "default_max_depth")]
    pub max_discovery_depth: usize,
    #[serde(default)]
    pub sitemap: SitemapMode,
    #[serde(rename = "ignoreQueryParameters", default)]
    pub ignore_query_parameters: bool,
    /// Page cap for this crawl; clamped to the configured hard cap.
    #[serde(default = "default_crawl_limit")]
    pub limit: usize,
    #[serde(rename = "allowExternalLinks", default)]
    pub allow_external_links: bool,
    #[serde(rename = "allowSubdomains", default)]
    pub allow_subdomains: bool,
    #[serde(rename = "respectRobotsTxt", default = "default_true")]
    pub respect_robots_txt: bool,
    /// Intra-crawl pacing in milliseconds, applied after each page on top of
    /// the per-domain spacing enforced by the rate limiter.
    #[serde(default = "default_crawl_delay_ms")]
    pub delay: u64,
    #[serde(rename = "maxConcurrency", default = "default_crawl_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(rename = "scrapeOptions", default)]
    pub scrape_options: Option<ScrapeOptions>,
}

fn default_max_depth() -> usize {
    10
}

fn default_crawl_limit() -> usize {
    5000
}

fn default_crawl_delay_ms() -> u64 {
    250
}

fn default_crawl_concurrency() -> usize {
    5
}

/// Per-page scrape options carried by crawl and batch jobs. A subset of
/// `ScrapeRequest`; url and cache policy are owned by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeOptions {
    #[serde(default)]
    pub formats: Option<Vec<ScrapeFormat>>,
    #[serde(rename = "onlyMainContent", default)]
    pub only_main_content: Option<bool>,
    #[serde(rename = "includeTags", default)]
    pub include_tags: Option<Vec<String>>,
    #[serde(rename = "excludeTags", default)]
    pub exclude_tags: Option<Vec<String>>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(rename = "waitFor", default)]
    pub wait_for: Option<u64>,
    #[serde(default)]
    pub mobile: Option<bool>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl ScrapeOptions {
    /// Materialize a full per-URL request from these options.
    pub fn to_request(&self, url: &str) -> ScrapeRequest {
        ScrapeRequest {
            url: url.to_string(),
            formats: self
                .formats
                .clone()
                .unwrap_or_else(|| vec![ScrapeFormat::Markdown, ScrapeFormat::Links]),
            only_main_content: self.only_main_content.unwrap_or(true),
            include_tags: self.include_tags.clone(),
            exclude_tags: self.exclude_tags.clone(),
            headers: self.headers.clone(),
            wait_for: self.wait_for,
            mobile: self.mobile.unwrap_or(false),
            timeout: self.timeout.unwrap_or_else(default_timeout_ms),
            // Orchestrated scrapes always render fresh; the response cache
            // is a single-URL concern.
            max_age: 0,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchScrapeRequest {
    pub urls: Vec<String>,
    #[serde(rename = "ignoreInvalidURLs", default)]
    pub ignore_invalid_urls: bool,
    #[serde(rename = "maxConcurrency", default = "default_batch_concurrency")]
    pub max_concurrency: usize,
    #[serde(rename = "scrapeOptions", default)]
    pub scrape_options: Option<ScrapeOptions>,
    #[serde(default)]
    pub webhook: Option<String>,
}

fn default_batch_concurrency() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapRequest {
    pub url: String,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_crawl_limit")]
    pub limit: usize,
    #[serde(rename = "ignoreSitemap", default)]
    pub ignore_sitemap: bool,
    #[serde(rename = "sitemapOnly", default)]
    pub sitemap_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapResponse {
    pub success: bool,
    pub links: Vec<String>,
    pub metadata: MapMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapMetadata {
    pub total: usize,
    pub truncated: bool,
    #[serde(rename = "sitemapFound")]
    pub sitemap_found: bool,
}

// ---------------------------------------------------------------------------
// Durable job records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Scraping,
    Processing,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Scraping => "scraping",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJobRecord {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub seed_url: String,
    pub request: CrawlRequest,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_discovered: u64,
    pub completed: u64,
    pub failed: u64,
    pub canceled: bool,
    pub error: Option<String>,
    pub webhook_url: Option<String>,
}

impl CrawlJobRecord {
    pub fn new(request: CrawlRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: None,
            seed_url: request.url.clone(),
            webhook_url: request.webhook.clone(),
            request,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            total_discovered: 0,
            completed: 0,
            failed: 0,
            canceled: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlPageRecord {
    pub id: Uuid,
    pub crawl_job_id: Uuid,
    pub url: String,
    pub normalized_url: String,
    pub status_code: u16,
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub raw_html: Option<String>,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub metadata: PageMetadata,
    pub content_hash: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJobRecord {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub urls: Vec<String>,
    pub request: BatchScrapeRequest,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_urls: u64,
    pub completed: u64,
    pub failed: u64,
    pub error: Option<String>,
    pub webhook_url: Option<String>,
}

impl BatchJobRecord {
    pub fn new(urls: Vec<String>, request: BatchScrapeRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: None,
            total_urls: urls.len() as u64,
            webhook_url: request.webhook.clone(),
            urls,
            request,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            completed: 0,
            failed: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResultRecord {
    pub id: Uuid,
    pub batch_job_id: Uuid,
    pub url: String,
    pub success: bool,
    pub status_code: u16,
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub metadata: PageMetadata,
    pub content_hash: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fingerprint-keyed cached scrape payload. A lookup succeeds iff
/// `expires_at > now`; expired rows are treated as absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub url: String,
    pub normalized_url: String,
    pub payload: ScrapeData,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub name: String,
    pub key_hash: String,
    /// First 8 characters of the raw key, the only part ever displayed.
    pub key_prefix: String,
    pub permissions: Vec<String>,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub rate_limit_per_minute: u32,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// HTTP response envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub success: bool,
    pub data: ScrapeData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobCreatedResponse {
    pub success: bool,
    pub id: String,
    pub url: String,
    #[serde(rename = "invalidURLs", skip_serializing_if = "Option::is_none")]
    pub invalid_urls: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CrawlStatusResponse {
    pub success: bool,
    pub status: JobStatus,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub data: Vec<CrawlPageRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchStatusResponse {
    pub success: bool,
    pub status: JobStatus,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub data: Vec<BatchResultRecord>,
}
