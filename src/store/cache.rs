use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::JobStore;
use crate::core::types::{CacheEntry, ScrapeData, ScrapeRequest};
use crate::crawl::normalize;

/// Stable cache key over the normalizable parameters of a scrape request:
/// normalized URL, sorted formats, main-content flag, sorted tag filters,
/// and the mobile flag. Requests differing only in timeouts, headers, or
/// actions share a fingerprint.
pub fn fingerprint(request: &ScrapeRequest) -> String {
    let normalized_url = normalize::normalize(&request.url, false);

    let mut formats: Vec<&str> = request.formats.iter().map(|f| f.as_str()).collect();
    formats.sort_unstable();
    formats.dedup();

    let sorted = |tags: &Option<Vec<String>>| -> Vec<String> {
        let mut tags = tags.clone().unwrap_or_default();
        tags.sort_unstable();
        tags
    };

    let key = serde_json::json!({
        "url": normalized_url,
        "formats": formats,
        "onlyMainContent": request.only_main_content,
        "includeTags": sorted(&request.include_tags),
        "excludeTags": sorted(&request.exclude_tags),
        "mobile": request.mobile,
    });

    let mut hasher = Sha256::new();
    hasher.update(key.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint-keyed scrape results served before re-execution.
///
/// Read path: a non-expired entry short-circuits the scrape and the caller
/// annotates the response with a served-from-cache warning. Write path: a
/// successful scrape is stored with `expires_at = now + maxAge`. A maxAge
/// of 0 disables both directions.
pub struct ResponseCache {
    store: Arc<dyn JobStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn lookup(&self, request: &ScrapeRequest) -> Result<Option<ScrapeData>> {
        if request.max_age == 0 {
            return Ok(None);
        }
        let fp = fingerprint(request);
        match self.store.get_cache_entry(&fp).await? {
            Some(entry) => {
                debug!("cache hit for {} ({fp})", request.url);
                Ok(Some(entry.payload))
            }
            None => Ok(None),
        }
    }

    pub async fn record(&self, request: &ScrapeRequest, data: &ScrapeData) -> Result<()> {
        if request.max_age == 0 {
            return Ok(());
        }
        let fp = fingerprint(request);
        let entry = CacheEntry {
            fingerprint: fp,
            url: request.url.clone(),
            normalized_url: normalize::normalize(&request.url, false),
            payload: data.clone(),
            content_hash: data.content_hash.clone(),
            created_at: Utc::now(),
            expires_at: Utc::now() + ChronoDuration::milliseconds(request.max_age as i64),
        };
        self.store.put_cache_entry(entry).await
    }
}
