//! Per-domain rate limiting and backoff, plus the global request-rate
//! ceiling. State lives behind the `CoordinationStore` seam so workers on
//! one node share the in-process store and a Redis-backed implementation
//! can substitute without touching the limiter logic.

mod store;

pub use store::{CoordinationStore, MemoryCoordinationStore};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use url::Url;

use crate::core::config::HarvestConfig;

/// Backoff is capped at five minutes.
pub const MAX_BACKOFF_MS: u64 = 300_000;

/// Poll interval while waiting for a concurrency slot.
const ACQUIRE_POLL: Duration = Duration::from_millis(100);

/// Default wait budget for a token before giving up.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

const CURRENT_TTL: Duration = Duration::from_secs(60);
const LAST_REQUEST_TTL: Duration = Duration::from_secs(60);
const BACKOFF_TTL: Duration = Duration::from_secs(3600);
const GATEWAY_BACKOFF_TTL: Duration = Duration::from_secs(300);
const GATEWAY_BACKOFF_MS: u64 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("timed out waiting for rate limit token for {domain}")]
    Timeout { domain: String },
    #[error("coordination store unavailable: {0}")]
    Store(#[from] anyhow::Error),
}

fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_else(|| url.to_ascii_lowercase())
}

fn key_current(domain: &str) -> String {
    format!("rate_limit:{domain}:current")
}

fn key_last_request(domain: &str) -> String {
    format!("rate_limit:{domain}:last_request")
}

fn key_backoff(domain: &str) -> String {
    format!("rate_limit:{domain}:backoff")
}

/// One-shot permission to make a single request against a domain. Release
/// decrements the per-domain concurrent counter exactly once; dropping an
/// unreleased token performs the decrement on a background task so abnormal
/// exits cannot leak a slot.
pub struct RateLimitToken {
    store: Arc<dyn CoordinationStore>,
    domain: String,
    released: bool,
}

impl RateLimitToken {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.store.decr_min_zero(&key_current(&self.domain)).await {
            warn!("failed to release rate limit token for {}: {e}", self.domain);
        }
    }
}

impl Drop for RateLimitToken {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = Arc::clone(&self.store);
        let key = key_current(&self.domain);
        // Tokens dropped during runtime teardown have nothing to decrement
        // against; the counter key's TTL reclaims the slot.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = store.decr_min_zero(&key).await;
            });
        }
    }
}

/// Snapshot of one domain's limiter state.
#[derive(Debug, Clone)]
pub struct DomainLimitStats {
    pub domain: String,
    pub current_requests: i64,
    pub backoff_ms: i64,
    pub last_request_ms: Option<i64>,
}

/// Per-domain concurrency gate + request spacing + exponential backoff.
pub struct DomainRateLimiter {
    store: Arc<dyn CoordinationStore>,
    default_max_concurrent: usize,
    default_delay_ms: u64,
    max_backoff_ms: u64,
}

impl DomainRateLimiter {
    pub fn new(store: Arc<dyn CoordinationStore>, config: &HarvestConfig) -> Self {
        Self {
            store,
            default_max_concurrent: config.rate_limit_per_domain,
            default_delay_ms: config.default_delay_ms,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }

    /// Acquire a token for `url`, waiting for a concurrency slot and then
    /// honoring the required request spacing (`delay + backoff`).
    pub async fn acquire(
        &self,
        url: &str,
        max_concurrent: Option<usize>,
        delay_ms: Option<u64>,
        timeout: Duration,
    ) -> Result<RateLimitToken, RateLimitError> {
        let domain = domain_of(url);
        let max_concurrent = max_concurrent.unwrap_or(self.default_max_concurrent) as i64;
        let delay_ms = delay_ms.unwrap_or(self.default_delay_ms);

        let current_key = key_current(&domain);
        let last_key = key_last_request(&domain);
        let backoff_key = key_backoff(&domain);

        let started = tokio::time::Instant::now();
        loop {
            if started.elapsed() > timeout {
                return Err(RateLimitError::Timeout { domain });
            }

            let current = self.store.get_i64(&current_key).await?.unwrap_or(0);
            if current >= max_concurrent {
                tokio::time::sleep(ACQUIRE_POLL).await;
                continue;
            }

            // Enforce spacing since the domain's previous request.
            if let Some(last_ms) = self.store.get_i64(&last_key).await? {
                let backoff = self.store.get_i64(&backoff_key).await?.unwrap_or(0).max(0) as u64;
                let required = delay_ms + backoff;
                let elapsed = (Utc::now().timestamp_millis() - last_ms).max(0) as u64;
                if elapsed < required {
                    tokio::time::sleep(Duration::from_millis(required - elapsed)).await;
                }
            }

            // Atomically take the slot and stamp the request time.
            self.store
                .incr_and_stamp(
                    &current_key,
                    CURRENT_TTL,
                    &last_key,
                    Utc::now().timestamp_millis(),
                    LAST_REQUEST_TTL,
                )
                .await?;

            debug!("acquired rate limit token for {domain}");
            return Ok(RateLimitToken {
                store: Arc::clone(&self.store),
                domain,
                released: false,
            });
        }
    }

    /// React to an upstream throttling or availability signal.
    ///
    /// 429/503 set (or double) the backoff, honoring `Retry-After` when the
    /// server provided one; 502/504 apply a fixed moderate backoff; other
    /// statuses change nothing.
    pub async fn handle_error(
        &self,
        url: &str,
        status_code: u16,
        retry_after_secs: Option<u64>,
    ) -> Result<(), RateLimitError> {
        let domain = domain_of(url);
        let backoff_key = key_backoff(&domain);

        match status_code {
            429 | 503 => {
                let backoff_ms = match retry_after_secs {
                    Some(secs) => (secs * 1000).min(self.max_backoff_ms),
                    None => {
                        let current =
                            self.store.get_i64(&backoff_key).await?.unwrap_or(0).max(0) as u64;
                        current.saturating_add(1000).saturating_mul(2).min(self.max_backoff_ms)
                    }
                };
                warn!("rate limited on {domain} ({status_code}), backoff {backoff_ms}ms");
                self.store
                    .set_i64(&backoff_key, backoff_ms as i64, BACKOFF_TTL)
                    .await?;
            }
            502 | 504 => {
                warn!("gateway error on {domain} ({status_code}), applying 5s backoff");
                self.store
                    .set_i64(&backoff_key, GATEWAY_BACKOFF_MS as i64, GATEWAY_BACKOFF_TTL)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Clear a domain's backoff after a successful response.
    pub async fn reset_backoff(&self, url: &str) -> Result<(), RateLimitError> {
        let domain = domain_of(url);
        self.store.delete(&key_backoff(&domain)).await?;
        Ok(())
    }

    pub async fn stats(&self, url: &str) -> Result<DomainLimitStats, RateLimitError> {
        let domain = domain_of(url);
        Ok(DomainLimitStats {
            current_requests: self
                .store
                .get_i64(&key_current(&domain))
                .await?
                .unwrap_or(0),
            backoff_ms: self.store.get_i64(&key_backoff(&domain)).await?.unwrap_or(0),
            last_request_ms: self.store.get_i64(&key_last_request(&domain)).await?,
            domain,
        })
    }
}

/// Sliding one-second window over all outbound requests.
pub struct GlobalRateLimiter {
    store: Arc<dyn CoordinationStore>,
    max_rps: u64,
}

const GLOBAL_WINDOW_KEY: &str = "global_rate_limit:requests";

impl GlobalRateLimiter {
    pub fn new(store: Arc<dyn CoordinationStore>, max_rps: u64) -> Self {
        Self { store, max_rps }
    }

    /// Insert this request into the window and report whether it fits under
    /// the ceiling. Callers reject or retry when it does not.
    pub async fn check_and_increment(&self) -> Result<bool, RateLimitError> {
        let now = Utc::now().timestamp_millis();
        let count = self
            .store
            .window_add_and_count(GLOBAL_WINDOW_KEY, now, 1000)
            .await?;
        if count as u64 > self.max_rps {
            warn!("global rate limit exceeded: {count}/{} rps", self.max_rps);
            return Ok(false);
        }
        Ok(true)
    }
}
