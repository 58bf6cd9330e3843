use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use tracing::debug;

use crate::core::types::{Action, CookieInput};

/// Realistic desktop user agents, one chosen at random per render.
pub const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Default headers merged under any caller-supplied ones.
pub fn default_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Accept-Language", "en-US,en;q=0.9"),
        ("Accept-Encoding", "gzip, deflate, br"),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    ]
}

/// Everything a renderer needs to produce a page snapshot.
#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub cookies: Vec<CookieInput>,
    pub wait_for_ms: Option<u64>,
    pub mobile: bool,
    pub timeout_ms: u64,
    pub actions: Vec<Action>,
    pub block_resources: Vec<String>,
    /// Capture a full-page screenshot after the actions run.
    pub screenshot: bool,
}

/// Snapshot of a rendered page.
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    pub status_code: u16,
    pub html: String,
    pub screenshot_path: Option<String>,
    /// `Retry-After` seconds when the navigation response carried one.
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("navigation timed out after {0}ms")]
    Timeout(u64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Rendering engines vary by vendor but expose the same operations: render
/// a page, capture its HTML, run actions, take screenshots. Everything
/// downstream programs against this interface; the browser pool is the
/// production implementation and `HttpRenderer` the static fallback.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError>;
}

/// Plain HTTP fetch, no JavaScript execution. Used when no browser binary
/// is available and by the test suites; actions and screenshots are
/// silently skipped.
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError> {
        let mut builder = self
            .client
            .get(&request.url)
            .timeout(std::time::Duration::from_millis(request.timeout_ms))
            .header("User-Agent", random_user_agent());

        for (name, value) in default_headers() {
            if !request.headers.keys().any(|k| k.eq_ignore_ascii_case(name)) {
                builder = builder.header(name, value);
            }
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RenderError::Timeout(request.timeout_ms)
            } else {
                RenderError::Other(anyhow!("fetch failed: {e}"))
            }
        })?;

        let status_code = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let html = response
            .text()
            .await
            .map_err(|e| RenderError::Other(anyhow!("body read failed: {e}")))?;

        if !request.actions.is_empty() {
            debug!("static renderer skipping {} actions", request.actions.len());
        }
        if let Some(wait) = request.wait_for_ms {
            tokio::time::sleep(std::time::Duration::from_millis(wait.min(5_000))).await;
        }

        Ok(RenderedPage {
            status_code,
            html,
            screenshot_path: None,
            retry_after_secs,
        })
    }
}
