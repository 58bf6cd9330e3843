use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::renderer::{PageRenderer, RenderError, RenderRequest};
use crate::core::types::{
    Action, PageMetadata, ScrapeData, ScrapeFormat, ScrapeOutcome, ScrapeRequest,
};
use crate::crawl::normalize;
use crate::extract;
use crate::limits::{DomainRateLimiter, GlobalRateLimiter, RateLimitError, DEFAULT_ACQUIRE_TIMEOUT};

/// Single-URL render-and-extract pipeline: rate-limit token, render,
/// backoff bookkeeping, format shaping. Failures come back as structured
/// outcomes; the orchestrators decide what a failure means for their job.
pub struct ScrapeExecutor {
    renderer: Arc<dyn PageRenderer>,
    limiter: Arc<DomainRateLimiter>,
    global_limiter: Arc<GlobalRateLimiter>,
    max_actions: usize,
}

impl ScrapeExecutor {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        limiter: Arc<DomainRateLimiter>,
        global_limiter: Arc<GlobalRateLimiter>,
        max_actions: usize,
    ) -> Self {
        Self {
            renderer,
            limiter,
            global_limiter,
            max_actions,
        }
    }

    pub async fn scrape(&self, request: &ScrapeRequest) -> ScrapeOutcome {
        if !normalize::is_valid(&request.url) {
            return ScrapeOutcome::failure(&request.url, 0, "invalid URL");
        }

        let token = match self
            .limiter
            .acquire(&request.url, None, None, DEFAULT_ACQUIRE_TIMEOUT)
            .await
        {
            Ok(token) => token,
            Err(RateLimitError::Timeout { domain }) => {
                return ScrapeOutcome::failure(
                    &request.url,
                    0,
                    format!("rate limit acquire timed out for {domain}"),
                );
            }
            Err(RateLimitError::Store(e)) => {
                return ScrapeOutcome::failure(
                    &request.url,
                    0,
                    format!("coordination store unavailable: {e}"),
                );
            }
        };

        let outcome = self.scrape_with_token(request).await;
        // The token is released on every exit path.
        token.release().await;
        outcome
    }

    async fn scrape_with_token(&self, request: &ScrapeRequest) -> ScrapeOutcome {
        let started = tokio::time::Instant::now();

        // Global ceiling: bounded retry, then a retryable failure.
        let mut global_attempts = 0u32;
        loop {
            match self.global_limiter.check_and_increment().await {
                Ok(true) => break,
                Ok(false) if global_attempts < 20 => {
                    global_attempts += 1;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Ok(false) => {
                    return ScrapeOutcome::failure(&request.url, 0, "global rate limit exceeded");
                }
                Err(e) => {
                    return ScrapeOutcome::failure(
                        &request.url,
                        0,
                        format!("coordination store unavailable: {e}"),
                    );
                }
            }
        }

        let render_request = self.to_render_request(request);
        let rendered = match self.renderer.render(&render_request).await {
            Ok(page) => page,
            Err(RenderError::Timeout(ms)) => {
                info!("navigation timeout for {} after {ms}ms", request.url);
                return ScrapeOutcome::failure(&request.url, 0, "timeout");
            }
            Err(RenderError::Other(e)) => {
                warn!("render failed for {}: {e}", request.url);
                return ScrapeOutcome::failure(&request.url, 0, e.to_string());
            }
        };

        // Upstream throttling and availability signals: record them and
        // report the failure; retry policy belongs to the caller. Throttles
        // surface their status code, gateway failures surface as a remote
        // error with status 0.
        if matches!(rendered.status_code, 429 | 502 | 503 | 504) {
            if let Err(e) = self
                .limiter
                .handle_error(&request.url, rendered.status_code, rendered.retry_after_secs)
                .await
            {
                warn!("backoff bookkeeping failed for {}: {e}", request.url);
            }
            let reported_status = match rendered.status_code {
                429 | 503 => rendered.status_code,
                _ => 0,
            };
            return ScrapeOutcome::failure(
                &request.url,
                reported_status,
                format!("upstream returned {}", rendered.status_code),
            );
        }

        if let Err(e) = self.limiter.reset_backoff(&request.url).await {
            warn!("backoff reset failed for {}: {e}", request.url);
        }

        let mut data = build_scrape_data(request, &rendered.html, rendered.status_code);
        data.screenshot = rendered.screenshot_path;
        data.metadata.processing_time = Some(format!(
            "{:.2}s",
            started.elapsed().as_secs_f64()
        ));

        ScrapeOutcome {
            success: true,
            data,
            error: None,
        }
    }

    fn to_render_request(&self, request: &ScrapeRequest) -> RenderRequest {
        let actions: Vec<Action> = request
            .actions
            .clone()
            .unwrap_or_default()
            .into_iter()
            .take(self.max_actions)
            .collect();
        RenderRequest {
            url: request.url.clone(),
            headers: request.headers.clone().unwrap_or_default(),
            cookies: request.cookies.clone().unwrap_or_default(),
            wait_for_ms: request.wait_for,
            mobile: request.mobile,
            timeout_ms: request.timeout,
            actions,
            block_resources: request.block_resources.clone().unwrap_or_default(),
            screenshot: request.formats.contains(&ScrapeFormat::Screenshot),
        }
    }
}

/// Shape rendered HTML into the requested representations. Extraction
/// problems degrade to best-effort partial results; the scrape itself still
/// counts as successful.
pub fn build_scrape_data(request: &ScrapeRequest, raw_html: &str, status_code: u16) -> ScrapeData {
    let url = &request.url;

    let mut metadata: PageMetadata = extract::extract_metadata(raw_html, url);
    metadata.source_url = url.to_string();
    metadata.status_code = status_code;

    // filterByTags first, then main-content selection.
    let filtered = if request.include_tags.is_some() || request.exclude_tags.is_some() {
        extract::filter_by_tags(
            raw_html,
            request.include_tags.as_deref(),
            request.exclude_tags.as_deref(),
        )
    } else {
        raw_html.to_string()
    };
    let processed_html = if request.only_main_content {
        extract::extract_main_content(&filtered, url)
    } else {
        filtered
    };

    let mut data = ScrapeData {
        metadata,
        ..Default::default()
    };

    for format in &request.formats {
        match format {
            ScrapeFormat::RawHtml => data.raw_html = Some(raw_html.to_string()),
            ScrapeFormat::Html => data.html = Some(processed_html.clone()),
            ScrapeFormat::Markdown => {
                let markdown = extract::html_to_markdown(&processed_html, url);
                data.content_hash = Some(extract::content_hash(&markdown));
                data.markdown = Some(markdown);
            }
            ScrapeFormat::Links => data.links = Some(extract::extract_links(raw_html, url)),
            ScrapeFormat::Images => data.images = Some(extract::extract_images(raw_html, url)),
            ScrapeFormat::Screenshot => {}
        }
    }

    data
}
