//! Native browser pool built on `chromiumoxide`.
//!
//! Owns a fixed set of headless engines, finds a usable executable across
//! Brave/Chrome/Chromium installs, and executes the per-render sequence:
//! fresh page, identity overrides, resource interception, navigation,
//! actions, capture, teardown.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, FailRequestParams, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, CookieParam, ErrorReason, EventResponseReceived, Headers, ResourceType,
    SetCookiesParams, SetExtraHttpHeadersParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::renderer::{
    default_headers, random_user_agent, PageRenderer, RenderError, RenderRequest, RenderedPage,
};
use crate::core::config::{self, BrowserKind, HarvestConfig};
use crate::core::types::Action;

const PER_ACTION_TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE_POLL: Duration = Duration::from_millis(250);

/// Find a usable Chromium-family executable.
///
/// Resolution order: `CHROME_EXECUTABLE` override, PATH scan, well-known
/// install locations. The firefox/webkit settings only reorder the scan;
/// rendering always speaks CDP.
pub fn find_browser_executable(kind: BrowserKind) -> Option<String> {
    if let Some(exe) = config::chrome_executable_override() {
        return Some(exe);
    }

    let mut candidates = vec![
        "chromium",
        "chromium-browser",
        "google-chrome",
        "chrome",
        "brave-browser",
        "brave",
    ];
    if kind != BrowserKind::Chromium {
        // Non-chromium requests fall back to whatever CDP-capable binary
        // exists; prefer generic chromium last so overrides stay easy.
        candidates.rotate_left(1);
    }

    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            for exe in &candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    let well_known = [
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/usr/bin/google-chrome",
        "/usr/bin/brave-browser",
        "/usr/local/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
    ];
    well_known
        .iter()
        .find(|p| Path::new(p).exists())
        .map(|p| p.to_string())
}

/// Sandbox-friendly headless launch configuration.
fn build_engine_config(exe: &str, headless: bool, proxy: Option<&str>) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: 1920,
            height: 1080,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(1920, 1080)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-accelerated-2d-canvas")
        .arg("--no-first-run")
        .arg("--no-zygote")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--ignore-certificate-errors")
        .arg("--mute-audio");

    if !headless {
        builder = builder.with_head();
    }
    if let Some(proxy) = proxy {
        builder = builder.arg(format!("--proxy-server={proxy}"));
    }

    builder
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {e}"))
}

struct Engine {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
}

/// Fixed-size pool of rendering engines. Acquisition blocks on an
/// availability queue; every render gets a fresh page with its own
/// identity overrides, and the engine returns to the queue on completion.
pub struct BrowserPool {
    engines: Vec<Arc<Engine>>,
    slots: Mutex<mpsc::UnboundedReceiver<usize>>,
    slot_tx: mpsc::UnboundedSender<usize>,
    closed: AtomicBool,
    screenshot_dir: String,
    max_actions: usize,
    max_action_time_ms: u64,
}

impl BrowserPool {
    /// Launch `config.browser_pool_size` engines. Returns `None` when no
    /// usable browser binary exists; callers degrade to the HTTP renderer.
    pub async fn launch(config: &HarvestConfig) -> Option<Arc<Self>> {
        let exe = match find_browser_executable(config.browser_kind) {
            Some(exe) => exe,
            None => {
                warn!(
                    "no browser executable found; set {} to enable rendering",
                    config::ENV_CHROME_EXECUTABLE
                );
                return None;
            }
        };

        let mut engines: Vec<Arc<Engine>> = Vec::new();
        let (slot_tx, slot_rx) = mpsc::unbounded_channel();
        for index in 0..config.browser_pool_size.max(1) {
            let engine_config = match build_engine_config(&exe, config.headless, None) {
                Ok(c) => c,
                Err(e) => {
                    error!("browser config error: {e}");
                    return None;
                }
            };
            let (browser, mut handler) = match Browser::launch(engine_config).await {
                Ok(pair) => pair,
                Err(e) => {
                    error!("failed to launch browser ({exe}): {e}");
                    // Tear down what already started.
                    for engine in &engines {
                        let mut b = engine.browser.lock().await;
                        let _ = b.close().await;
                        engine.handler_task.abort();
                    }
                    return None;
                }
            };
            let handler_task = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        debug!("CDP handler event error: {e}");
                    }
                }
            });
            engines.push(Arc::new(Engine {
                browser: Mutex::new(browser),
                handler_task,
            }));
            let _ = slot_tx.send(index);
        }

        info!(
            "browser pool started: {} engines ({})",
            engines.len(),
            exe
        );
        Some(Arc::new(Self {
            engines,
            slots: Mutex::new(slot_rx),
            slot_tx,
            closed: AtomicBool::new(false),
            screenshot_dir: config.screenshot_dir.clone(),
            max_actions: config.max_actions_per_request,
            max_action_time_ms: config.max_action_time_ms,
        }))
    }

    /// Idempotent teardown: close every engine and drain the queue.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut slots = self.slots.lock().await;
            while slots.try_recv().is_ok() {}
        }
        for engine in &self.engines {
            let mut browser = engine.browser.lock().await;
            if let Err(e) = browser.close().await {
                debug!("browser close error: {e}");
            }
            engine.handler_task.abort();
        }
        info!("browser pool stopped");
    }

    async fn acquire_slot(&self) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("browser pool is shut down"));
        }
        let mut slots = self.slots.lock().await;
        slots
            .recv()
            .await
            .ok_or_else(|| anyhow!("browser pool is shut down"))
    }

    fn release_slot(&self, index: usize) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.slot_tx.send(index);
        }
    }

    async fn render_on_engine(
        &self,
        engine: &Engine,
        request: &RenderRequest,
    ) -> Result<RenderedPage, RenderError> {
        let page = {
            let browser = engine.browser.lock().await;
            browser
                .new_page("about:blank")
                .await
                .context("failed to open page")?
        };

        let result = self.drive_page(&page, request).await;

        if let Err(e) = page.close().await {
            debug!("page close error: {e}");
        }
        result
    }

    async fn drive_page(
        &self,
        page: &Page,
        request: &RenderRequest,
    ) -> Result<RenderedPage, RenderError> {
        // Fresh identity per render: random UA, viewport override, merged
        // headers, optional cookies.
        page.set_user_agent(random_user_agent())
            .await
            .context("set user agent")?;

        let metrics = if request.mobile {
            SetDeviceMetricsOverrideParams::new(375, 667, 2.0, true)
        } else {
            SetDeviceMetricsOverrideParams::new(1920, 1080, 1.0, false)
        };
        page.execute(metrics).await.context("viewport override")?;

        page.execute(network::EnableParams::default())
            .await
            .context("enable network domain")?;

        let mut header_map: HashMap<String, serde_json::Value> = default_headers()
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        for (name, value) in &request.headers {
            header_map.insert(name.clone(), serde_json::Value::String(value.clone()));
        }
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(
            serde_json::json!(header_map),
        )))
        .await
        .context("set extra headers")?;

        if !request.cookies.is_empty() {
            let mut params = Vec::new();
            for cookie in &request.cookies {
                let mut builder = CookieParam::builder()
                    .name(cookie.name.clone())
                    .value(cookie.value.clone());
                if let Some(domain) = &cookie.domain {
                    builder = builder.domain(domain.clone());
                } else {
                    builder = builder.url(request.url.clone());
                }
                if let Some(path) = &cookie.path {
                    builder = builder.path(path.clone());
                }
                match builder.build() {
                    Ok(param) => params.push(param),
                    Err(e) => debug!("skipping malformed cookie: {e}"),
                }
            }
            if !params.is_empty() {
                page.execute(SetCookiesParams::new(params))
                    .await
                    .context("set cookies")?;
            }
        }

        if !request.block_resources.is_empty() {
            self.intercept_resources(page, &request.block_resources)
                .await?;
        }

        // Watch for the document response to recover status + Retry-After.
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("response listener")?;
        let nav_url = request.url.clone();
        let doc_response: Arc<std::sync::Mutex<Option<(u16, Option<u64>)>>> =
            Arc::new(std::sync::Mutex::new(None));
        let doc_response_writer = Arc::clone(&doc_response);
        let response_task = tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let is_document = event.r#type == ResourceType::Document;
                if !is_document {
                    continue;
                }
                let status = event.response.status as u16;
                let retry_after = retry_after_from_headers(&event.response.headers);
                let mut slot = doc_response_writer.lock().unwrap_or_else(|p| p.into_inner());
                if slot.is_none() || event.response.url == nav_url {
                    *slot = Some((status, retry_after));
                }
                if event.response.url == nav_url {
                    break;
                }
            }
        });

        let navigation = tokio::time::timeout(
            Duration::from_millis(request.timeout_ms),
            page.goto(request.url.clone()),
        )
        .await;
        match navigation {
            Err(_) => {
                response_task.abort();
                return Err(RenderError::Timeout(request.timeout_ms));
            }
            Ok(Err(e)) => {
                response_task.abort();
                return Err(RenderError::Other(anyhow!("navigation failed: {e}")));
            }
            Ok(Ok(_)) => {}
        }

        // Without actions, give the network a chance to go quiet; with
        // actions, DOM-content readiness is enough and the actions drive
        // the rest.
        if request.actions.is_empty() {
            self.wait_until_stable(page, request.timeout_ms.min(8_000))
                .await;
        }

        if let Some(wait_ms) = request.wait_for_ms {
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }

        let mut screenshot_path = None;
        if !request.actions.is_empty() {
            screenshot_path = self.execute_actions(page, &request.actions).await;
        }

        let html = page.content().await.context("capture page content")?;

        if request.screenshot && screenshot_path.is_none() {
            screenshot_path = self.capture_screenshot(page, true).await;
        }

        response_task.abort();
        let (status_code, retry_after_secs) = doc_response
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .unwrap_or((200, None));

        Ok(RenderedPage {
            status_code,
            html,
            screenshot_path,
            retry_after_secs,
        })
    }

    /// Abort requests whose resource type is in the block list before they
    /// hit the network.
    async fn intercept_resources(&self, page: &Page, blocked: &[String]) -> Result<()> {
        let blocked: Vec<String> = blocked.iter().map(|b| b.to_ascii_lowercase()).collect();
        let mut all_requests = RequestPattern::default();
        all_requests.url_pattern = Some("*".to_string());
        let mut enable = fetch::EnableParams::default();
        enable.patterns = Some(vec![all_requests]);
        page.execute(enable)
            .await
            .context("enable fetch interception")?;

        let mut paused = page
            .event_listener::<fetch::EventRequestPaused>()
            .await
            .context("request-paused listener")?;
        let page_handle = page.clone();
        tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let resource = format!("{:?}", event.resource_type).to_ascii_lowercase();
                let should_block = blocked.iter().any(|b| *b == resource);
                let outcome = if should_block {
                    page_handle
                        .execute(FailRequestParams::new(
                            event.request_id.clone(),
                            ErrorReason::BlockedByClient,
                        ))
                        .await
                        .map(|_| ())
                } else {
                    page_handle
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = outcome {
                    debug!("interception response failed: {e}");
                    break;
                }
            }
        });
        Ok(())
    }

    /// Poll the DOM until its size stops changing (network-quiet proxy) or
    /// the budget runs out.
    async fn wait_until_stable(&self, page: &Page, max_ms: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(max_ms);
        let mut last_len: Option<usize> = None;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(SETTLE_POLL).await;
            let len = match page
                .evaluate("document.documentElement.outerHTML.length")
                .await
            {
                Ok(result) => result.into_value::<usize>().unwrap_or(0),
                Err(_) => break,
            };
            if last_len == Some(len) {
                break;
            }
            last_len = Some(len);
        }
    }

    /// Run the action list: bounded count, per-action soft timeout,
    /// aggregate wall-clock budget, errors logged and skipped. Returns the
    /// path of the last action-driven screenshot, if any.
    async fn execute_actions(&self, page: &Page, actions: &[Action]) -> Option<String> {
        let started = tokio::time::Instant::now();
        let mut screenshot_path = None;

        for action in actions.iter().take(self.max_actions) {
            if started.elapsed() > Duration::from_millis(self.max_action_time_ms) {
                warn!("action budget exhausted, skipping remaining actions");
                break;
            }
            let outcome =
                tokio::time::timeout(PER_ACTION_TIMEOUT, self.execute_action(page, action)).await;
            match outcome {
                Ok(Ok(path)) => {
                    if path.is_some() {
                        screenshot_path = path;
                    }
                }
                Ok(Err(e)) => warn!("action failed ({action:?}): {e}"),
                Err(_) => warn!("action timed out ({action:?})"),
            }
        }
        screenshot_path
    }

    async fn execute_action(&self, page: &Page, action: &Action) -> Result<Option<String>> {
        match action {
            Action::Wait { milliseconds } => {
                tokio::time::sleep(Duration::from_millis(*milliseconds)).await;
            }
            Action::Click { selector } => {
                page.find_element(selector.clone()).await?.click().await?;
            }
            Action::TypeText { selector, text } => {
                let element = page.find_element(selector.clone()).await?;
                element.click().await?;
                element.type_str(text.clone()).await?;
            }
            Action::Scroll { y } => {
                page.evaluate(format!("window.scrollTo(0, {y})")).await?;
            }
            Action::Press { key } => {
                page.find_element("body").await?.press_key(key.clone()).await?;
            }
            Action::Screenshot { full_page } => {
                return Ok(self.capture_screenshot(page, *full_page).await);
            }
        }
        Ok(None)
    }

    async fn capture_screenshot(&self, page: &Page, full_page: bool) -> Option<String> {
        if let Err(e) = tokio::fs::create_dir_all(&self.screenshot_dir).await {
            warn!("cannot create screenshot dir {}: {e}", self.screenshot_dir);
            return None;
        }
        let path = format!(
            "{}/{}.png",
            self.screenshot_dir,
            Utc::now().timestamp_millis()
        );
        let params = ScreenshotParams::builder().full_page(full_page).build();
        match page.save_screenshot(params, &path).await {
            Ok(_) => {
                info!("screenshot saved: {path}");
                Some(path)
            }
            Err(e) => {
                warn!("screenshot failed: {e}");
                None
            }
        }
    }
}

fn retry_after_from_headers(headers: &Headers) -> Option<u64> {
    let value = serde_json::to_value(headers).ok()?;
    let map = value.as_object()?;
    for (name, value) in map {
        if name.eq_ignore_ascii_case("retry-after") {
            return value.as_str().and_then(|v| v.trim().parse().ok());
        }
    }
    None
}

#[async_trait]
impl PageRenderer for BrowserPool {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError> {
        let slot = self.acquire_slot().await?;
        let engine = Arc::clone(&self.engines[slot]);
        let result = self.render_on_engine(&engine, request).await;
        self.release_slot(slot);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_parsing_is_case_insensitive() {
        let headers = Headers::new(serde_json::json!({"Retry-After": "3"}));
        assert_eq!(retry_after_from_headers(&headers), Some(3));
        let headers = Headers::new(serde_json::json!({"retry-after": "10"}));
        assert_eq!(retry_after_from_headers(&headers), Some(10));
        let headers = Headers::new(serde_json::json!({"content-type": "text/html"}));
        assert_eq!(retry_after_from_headers(&headers), None);
    }
}
