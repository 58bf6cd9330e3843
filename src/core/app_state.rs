use std::sync::Arc;

use anyhow::Result;

use crate::api::metrics::Metrics;
use crate::core::config::HarvestConfig;
use crate::jobs::JobService;
use crate::limits::{
    CoordinationStore, DomainRateLimiter, GlobalRateLimiter, MemoryCoordinationStore,
};
use crate::scraping::{BrowserPool, HttpRenderer, PageRenderer, ScrapeExecutor};
use crate::store::{JobStore, MemoryJobStore};
use crate::sync::OpenWebUiConnector;

/// Every collaborator the service needs, constructed once at startup and
/// threaded through handlers explicitly. Test builds swap the renderer and
/// stores without touching any global.
pub struct AppState {
    pub config: HarvestConfig,
    pub http_client: reqwest::Client,
    pub store: Arc<dyn JobStore>,
    pub coordination: Arc<dyn CoordinationStore>,
    pub limiter: Arc<DomainRateLimiter>,
    pub global_limiter: Arc<GlobalRateLimiter>,
    pub executor: Arc<ScrapeExecutor>,
    pub jobs: Arc<JobService>,
    pub browser_pool: Option<Arc<BrowserPool>>,
    pub sync: Option<Arc<OpenWebUiConnector>>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Production build: launch the browser pool when a binary is
    /// available, otherwise degrade to the static HTTP renderer.
    pub async fn build(config: HarvestConfig) -> Result<Arc<Self>> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        let browser_pool = BrowserPool::launch(&config).await;
        let renderer: Arc<dyn PageRenderer> = match &browser_pool {
            Some(pool) => Arc::clone(pool) as Arc<dyn PageRenderer>,
            None => Arc::new(HttpRenderer::new(http_client.clone())),
        };

        Self::assemble(
            config,
            http_client,
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryCoordinationStore::new()),
            renderer,
            browser_pool,
        )
    }

    /// Assembly with injected stores and renderer; the test suites build
    /// states through this with canned renderers and fast limits.
    pub fn assemble(
        config: HarvestConfig,
        http_client: reqwest::Client,
        store: Arc<dyn JobStore>,
        coordination: Arc<dyn CoordinationStore>,
        renderer: Arc<dyn PageRenderer>,
        browser_pool: Option<Arc<BrowserPool>>,
    ) -> Result<Arc<Self>> {
        let metrics = Arc::new(Metrics::new()?);
        let limiter = Arc::new(DomainRateLimiter::new(Arc::clone(&coordination), &config));
        let global_limiter = Arc::new(GlobalRateLimiter::new(
            Arc::clone(&coordination),
            config.max_global_rps,
        ));
        let executor = Arc::new(ScrapeExecutor::new(
            renderer,
            Arc::clone(&limiter),
            Arc::clone(&global_limiter),
            config.max_actions_per_request,
        ));
        let jobs = Arc::new(JobService::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            http_client.clone(),
            config.clone(),
            metrics.active_crawls.clone(),
        ));
        let sync = OpenWebUiConnector::from_config(http_client.clone(), &config).map(Arc::new);

        Ok(Arc::new(Self {
            config,
            http_client,
            store,
            coordination,
            limiter,
            global_limiter,
            executor,
            jobs,
            browser_pool,
            sync,
            metrics,
        }))
    }
}
