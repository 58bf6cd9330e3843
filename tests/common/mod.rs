use std::sync::Arc;

use axum::Router;
use chrono::Utc;
use uuid::Uuid;

use webharvest::api::auth;
use webharvest::core::config::HarvestConfig;
use webharvest::core::types::ApiKeyRecord;
use webharvest::limits::{CoordinationStore, MemoryCoordinationStore};
use webharvest::scraping::HttpRenderer;
use webharvest::store::{JobStore, MemoryJobStore};
use webharvest::AppState;

pub const TEST_SALT: &str = "test-salt";

/// App state wired for tests: in-memory stores, the static HTTP renderer,
/// no inter-request delay, and a high global ceiling.
pub async fn test_state() -> Arc<AppState> {
    test_state_with(|_| {}).await
}

pub async fn test_state_with(tweak: impl FnOnce(&mut HarvestConfig)) -> Arc<AppState> {
    let mut config = HarvestConfig {
        default_delay_ms: 0,
        max_global_rps: 100_000,
        api_key_salt: TEST_SALT.to_string(),
        ..Default::default()
    };
    tweak(&mut config);

    let client = reqwest::Client::new();
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let coordination: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
    AppState::assemble(
        config,
        client.clone(),
        store,
        coordination,
        Arc::new(HttpRenderer::new(client)),
        None,
    )
    .expect("state assembly")
}

/// Insert an API key with a known raw value and return it.
pub async fn seed_api_key(state: &AppState) -> String {
    let raw = auth::generate_api_key();
    let record = ApiKeyRecord {
        id: Uuid::new_v4(),
        name: "test".to_string(),
        key_hash: auth::hash_api_key(&raw, TEST_SALT),
        key_prefix: raw.chars().take(8).collect(),
        permissions: vec!["read".to_string(), "write".to_string()],
        active: true,
        expires_at: None,
        last_used_at: None,
        usage_count: 0,
        rate_limit_per_minute: 60,
        created_at: Utc::now(),
    };
    state.store.insert_api_key(record).await.expect("seed key");
    raw
}

/// Serve a fixture site on an ephemeral local port, returning its base URL.
pub async fn spawn_site(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture site");
    let addr = listener.local_addr().expect("fixture addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}
