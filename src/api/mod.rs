//! HTTP surface: the `/v2` endpoints, health probes, Prometheus metrics,
//! request instrumentation, and CORS.

pub mod auth;
pub mod health;
pub mod metrics;
pub mod v2;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::AppState;
use crate::mcp;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = match &state.config.allowed_origins {
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parsed))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/livez", get(health::livez))
        .route("/metrics", get(metrics_handler))
        .route("/v2/scrape", post(v2::scrape))
        .route("/v2/crawl", post(v2::start_crawl))
        .route(
            "/v2/crawl/{id}",
            get(v2::crawl_status).delete(v2::cancel_crawl),
        )
        .route("/v2/map", post(v2::map_site))
        .route("/v2/batch/scrape", post(v2::start_batch))
        .route("/v2/batch/scrape/{id}", get(v2::batch_status))
        .route("/mcp", post(mcp::rpc::handle))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_request,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics.render())
}

/// Per-request instrumentation: counter, duration histogram, and the
/// `X-Response-Time` header (seconds).
async fn track_request(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut response = next.run(request).await;
    let elapsed = started.elapsed().as_secs_f64();

    if path != "/metrics" {
        state
            .metrics
            .http_requests_total
            .with_label_values(&[method.as_str(), &path, response.status().as_str()])
            .inc();
        state
            .metrics
            .http_request_duration_seconds
            .with_label_values(&[method.as_str(), &path])
            .observe(elapsed);
    }

    if let Ok(value) = HeaderValue::from_str(&format!("{elapsed:.3}")) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-response-time"), value);
    }
    response
}
