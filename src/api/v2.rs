use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Json;
use uuid::Uuid;

use super::auth;
use crate::core::error::ApiError;
use crate::core::types::{
    BatchScrapeRequest, BatchStatusResponse, CrawlRequest, CrawlStatusResponse,
    JobCreatedResponse, MapRequest, MapResponse, ScrapeRequest, ScrapeResponse,
};
use crate::core::AppState;

async fn require_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    auth::authorize(&state.store, &state.config.api_key_salt, headers)
        .await
        .map(|_| ())
}

/// POST /v2/scrape: synchronous scrape with cache pre/post.
pub async fn scrape(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ScrapeRequest>,
) -> Result<Json<ScrapeResponse>, ApiError> {
    require_key(&state, &headers).await?;
    let response = state.jobs.scrape(&request).await?;
    Ok(Json(response))
}

/// POST /v2/crawl: persist the job and return its id immediately.
pub async fn start_crawl(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CrawlRequest>,
) -> Result<Json<JobCreatedResponse>, ApiError> {
    require_key(&state, &headers).await?;
    let response = state.jobs.start_crawl(request).await?;
    Ok(Json(response))
}

/// GET /v2/crawl/{id}: always 200 for known jobs; failures live inside
/// the payload.
pub async fn crawl_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CrawlStatusResponse>, ApiError> {
    require_key(&state, &headers).await?;
    let id = parse_job_id(&id)?;
    Ok(Json(state.jobs.crawl_status(id).await?))
}

/// DELETE /v2/crawl/{id}
pub async fn cancel_crawl(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_key(&state, &headers).await?;
    let id = parse_job_id(&id)?;
    state.jobs.cancel_crawl(id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Crawl job canceled",
    })))
}

/// POST /v2/map: synchronous discovery without content extraction.
pub async fn map_site(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<MapRequest>,
) -> Result<Json<MapResponse>, ApiError> {
    require_key(&state, &headers).await?;
    Ok(Json(state.jobs.map_site(&request).await?))
}

/// POST /v2/batch/scrape
pub async fn start_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<BatchScrapeRequest>,
) -> Result<Json<JobCreatedResponse>, ApiError> {
    require_key(&state, &headers).await?;
    Ok(Json(state.jobs.start_batch(request).await?))
}

/// GET /v2/batch/scrape/{id}
pub async fn batch_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    require_key(&state, &headers).await?;
    let id = parse_job_id(&id)?;
    Ok(Json(state.jobs.batch_status(id).await?))
}

fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("job".to_string()))
}
