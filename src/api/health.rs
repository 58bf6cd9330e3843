use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;

use crate::core::AppState;
use crate::limits::CoordinationStore as _;
use crate::store::JobStore as _;

/// Fast liveness answer for load balancers.
pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn livez() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Readiness: every dependency is probed and the overall status degrades
/// to 503 when a required one is down.
pub async fn readyz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let mut all_healthy = true;
    let mut checks = serde_json::Map::new();

    match state.store.ping().await {
        Ok(()) => {
            checks.insert("database".into(), "healthy".into());
        }
        Err(e) => {
            checks.insert("database".into(), format!("unhealthy: {e}").into());
            all_healthy = false;
        }
    }

    match state.coordination.ping().await {
        Ok(()) => {
            checks.insert("coordination_store".into(), "healthy".into());
        }
        Err(e) => {
            checks.insert(
                "coordination_store".into(),
                format!("unhealthy: {e}").into(),
            );
            all_healthy = false;
        }
    }

    match state.store.active_job_count().await {
        Ok(active) => {
            checks.insert(
                "worker_queue".into(),
                format!("healthy (active_jobs: {active})").into(),
            );
        }
        Err(e) => {
            checks.insert("worker_queue".into(), format!("unhealthy: {e}").into());
            all_healthy = false;
        }
    }

    match fs2::available_space(".") {
        Ok(bytes) => {
            let free_gb = bytes / (1 << 30);
            if free_gb < 1 {
                checks.insert(
                    "disk_space".into(),
                    format!("warning: only {free_gb}GB free").into(),
                );
            } else {
                checks.insert(
                    "disk_space".into(),
                    format!("healthy ({free_gb}GB free)").into(),
                );
            }
        }
        Err(e) => {
            // Disk probing is informational; it never degrades readiness.
            checks.insert("disk_space".into(), format!("unknown: {e}").into());
        }
    }

    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if all_healthy { "ready" } else { "not_ready" },
        "checks": checks,
        "timestamp": Utc::now().to_rfc3339(),
    });
    (status, Json(body))
}
