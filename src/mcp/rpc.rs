use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::tooling;
use crate::core::error::ApiError;
use crate::core::types::{BatchScrapeRequest, CrawlRequest, MapRequest, ScrapeRequest};
use crate::core::AppState;
use crate::store::JobStore as _;

pub const PROTOCOL_VERSION: &str = "2025-06-18";

const CODE_METHOD_NOT_FOUND: i64 = -32601;
const CODE_INVALID_PARAMS: i64 = -32602;
const CODE_INTERNAL: i64 = -32603;

/// JSON-RPC 2.0 endpoint carrying the MCP-style tool surface.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Json(request): Json<Value>,
) -> Json<Value> {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(json!({}));

    let outcome = dispatch(&state, method, params).await;
    Json(match outcome {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }),
    })
}

async fn dispatch(state: &AppState, method: &str, params: Value) -> Result<Value, (i64, String)> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {"listChanged": false},
                "resources": {"subscribe": false, "listChanged": false},
                "prompts": {"listChanged": false}
            },
            "serverInfo": {
                "name": "webharvest-mcp",
                "version": env!("CARGO_PKG_VERSION")
            }
        })),
        "tools/list" => Ok(tooling::tools_as_json()),
        "tools/call" => {
            let name = params
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or((CODE_INVALID_PARAMS, "missing tool name".to_string()))?;
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
            info!("tool call: {name}");
            call_tool(state, name, arguments).await
        }
        "resources/list" => Ok(json!({
            "resources": [{
                "uri": "webharvest://jobs/recent",
                "name": "Recent Jobs",
                "description": "Crawl and batch jobs currently known to this instance",
                "mimeType": "application/json"
            }]
        })),
        "resources/read" => {
            let uri = params
                .get("uri")
                .and_then(|u| u.as_str())
                .unwrap_or_default();
            if uri != "webharvest://jobs/recent" {
                return Err((CODE_INVALID_PARAMS, format!("unknown resource: {uri}")));
            }
            let active = state
                .store
                .active_job_count()
                .await
                .map_err(|e| (CODE_INTERNAL, e.to_string()))?;
            Ok(json!({
                "contents": [{
                    "uri": uri,
                    "mimeType": "application/json",
                    "text": json!({ "active_jobs": active }).to_string()
                }]
            }))
        }
        "prompts/list" => Ok(json!({
            "prompts": [
                {
                    "name": "ingest_docs",
                    "description": "Crawl a documentation site and sync it into a knowledge collection",
                    "arguments": [
                        {"name": "url", "description": "Documentation root URL", "required": true},
                        {"name": "collection_name", "description": "Target collection name", "required": false}
                    ]
                },
                {
                    "name": "analyze_changes",
                    "description": "Compare content hashes of a finished crawl against a previous run",
                    "arguments": [
                        {"name": "crawl_id", "description": "Crawl job id", "required": true}
                    ]
                }
            ]
        })),
        "prompts/get" => {
            let name = params
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default();
            prompt_text(name)
                .map(|text| {
                    json!({
                        "messages": [{
                            "role": "user",
                            "content": {"type": "text", "text": text}
                        }]
                    })
                })
                .ok_or((CODE_INVALID_PARAMS, format!("unknown prompt: {name}")))
        }
        _ => Err((CODE_METHOD_NOT_FOUND, "Method not found".to_string())),
    }
}

fn prompt_text(name: &str) -> Option<&'static str> {
    match name {
        "ingest_docs" => Some(
            "Crawl the documentation site with crawl_site, poll get_crawl_status until it \
             completes, then call sync_crawl_to_collection to push the pages into the \
             knowledge collection.",
        ),
        "analyze_changes" => Some(
            "Fetch the crawl's pages with get_crawl_status and compare each page's \
             contentHash against the previous run to list changed URLs.",
        ),
        _ => None,
    }
}

/// Closed dispatch over the tool set; unknown names are invalid params,
/// never dynamic lookup.
async fn call_tool(state: &AppState, name: &str, arguments: Value) -> Result<Value, (i64, String)> {
    let result = match name {
        "scrape_url" => {
            let request: ScrapeRequest = parse_args(arguments)?;
            let response = state.jobs.scrape(&request).await.map_err(rpc_error)?;
            serde_json::to_value(response).map_err(internal)?
        }
        "crawl_site" => {
            let request: CrawlRequest = parse_args(arguments)?;
            let response = state.jobs.start_crawl(request).await.map_err(rpc_error)?;
            serde_json::to_value(response).map_err(internal)?
        }
        "get_crawl_status" => {
            let id = job_id_arg(&arguments, "crawl_id")?;
            let response = state.jobs.crawl_status(id).await.map_err(rpc_error)?;
            serde_json::to_value(response).map_err(internal)?
        }
        "cancel_crawl" => {
            let id = job_id_arg(&arguments, "crawl_id")?;
            state.jobs.cancel_crawl(id).await.map_err(rpc_error)?;
            json!({ "success": true, "message": "Crawl job canceled" })
        }
        "map_site" => {
            let request: MapRequest = parse_args(arguments)?;
            let response = state.jobs.map_site(&request).await.map_err(rpc_error)?;
            serde_json::to_value(response).map_err(internal)?
        }
        "batch_scrape" => {
            let request: BatchScrapeRequest = parse_args(arguments)?;
            let response = state.jobs.start_batch(request).await.map_err(rpc_error)?;
            serde_json::to_value(response).map_err(internal)?
        }
        "get_batch_status" => {
            let id = job_id_arg(&arguments, "batch_id")?;
            let response = state.jobs.batch_status(id).await.map_err(rpc_error)?;
            serde_json::to_value(response).map_err(internal)?
        }
        "sync_crawl_to_collection" => {
            let crawl_id = job_id_arg(&arguments, "crawl_id")?;
            let connector = state.sync.as_ref().ok_or((
                CODE_INTERNAL,
                "OpenWebUI sync is not configured (set OPENWEBUI_BASE_URL)".to_string(),
            ))?;
            let collection_id = match arguments.get("collection_id").and_then(|v| v.as_str()) {
                Some(id) => id.to_string(),
                None => {
                    let name = arguments
                        .get("collection_name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("webharvest-crawl");
                    connector
                        .create_collection(name, "Synced by webharvest")
                        .await
                        .map_err(internal)?
                }
            };
            let report = connector
                .sync_crawl(&state.store, crawl_id, &collection_id)
                .await
                .map_err(rpc_error)?;
            serde_json::to_value(report).map_err(internal)?
        }
        "create_project" => {
            let name = arguments
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or((CODE_INVALID_PARAMS, "name is required".to_string()))?
                .to_string();
            let description = arguments
                .get("description")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let project = state
                .jobs
                .create_project(name, description)
                .await
                .map_err(rpc_error)?;
            serde_json::to_value(project).map_err(internal)?
        }
        "list_projects" => {
            let projects = state.jobs.list_projects().await.map_err(rpc_error)?;
            json!({ "projects": projects })
        }
        _ => return Err((CODE_METHOD_NOT_FOUND, format!("unknown tool: {name}"))),
    };

    Ok(json!({
        "content": [{
            "type": "text",
            "text": result.to_string()
        }],
        "isError": false
    }))
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, (i64, String)> {
    serde_json::from_value(arguments)
        .map_err(|e| (CODE_INVALID_PARAMS, format!("invalid arguments: {e}")))
}

fn job_id_arg(arguments: &Value, field: &str) -> Result<Uuid, (i64, String)> {
    arguments
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or((CODE_INVALID_PARAMS, format!("{field} must be a job id")))
}

fn rpc_error(error: ApiError) -> (i64, String) {
    (error.rpc_code(), error.to_string())
}

fn internal<E: std::fmt::Display>(error: E) -> (i64, String) {
    (CODE_INTERNAL, error.to_string())
}
