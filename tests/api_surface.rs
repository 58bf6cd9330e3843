mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use webharvest::api;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

#[tokio::test]
async fn health_endpoints_respond() {
    let state = common::test_state().await;
    let app = api::build_router(state);

    for (path, expected_status) in [("/healthz", "healthy"), ("/livez", "alive")] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers().contains_key("x-response-time"),
            "{path} should carry X-Response-Time"
        );
        let body = body_json(response).await;
        assert_eq!(body["status"], expected_status);
    }
}

#[tokio::test]
async fn readyz_reports_dependency_checks() {
    let state = common::test_state().await;
    let app = api::build_router(state);
    let response = app
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["checks"]["database"], "healthy");
    assert_eq!(body["checks"]["coordination_store"], "healthy");
    assert!(body["checks"]["worker_queue"]
        .as_str()
        .unwrap()
        .starts_with("healthy"));
}

#[tokio::test]
async fn metrics_expose_prometheus_text() {
    let state = common::test_state().await;
    let app = api::build_router(state);

    // Prime the counters with one request.
    let _ = app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec(),
    )
    .unwrap();
    assert!(text.contains("http_requests_total"));
    assert!(text.contains("http_request_duration_seconds"));
    assert!(text.contains("active_crawls"));
}

#[tokio::test]
async fn mutating_endpoints_require_bearer_key() {
    let state = common::test_state().await;
    let key = common::seed_api_key(&state).await;
    let app = api::build_router(state);

    let unauthorized = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/map")
                .header("content-type", "application/json")
                .body(Body::from(json!({"url": "https://example.com"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

    let wrong_prefix = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/map")
                .header("content-type", "application/json")
                .header("authorization", "Bearer sk_not_ours")
                .body(Body::from(json!({"url": "https://example.com"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(wrong_prefix.status(), StatusCode::UNAUTHORIZED);

    // A valid key on a bad payload gets a validation error, not 401.
    let validation = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/map")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {key}"))
                .body(Body::from(json!({"url": "not a url"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(validation.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_job_ids_return_not_found() {
    let state = common::test_state().await;
    let key = common::seed_api_key(&state).await;
    let app = api::build_router(state);

    for uri in [
        "/v2/crawl/00000000-0000-0000-0000-000000000000",
        "/v2/batch/scrape/00000000-0000-0000-0000-000000000000",
        "/v2/crawl/not-a-uuid",
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("authorization", format!("Bearer {key}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn rpc_initialize_and_tool_listing() {
    let state = common::test_state().await;
    let app = api::build_router(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(body["result"]["serverInfo"]["name"], "webharvest-mcp");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    let tools = body["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(names.contains(&"scrape_url"));
    assert!(names.contains(&"crawl_site"));
    assert!(names.contains(&"sync_crawl_to_collection"));
    assert_eq!(names.len(), 10);
}

#[tokio::test]
async fn rpc_error_codes() {
    let state = common::test_state().await;
    let app = api::build_router(state);

    // Unknown method.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 3, "method": "nope"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32601);

    // Unknown tool.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "jsonrpc": "2.0", "id": 4, "method": "tools/call",
                        "params": {"name": "not_a_tool", "arguments": {}}
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32601);

    // Bad arguments on a known tool.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "jsonrpc": "2.0", "id": 5, "method": "tools/call",
                        "params": {"name": "get_crawl_status", "arguments": {"crawl_id": "zzz"}}
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn rpc_resources_and_prompts() {
    let state = common::test_state().await;
    let app = api::build_router(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 6, "method": "resources/list"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert!(!body["result"]["resources"].as_array().unwrap().is_empty());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "jsonrpc": "2.0", "id": 7, "method": "prompts/get",
                        "params": {"name": "ingest_docs"}
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert!(body["result"]["messages"][0]["content"]["text"]
        .as_str()
        .unwrap()
        .contains("crawl_site"));
}

#[tokio::test]
async fn project_tools_round_trip() {
    let state = common::test_state().await;
    let app = api::build_router(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "jsonrpc": "2.0", "id": 8, "method": "tools/call",
                        "params": {"name": "create_project", "arguments": {"name": "docs"}}
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["result"]["isError"], false);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "jsonrpc": "2.0", "id": 9, "method": "tools/call",
                        "params": {"name": "list_projects", "arguments": {}}
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("docs"));
}
