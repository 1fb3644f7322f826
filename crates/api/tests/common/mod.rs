#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use reelforge_api::config::ServerConfig;
use reelforge_api::router::build_app_router;
use reelforge_api::state::AppState;
use reelforge_db::repositories::InMemoryBatchRepo;
use reelforge_events::EventBus;
use reelforge_pipeline::{JobOrchestrator, OrchestratorConfig};
use reelforge_render::{BackendRegistry, SimulatedBackend};
use serde_json::Value;
use tower::ServiceExt;

/// Test `ServerConfig` with the dev CORS origin and no database.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        database_url: None,
    }
}

/// Full application router over an in-memory store and an instant preview
/// backend. The orchestrator is returned so tests can share it between
/// requests.
pub fn build_test_app() -> (Router, Arc<JobOrchestrator>) {
    let registry = BackendRegistry::new().register(Arc::new(SimulatedBackend::instant()));
    let orchestrator = Arc::new(JobOrchestrator::new(
        registry,
        Arc::new(InMemoryBatchRepo::new()),
        Arc::new(EventBus::default()),
        OrchestratorConfig::default(),
    ));
    let config = test_config();
    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        config: Arc::new(config.clone()),
    };
    (build_app_router(state, &config), orchestrator)
}

pub async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, None).await
}

pub async fn post(app: Router, uri: &str) -> Response {
    send(app, Method::POST, uri, None).await
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn delete(app: Router, uri: &str) -> Response {
    send(app, Method::DELETE, uri, None).await
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `uri` until the batch reports `status`, up to ~2s.
pub async fn wait_for_status(app: &Router, uri: &str, status: &str) -> Value {
    for _ in 0..200 {
        let json = body_json(get(app.clone(), uri).await).await;
        if json["data"]["status"] == status {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("batch at {uri} never reached status {status}");
}

pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status for response");
}
