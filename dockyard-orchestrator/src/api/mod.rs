//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod container;
pub mod deploy;
pub mod error;
pub mod health;
pub mod logs;

use axum::{
    Router,
    http::{HeaderValue, Method, header, header::InvalidHeaderValue},
    routing::{delete, get, post},
};
use dockyard_runner::{ContainerRegistry, ContainerTeardown, ImageBuilder};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::build_service::BuildService;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub builds: Arc<BuildService>,
    pub registry: Arc<ContainerRegistry>,
    pub builder: Arc<dyn ImageBuilder>,
    pub teardown: Arc<dyn ContainerTeardown>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Build endpoints
        .route("/deploy", post(deploy::deploy))
        .route("/build-stream", post(deploy::build_stream))
        .route("/logs/{build_id}", get(logs::stream_logs))
        // Container endpoints
        .route("/ping/{container_id}", get(container::ping).post(container::ping))
        .route("/containers", get(container::list_containers))
        .route("/containers/{container_id}", delete(container::delete_container))
        // Add state and middleware
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// CORS policy allowing browser calls from `origin`
pub fn cors_layer(origin: &str) -> Result<CorsLayer, InvalidHeaderValue> {
    Ok(CorsLayer::new()
        .allow_origin(HeaderValue::from_str(origin)?)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_core::domain::container::ContainerRecord;
    use dockyard_runner::conduit::DEFAULT_CAPACITY;
    use dockyard_runner::ports::DEFAULT_PORT_RANGE;
    use dockyard_runner::testing::{FakeFetcher, FakeRecipes, FakeRuntime};
    use dockyard_runner::{ExecutorSettings, PipelineExecutor, PortAllocator};
    use serde_json::{Value, json};

    struct TestServer {
        base: String,
        registry: Arc<ContainerRegistry>,
        runtime: Arc<FakeRuntime>,
        _dir: tempfile::TempDir,
    }

    async fn serve(fetcher: FakeFetcher) -> TestServer {
        serve_with(fetcher, FakeRuntime::default()).await
    }

    async fn serve_with(fetcher: FakeFetcher, runtime: FakeRuntime) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ContainerRegistry::new());
        let runtime = Arc::new(runtime);

        let executor = PipelineExecutor::new(
            Arc::new(fetcher),
            Arc::new(FakeRecipes::default()),
            Arc::clone(&runtime) as Arc<dyn ImageBuilder>,
            Arc::clone(&runtime) as Arc<dyn ContainerTeardown>,
            Arc::clone(&registry),
            PortAllocator::new(DEFAULT_PORT_RANGE, Arc::clone(&registry)).with_probe(false),
            ExecutorSettings {
                workspace_base: dir.path().to_path_buf(),
                ..Default::default()
            },
        );

        let state = AppState {
            builds: Arc::new(BuildService::new(Arc::new(executor), DEFAULT_CAPACITY)),
            registry: Arc::clone(&registry),
            builder: Arc::clone(&runtime) as Arc<dyn ImageBuilder>,
            teardown: Arc::clone(&runtime) as Arc<dyn ContainerTeardown>,
        };
        let app = create_router(state, cors_layer("http://localhost:5173").unwrap());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base: format!("http://{}", addr),
            registry,
            runtime,
            _dir: dir,
        }
    }

    /// Values of every `name:` field in an SSE body, in order
    fn sse_field<'a>(body: &'a str, name: &str) -> Vec<&'a str> {
        body.lines()
            .filter_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
            .map(str::trim)
            .collect()
    }

    fn deploy_body(repo_url: &str) -> Value {
        json!({ "repoUrl": repo_url, "appType": "react" })
    }

    #[tokio::test]
    async fn test_health_reports_ok() {
        let server = serve(FakeFetcher::default()).await;

        let response = reqwest::get(format!("{}/health", server.base)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_health_reports_unreachable_runtime() {
        let server = serve_with(FakeFetcher::default(), FakeRuntime::default().failing_ping()).await;

        let response = reqwest::get(format!("{}/health", server.base)).await.unwrap();
        assert_eq!(response.status(), 503);

        let body: Value = response.json().await.unwrap();
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .starts_with("Container runtime unavailable:")
        );
    }

    #[tokio::test]
    async fn test_deploy_without_app_type_uses_node_defaults() {
        let server = serve(FakeFetcher::default()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/deploy", server.base))
            .json(&json!({ "repoUrl": "https://github.com/acme/api.git" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);

        let accepted: Value = response.json().await.unwrap();
        let body = client
            .get(format!(
                "{}{}",
                server.base,
                accepted["logsUrl"].as_str().unwrap()
            ))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(sse_field(&body, "event").iter().rev().nth(1), Some(&"terminal"));

        let runs = server.runtime.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].internal_port, 3000);
    }

    #[tokio::test]
    async fn test_deploy_then_follow_logs() {
        let server = serve(FakeFetcher::default()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/deploy", server.base))
            .json(&deploy_body("https://github.com/acme/shop.git"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);

        let accepted: Value = response.json().await.unwrap();
        let build_id = accepted["buildId"].as_str().unwrap().to_string();
        let logs_url = accepted["logsUrl"].as_str().unwrap();
        assert_eq!(logs_url, format!("/logs/{}", build_id));

        let body = client
            .get(format!("{}{}", server.base, logs_url))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        let events = sse_field(&body, "event");
        assert_eq!(events.first(), Some(&"info"));
        assert_eq!(&events[events.len() - 2..], &["terminal", "end"]);

        let data = sse_field(&body, "data");
        assert_eq!(data.last(), Some(&build_id.as_str()));
        assert!(data.iter().any(|d| d.starts_with("Deployed! Access at")));

        let ids: Vec<u64> = sse_field(&body, "id")
            .iter()
            .map(|id| id.parse().unwrap())
            .collect();
        assert_eq!(ids, (0..ids.len() as u64).collect::<Vec<_>>());

        assert_eq!(server.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_build_stream_reports_clone_failure() {
        let server = serve(FakeFetcher::failing("repository not found")).await;

        let body = reqwest::Client::new()
            .post(format!("{}/build-stream", server.base))
            .json(&deploy_body("https://example.invalid/nope.git"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        let events = sse_field(&body, "event");
        assert_eq!(events.iter().filter(|e| **e == "error").count(), 1);
        assert_eq!(&events[events.len() - 2..], &["error", "end"]);
        assert!(
            sse_field(&body, "data")
                .iter()
                .any(|d| d.starts_with("Clone failed:"))
        );
        assert!(server.registry.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_deploy_rejected() {
        let server = serve(FakeFetcher::default()).await;

        let response = reqwest::Client::new()
            .post(format!("{}/deploy", server.base))
            .json(&deploy_body(""))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("repoUrl"));
    }

    #[tokio::test]
    async fn test_unknown_build_logs_not_found() {
        let server = serve(FakeFetcher::default()).await;

        let response = reqwest::get(format!(
            "{}/logs/{}",
            server.base,
            uuid::Uuid::new_v4()
        ))
        .await
        .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_ping_list_and_delete_containers() {
        let server = serve(FakeFetcher::default()).await;
        let client = reqwest::Client::new();

        let mut record = ContainerRecord::new("abc123", 8042);
        let registered_at = record.last_access - chrono::Duration::seconds(30);
        record.last_access = registered_at;
        server.registry.register(record).unwrap();

        let pong = client
            .post(format!("{}/ping/abc123", server.base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(pong, "pong");
        assert!(server.registry.get("abc123").unwrap().last_access > registered_at);

        let pong = reqwest::get(format!("{}/ping/ghost", server.base))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(pong, "pong");
        assert!(server.registry.get("ghost").is_none());

        let listed: Vec<ContainerRecord> = reqwest::get(format!("{}/containers", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].container_id, "abc123");

        let response = client
            .delete(format!("{}/containers/abc123", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(server.runtime.torn_down(), vec!["abc123".to_string()]);
        assert!(server.registry.is_empty());

        let response = client
            .delete(format!("{}/containers/abc123", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }
}
