use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use oneiric_runtime::Runtime;
use tower_http::trace::TraceLayer;

use crate::handlers;

pub fn build_app(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/status", get(handlers::status))
        .route("/tasks/workflow", post(handlers::submit_workflow))
        .layer(TraceLayer::new_for_http())
        .with_state(runtime)
}

/// Bind and serve until ctrl-c or runtime cancellation.
pub async fn serve(runtime: Arc<Runtime>, addr: &str) -> std::io::Result<()> {
    let cancel = runtime.cancel().clone();
    let app = build_app(runtime);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "http endpoints listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = cancel.cancelled() => {}
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use oneiric_config::Settings;
    use oneiric_domain::{Candidate, Domain, Key, Source};
    use oneiric_store::InMemoryStore;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    async fn test_runtime() -> Arc<Runtime> {
        let mut settings = Settings::default();
        settings.watcher.enabled = false;
        settings.supervisor.enabled = false;
        let runtime = Runtime::build_with_store(settings, Arc::new(InMemoryStore::new()));
        runtime.boot().await.unwrap();
        runtime
    }

    fn workflow_candidate(key: &str, nodes: Value) -> Candidate {
        Candidate {
            domain: Domain::Workflow,
            key: Key::new(key),
            provider: "builtin".to_string(),
            factory: "oneiric.workflows.dag:build".to_string(),
            priority: 0,
            stack_level: 0,
            source: Source::Inline,
            settings: json!({ "nodes": nodes }),
            capabilities: Default::default(),
            metadata: Default::default(),
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_workflow(body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/tasks/workflow")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_ok_when_nothing_activated() {
        let app = build_app(test_runtime().await);
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn healthz_degrades_to_503() {
        let runtime = test_runtime().await;
        // A slot whose factory has no registered constructor ends Failed.
        runtime.register_inline(Candidate {
            domain: Domain::Adapter,
            key: Key::new("broken"),
            provider: "ghost".to_string(),
            factory: "oneiric.adapters.ghost:build".to_string(),
            priority: 0,
            stack_level: 0,
            source: Source::Inline,
            settings: Value::Null,
            capabilities: Default::default(),
            metadata: Default::default(),
        });
        let _ = runtime.adapters().use_adapter(&Key::new("broken")).await;

        let app = build_app(runtime);
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn status_lists_slots() {
        let app = build_app(test_runtime().await);
        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["slots"].as_array().map_or(false, |s| !s.is_empty()));
    }

    #[tokio::test]
    async fn workflow_submit_returns_202_with_run_id() {
        let runtime = test_runtime().await;
        runtime.register_inline(workflow_candidate(
            "etl",
            json!([{"id": "a", "kit": "echo", "op": "x"}]),
        ));

        let app = build_app(runtime);
        let response = app
            .oneshot(post_workflow(json!({"workflow": "etl", "inputs": {"n": 1}})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert!(body["run_id"].is_string());
    }

    #[tokio::test]
    async fn workflow_idempotency_key_returns_same_run() {
        let runtime = test_runtime().await;
        runtime.register_inline(workflow_candidate(
            "etl",
            json!([{"id": "a", "kit": "echo", "op": "x"}]),
        ));
        let app = build_app(runtime);

        let payload = json!({"workflow": "etl", "idempotency_key": "req-1"});
        let first = body_json(
            app.clone().oneshot(post_workflow(payload.clone())).await.unwrap(),
        )
        .await;
        let second = body_json(app.oneshot(post_workflow(payload)).await.unwrap()).await;
        assert_eq!(first["run_id"], second["run_id"]);
    }

    #[tokio::test]
    async fn unknown_workflow_is_404() {
        let app = build_app(test_runtime().await);
        let response = app
            .oneshot(post_workflow(json!({"workflow": "ghost"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error_kind"], "no_candidate");
    }

    #[tokio::test]
    async fn cyclic_workflow_is_422() {
        let runtime = test_runtime().await;
        runtime.register_inline(workflow_candidate(
            "loop",
            json!([
                {"id": "a", "kit": "echo", "op": "x", "depends_on": ["b"]},
                {"id": "b", "kit": "echo", "op": "x", "depends_on": ["a"]},
            ]),
        ));

        let app = build_app(runtime);
        let response = app
            .oneshot(post_workflow(json!({"workflow": "loop"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["error_kind"], "workflow_cycle");
    }

    #[tokio::test]
    async fn paused_workflow_is_409() {
        let runtime = test_runtime().await;
        runtime.register_inline(workflow_candidate(
            "etl",
            json!([{"id": "a", "kit": "echo", "op": "x"}]),
        ));
        runtime
            .pause(Domain::Workflow, &Key::new("etl"), None)
            .await
            .unwrap();

        let app = build_app(runtime);
        let response = app
            .oneshot(post_workflow(json!({"workflow": "etl"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn malformed_payload_is_client_error() {
        let app = build_app(test_runtime().await);
        let response = app
            .oneshot(post_workflow(json!({"not_workflow": true})))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
