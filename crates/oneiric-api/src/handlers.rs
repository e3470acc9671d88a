use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use oneiric_domain::Key;
use oneiric_runtime::Runtime;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;

/// `GET /healthz`: 200 when every activated slot reports ok, 503
/// otherwise.
pub async fn healthz(State(runtime): State<Arc<Runtime>>) -> (StatusCode, Json<Value>) {
    let snapshot = runtime.health().await;
    let status = if snapshot.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!(snapshot)))
}

/// `GET /status`: resolution, lifecycle and activity summary.
pub async fn status(State(runtime): State<Arc<Runtime>>) -> Result<Json<Value>, ApiError> {
    let slots = runtime.list(None).await;
    let activity = runtime.activity().await?;
    let remote = runtime.remote_status().ok();
    Ok(Json(json!({
        "slots": slots,
        "activity": activity,
        "remote": remote,
    })))
}

#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub workflow: String,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// `POST /tasks/workflow`: accept a workflow invocation; 202 with the
/// run id.
pub async fn submit_workflow(
    State(runtime): State<Arc<Runtime>>,
    Json(request): Json<WorkflowRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let key = Key::parse(&request.workflow)
        .map_err(|e| ApiError::unprocessable("workflow_invalid", e.to_string()))?;
    let run_id = runtime
        .submit_workflow(&key, request.inputs, request.idempotency_key.as_deref())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "run_id": run_id }))))
}
