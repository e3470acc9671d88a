use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use oneiric_runtime::RuntimeError;
use serde_json::json;

/// HTTP projection of a runtime error: stable kind string plus a status
/// code derived from the error taxonomy.
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn unprocessable(kind: &'static str, msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::UNPROCESSABLE_ENTITY, kind, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error_kind": self.kind, "message": self.message }));
        (self.status, body).into_response()
    }
}

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        let kind = e.kind();
        let status = match kind {
            "no_candidate" | "override_unsatisfied" | "unknown_run" => StatusCode::NOT_FOUND,
            "workflow_cycle" | "workflow_invalid" | "parse_failed" | "config_invalid" => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            "paused" | "draining" | "already_active" => StatusCode::CONFLICT,
            "factory_denied" | "signature_invalid" | "digest_mismatch" | "path_escape"
            | "integrity_failure" => StatusCode::FORBIDDEN,
            "fetch_failed" | "circuit_open" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError { status, kind, message: e.to_string() }
    }
}
