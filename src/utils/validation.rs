use axum::{http::StatusCode, Json};
use serde_json::json;
use validator::ValidationErrors;

pub fn into_response(errors: ValidationErrors) -> (StatusCode, Json<serde_json::Value>) {
    tracing::debug!("Rejected payload: {}", errors);

    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Invalid payload", "errors": errors })),
    )
}
