use axum::{Json, response::IntoResponse};

/// Protocol version advertised to clients
pub const MAJOR_VERSION: &str = "2";

pub async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "major": MAJOR_VERSION }))
}
