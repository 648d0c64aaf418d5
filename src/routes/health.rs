use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

#[axum::debug_handler]
pub async fn health() -> impl IntoResponse {
    let config = crate::config::get_config();
    let body = json!({
        "status": "ok",
        "candidate_models": config.groq_models,
        "max_questions": config.max_questions,
    });
    (StatusCode::OK, Json(body))
}
