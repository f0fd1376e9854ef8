//! 健康检查
//!
//! - GET /health

use axum::{Json, response::IntoResponse};

pub async fn health() -> impl IntoResponse {
    Json(api_contract::HealthDto { ok: true })
}
