//! 路由定义
//!
//! - 健康检查：/health
//! - 计数快照：/metrics
//! - 提交：POST /telemetry, POST /telemetry/batch
//! - 读路径：/telemetry/query, /telemetry/latest/:device_id, /telemetry/aggregate

use super::AppState;
use super::handlers::*;
use super::middleware::request_context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// 创建 API 路由，支持 / 和 /api/ 两种前缀
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .route("/telemetry", post(submit_reading))
        .route("/telemetry/batch", post(submit_batch))
        .route("/telemetry/query", get(query_telemetry))
        .route("/telemetry/latest/:device_id", get(latest_telemetry))
        .route("/telemetry/aggregate", get(aggregate_telemetry))
}

/// 完整应用：路由 + 请求上下文 + HTTP trace。
pub fn create_app(state: AppState) -> Router {
    let api = create_api_router();
    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_context))
}
