//! 请求上下文。
//!
//! 上游带 `x-request-id` 时沿用（便于网关侧批量提交的关联排查），否则新生成；
//! trace_id 总是新生成。两者写入请求扩展、日志 span 与响应头。

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use iot_telemetry::{RequestIds, new_request_ids};
use std::time::Instant;
use tracing::Instrument;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const TRACE_ID: HeaderName = HeaderName::from_static("x-trace-id");
const MAX_UPSTREAM_ID_LEN: usize = 128;

fn upstream_request_id(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(&REQUEST_ID)?.to_str().ok()?.trim();
    if value.is_empty() || value.len() > MAX_UPSTREAM_ID_LEN {
        return None;
    }
    Some(value.to_string())
}

fn request_ids(headers: &HeaderMap) -> RequestIds {
    let mut ids = new_request_ids();
    if let Some(request_id) = upstream_request_id(headers) {
        ids.request_id = request_id;
    }
    ids
}

pub async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let ids = request_ids(req.headers());
    let started = Instant::now();
    let span = tracing::info_span!(
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    req.extensions_mut().insert(ids.clone());

    let mut response = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| {
        tracing::debug!(
            target: "iot.api",
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request_completed"
        );
    });

    for (name, value) in [(REQUEST_ID, &ids.request_id), (TRACE_ID, &ids.trace_id)] {
        if let Ok(value) = HeaderValue::from_str(value) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}
