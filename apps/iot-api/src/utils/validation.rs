//! 输入验证辅助函数
//!
//! 失败时直接返回 bad_request_error 响应。

use crate::utils::response::bad_request_error;
use axum::response::Response;
use iot_normalize::parse_timestamp_ms;
use serde_json::Value;

/// 必填字段：去除首尾空格后非空
pub fn normalize_required(value: String, field: &str) -> Result<String, Response> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(bad_request_error(format!("{field} required")));
    }
    Ok(trimmed.to_string())
}

/// 可选字段：提供时去除空格并检查非空
pub fn normalize_optional(value: Option<String>, field: &str) -> Result<Option<String>, Response> {
    match value {
        Some(value) => normalize_required(value, field).map(Some),
        None => Ok(None),
    }
}

/// 时间参数：RFC 3339 或 Unix 秒 / 毫秒
pub fn parse_time_param(value: Option<&str>, field: &str) -> Result<Option<i64>, Response> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    parse_timestamp_ms(&Value::String(value.to_string()))
        .map(Some)
        .ok_or_else(|| bad_request_error(format!("{field} must be RFC 3339 or epoch time")))
}
