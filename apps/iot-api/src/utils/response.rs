//! HTTP 响应辅助函数和 DTO 转换
//!
//! - 错误响应：bad_request_error, not_found_error, unavailable_error, storage_error
//! - DTO 转换：record_to_dto, measurement_to_dto

use api_contract::{ApiResponse, TelemetryPointDto};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::Measurement;
use iot_storage::{StorageError, TelemetryRecord};

/// 错误请求响应
pub fn bad_request_error(message: impl Into<String>) -> Response {
    error_response(StatusCode::BAD_REQUEST, "INVALID.REQUEST", message)
}

/// 资源未找到错误响应
pub fn not_found_error(message: impl Into<String>) -> Response {
    error_response(StatusCode::NOT_FOUND, "RESOURCE.NOT_FOUND", message)
}

/// 存储不可用（暂时性错误重试耗尽）
pub fn unavailable_error(message: impl Into<String>) -> Response {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "STORAGE.UNAVAILABLE", message)
}

/// 存储错误响应：暂时性错误 503，其余 500
pub fn storage_error(err: StorageError) -> Response {
    tracing::warn!(target: "iot.api", error = %err, kind = ?err.kind(), "storage_error");
    if err.is_transient() {
        return unavailable_error(err.to_string());
    }
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL.ERROR",
        err.to_string(),
    )
}

pub fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::error(code, message.into()))).into_response()
}

/// TelemetryRecord 转 TelemetryPointDto
pub fn record_to_dto(record: TelemetryRecord) -> TelemetryPointDto {
    TelemetryPointDto {
        device_id: record.device_id,
        metric_name: record.metric_name,
        value: record.value,
        unit: record.unit,
        quality: record.quality,
        timestamp: record.ts_ms,
    }
}

/// 刚写入的 Measurement 转 TelemetryPointDto
pub fn measurement_to_dto(item: &Measurement) -> TelemetryPointDto {
    TelemetryPointDto {
        device_id: item.device_id().to_string(),
        metric_name: item.metric_name().to_string(),
        value: item.value(),
        unit: item.unit().to_string(),
        quality: i32::from(item.quality()),
        timestamp: item.ts_ms(),
    }
}
