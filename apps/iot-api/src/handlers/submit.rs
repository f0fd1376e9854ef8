//! 同步提交：绕过总线与缓冲区，直接交给批量写入器。
//!
//! - POST /telemetry/batch
//! - POST /telemetry（单条读数）
//!
//! 批量提交状态码：
//! - 400：请求体不是合法 JSON、空请求或超过 1000 条（不截断）
//! - 422：没有任何一行被接受
//! - 503：设备注册表或存储不可用
//! - 200：全部或部分成功，行级错误在 `errors` 中
//!
//! 单条提交：201 成功并返回写入的读数，422 读数无效或被存储拒绝，503 不可用。

use crate::AppState;
use crate::utils::response::{
    bad_request_error, error_response, measurement_to_dto, unavailable_error,
};
use api_contract::{
    ApiError, ApiResponse, BatchResultDto, MAX_SUBMIT_ROWS, RowErrorDto, TelemetryBatchRequest,
    TelemetryRowRequest,
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::{Measurement, MeasurementDraft, Metadata};
use iot_normalize::{DeviceResolver, parse_decimal, parse_timestamp_ms, scalar};
use iot_pipeline::PipelineError;
use serde_json::Value;

const INVALID_READING: &str = "TELEMETRY.INVALID_READING";

enum RowError {
    Invalid(String),
    Registry(String),
}

fn device_reference(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn invalid(reason: impl Into<String>) -> RowError {
    RowError::Invalid(reason.into())
}

fn text_field(value: Option<Value>, field: &str) -> Result<Option<String>, RowError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(_) => Err(invalid(format!("{field} must be a string"))),
    }
}

fn quality_field(value: Option<Value>) -> Result<Option<i64>, RowError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_i64()
            .map(Some)
            .ok_or_else(|| invalid("quality must be an integer between 0 and 100")),
        Some(_) => Err(invalid("quality must be an integer between 0 and 100")),
    }
}

fn metadata_field(value: Option<Value>) -> Result<Metadata, RowError> {
    match value {
        None | Some(Value::Null) => Ok(Metadata::new()),
        Some(Value::Object(fields)) => Ok(fields
            .iter()
            .filter_map(|(key, value)| scalar(value).map(|value| (key.clone(), value)))
            .collect()),
        Some(_) => Err(invalid("metadata must be an object")),
    }
}

async fn build_measurement(
    state: &AppState,
    row: TelemetryRowRequest,
    received_at_ms: i64,
) -> Result<Measurement, RowError> {
    let external_id = device_reference(row.device_id.as_ref())
        .ok_or_else(|| invalid("deviceId is required"))?;
    let metric_name = text_field(row.metric_name, "metricName")?
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| invalid("metricName is required"))?;
    let value = row
        .value
        .as_ref()
        .and_then(parse_decimal)
        .ok_or_else(|| invalid("value must be numeric"))?;
    let ts_ms = match row.timestamp.as_ref().filter(|value| !value.is_null()) {
        Some(raw) => Some(parse_timestamp_ms(raw).ok_or_else(|| invalid("invalid timestamp"))?),
        None => None,
    };
    let unit = text_field(row.unit, "unit")?.unwrap_or_default();
    let quality = quality_field(row.quality)?;
    let metadata = metadata_field(row.metadata)?;

    let device_id = state
        .resolver
        .resolve(&external_id)
        .await
        .map_err(|err| RowError::Registry(err.to_string()))?
        .ok_or_else(|| invalid(format!("unknown device: {external_id}")))?;

    let draft = MeasurementDraft {
        device_id,
        metric_name,
        value,
        unit,
        quality,
        ts_ms,
        metadata,
    };
    Measurement::new(draft, received_at_ms).map_err(|err| invalid(err.to_string()))
}

fn json_rejected(rejection: JsonRejection) -> Response {
    tracing::debug!(target: "iot.api", error = %rejection.body_text(), "request_body_rejected");
    bad_request_error(rejection.body_text())
}

pub async fn submit_batch(
    State(state): State<AppState>,
    payload: Result<Json<TelemetryBatchRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return json_rejected(rejection),
    };
    let total = req.readings.len();
    if total == 0 {
        return bad_request_error("readings must not be empty");
    }
    if total > MAX_SUBMIT_ROWS {
        return error_response(
            StatusCode::BAD_REQUEST,
            "TELEMETRY.BATCH_TOO_LARGE",
            format!("at most {MAX_SUBMIT_ROWS} readings per request, got {total}"),
        );
    }

    let received_at_ms = domain::now_epoch_ms();
    let mut errors = Vec::new();
    let mut valid = Vec::with_capacity(total);
    let mut positions = Vec::with_capacity(total);
    for (index, raw) in req.readings.into_iter().enumerate() {
        let built = match TelemetryRowRequest::from_value(raw) {
            Ok(row) => build_measurement(&state, row, received_at_ms).await,
            Err(reason) => Err(RowError::Invalid(reason)),
        };
        match built {
            Ok(measurement) => {
                positions.push(index);
                valid.push(measurement);
            }
            Err(RowError::Invalid(reason)) => errors.push(RowErrorDto { index, reason }),
            Err(RowError::Registry(reason)) => {
                tracing::warn!(target: "iot.api", error = %reason, "registry_unavailable");
                return unavailable_error(reason);
            }
        }
    }

    let mut accepted = 0u64;
    let mut lost = 0usize;
    if !valid.is_empty() {
        match state.pipeline.write_now(valid).await {
            Ok(report) => {
                accepted = report.written;
                lost = report.lost.len();
                let position = |index: usize| positions.get(index).copied().unwrap_or(index);
                errors.extend(
                    report
                        .failed
                        .into_iter()
                        .chain(report.lost)
                        .map(|failure| RowErrorDto {
                            index: position(failure.index),
                            reason: failure.reason,
                        }),
                );
            }
            Err(PipelineError::BatchLost { rows, reason }) => {
                tracing::error!(target: "iot.api", rows, reason = %reason, "submit_batch_lost");
                return unavailable_error(reason);
            }
            Err(err) => return bad_request_error(err.to_string()),
        }
    }
    errors.sort_by_key(|error| error.index);

    let result = BatchResultDto {
        accepted,
        rejected: errors.len() as u64,
        errors,
    };
    tracing::info!(
        target: "iot.api",
        total,
        accepted = result.accepted,
        rejected = result.rejected,
        lost,
        "telemetry_batch_submitted"
    );
    if accepted == 0 {
        let (status, code, message) = if lost > 0 {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORAGE.UNAVAILABLE",
                "storage became unavailable while writing",
            )
        } else {
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                "TELEMETRY.ALL_REJECTED",
                "no reading was accepted",
            )
        };
        let body = ApiResponse {
            success: false,
            data: Some(result),
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        };
        return (status, Json(body)).into_response();
    }
    (StatusCode::OK, Json(ApiResponse::success(result))).into_response()
}

pub async fn submit_reading(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return json_rejected(rejection),
    };
    let row = match TelemetryRowRequest::from_value(body) {
        Ok(row) => row,
        Err(reason) => return bad_request_error(reason),
    };
    let measurement = match build_measurement(&state, row, domain::now_epoch_ms()).await {
        Ok(measurement) => measurement,
        Err(RowError::Invalid(reason)) => {
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, INVALID_READING, reason);
        }
        Err(RowError::Registry(reason)) => {
            tracing::warn!(target: "iot.api", error = %reason, "registry_unavailable");
            return unavailable_error(reason);
        }
    };
    let point = measurement_to_dto(&measurement);

    match state.pipeline.write_now(vec![measurement]).await {
        Ok(report) if report.written > 0 => {
            tracing::info!(
                target: "iot.api",
                device_id = %point.device_id,
                metric_name = %point.metric_name,
                "telemetry_reading_submitted"
            );
            (StatusCode::CREATED, Json(ApiResponse::success(point))).into_response()
        }
        Ok(report) => {
            if let Some(failure) = report.lost.into_iter().next() {
                return unavailable_error(failure.reason);
            }
            let reason = report
                .failed
                .into_iter()
                .next()
                .map(|failure| failure.reason)
                .unwrap_or_else(|| "reading was not written".to_string());
            error_response(StatusCode::UNPROCESSABLE_ENTITY, INVALID_READING, reason)
        }
        Err(PipelineError::BatchLost { rows, reason }) => {
            tracing::error!(target: "iot.api", rows, reason = %reason, "submit_reading_lost");
            unavailable_error(reason)
        }
        Err(err) => bad_request_error(err.to_string()),
    }
}
