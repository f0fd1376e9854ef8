//! 读路径 handlers
//!
//! - GET /telemetry/query
//! - GET /telemetry/latest/:device_id
//! - GET /telemetry/aggregate

use crate::AppState;
use crate::utils::response::{bad_request_error, not_found_error, record_to_dto, storage_error};
use crate::utils::{normalize_optional, normalize_required, parse_time_param};
use api_contract::{
    AggregateDto, AggregateQueryParams, ApiResponse, DEFAULT_QUERY_LIMIT, LatestQueryParams,
    MAX_QUERY_LIMIT, TelemetryPointDto, TelemetryQueryParams,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use iot_normalize::DeviceResolver;
use iot_storage::{TelemetryQuery, TimeOrder};

/// 外部标识或内部 ID → 内部 ID；未知设备 404。
async fn resolve_device(state: &AppState, raw: String) -> Result<String, Response> {
    let raw = normalize_required(raw, "deviceId")?;
    match state.resolver.resolve(&raw).await {
        Ok(Some(device_id)) => Ok(device_id),
        Ok(None) => Err(not_found_error(format!("unknown device: {raw}"))),
        Err(err) => Err(storage_error(err)),
    }
}

fn parse_order(value: Option<&str>) -> Result<TimeOrder, Response> {
    match value.map(|value| value.trim().to_ascii_lowercase()) {
        None => Ok(TimeOrder::Asc),
        Some(value) if value.is_empty() || value == "asc" => Ok(TimeOrder::Asc),
        Some(value) if value == "desc" => Ok(TimeOrder::Desc),
        Some(_) => Err(bad_request_error("order must be asc|desc")),
    }
}

fn check_range(from: Option<i64>, to: Option<i64>) -> Result<(), Response> {
    if let (Some(from), Some(to)) = (from, to)
        && from > to
    {
        return Err(bad_request_error("from must be <= to"));
    }
    Ok(())
}

pub async fn query_telemetry(
    State(state): State<AppState>,
    Query(query): Query<TelemetryQueryParams>,
) -> Response {
    let device_id = match resolve_device(&state, query.device_id).await {
        Ok(value) => value,
        Err(response) => return response,
    };
    let metric_name = match normalize_optional(query.metric_name, "metricName") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let (from_ms, to_ms) = match (
        parse_time_param(query.from.as_deref(), "from"),
        parse_time_param(query.to.as_deref(), "to"),
    ) {
        (Ok(from), Ok(to)) => (from, to),
        (Err(response), _) | (_, Err(response)) => return response,
    };
    if let Err(response) = check_range(from_ms, to_ms) {
        return response;
    }
    let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    if limit <= 0 || limit > MAX_QUERY_LIMIT {
        return bad_request_error("limit out of range");
    }
    let order = match parse_order(query.order.as_deref()) {
        Ok(order) => order,
        Err(response) => return response,
    };
    match state
        .telemetry_store
        .query(TelemetryQuery {
            device_id,
            metric_name,
            from_ms,
            to_ms,
            order,
            limit,
        })
        .await
    {
        Ok(records) => {
            let data: Vec<TelemetryPointDto> = records.into_iter().map(record_to_dto).collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => storage_error(err),
    }
}

/// 最新值：优先实时缓存，缓存无数据时回落到时序表。
pub async fn latest_telemetry(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<LatestQueryParams>,
) -> Response {
    let device_id = match resolve_device(&state, device_id).await {
        Ok(value) => value,
        Err(response) => return response,
    };
    let metric_name = match normalize_optional(query.metric_name, "metricName") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let mut records = Vec::new();
    if let Some(realtime) = &state.realtime_store {
        match realtime
            .get_last_values(&device_id, metric_name.as_deref())
            .await
        {
            Ok(items) => records = items,
            Err(err) => {
                tracing::warn!(target: "iot.api", error = %err, "realtime_read_failed");
            }
        }
    }
    if records.is_empty() {
        records = match state
            .telemetry_store
            .latest(&device_id, metric_name.as_deref())
            .await
        {
            Ok(items) => items,
            Err(err) => return storage_error(err),
        };
    }
    records.sort_by(|a, b| a.metric_name.cmp(&b.metric_name));
    let data: Vec<TelemetryPointDto> = records.into_iter().map(record_to_dto).collect();
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

pub async fn aggregate_telemetry(
    State(state): State<AppState>,
    Query(query): Query<AggregateQueryParams>,
) -> Response {
    let device_id = match resolve_device(&state, query.device_id).await {
        Ok(value) => value,
        Err(response) => return response,
    };
    let metric_name = match normalize_required(query.metric_name, "metricName") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let (from_ms, to_ms) = match (
        parse_time_param(Some(&query.from), "from"),
        parse_time_param(Some(&query.to), "to"),
    ) {
        (Ok(Some(from)), Ok(Some(to))) => (from, to),
        (Err(response), _) | (_, Err(response)) => return response,
        _ => return bad_request_error("from and to required"),
    };
    if let Err(response) = check_range(Some(from_ms), Some(to_ms)) {
        return response;
    }
    match state
        .telemetry_store
        .aggregate(&device_id, &metric_name, from_ms, to_ms)
        .await
    {
        Ok(record) => {
            let data = record.map(|record| AggregateDto {
                device_id: device_id.clone(),
                metric_name: metric_name.clone(),
                from: from_ms,
                to: to_ms,
                min: record.min,
                max: record.max,
                avg: record.avg,
                sum: record.sum,
                count: record.count,
            });
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => storage_error(err),
    }
}
