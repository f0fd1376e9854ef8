//! 稳定的 DTO 与 API 响应契约。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 同步提交接口单次最多条数。
pub const MAX_SUBMIT_ROWS: usize = 1000;
/// 查询默认 / 最大返回条数。
pub const DEFAULT_QUERY_LIMIT: i64 = 1000;
pub const MAX_QUERY_LIMIT: i64 = 10_000;

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 健康检查。
#[derive(Debug, Serialize)]
pub struct HealthDto {
    pub ok: bool,
}

/// 批量提交请求体。各行先按原始 JSON 接收，逐行解析，单行类型错误不影响其余行。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBatchRequest {
    #[serde(default)]
    pub readings: Vec<Value>,
}

/// 单条读数。字段均按原始 JSON 值接收，缺失与类型错误在行级报告。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRowRequest {
    #[serde(alias = "device_id", alias = "serialNumber", alias = "serial_number")]
    pub device_id: Option<Value>,
    #[serde(alias = "metric_name", alias = "sensorType", alias = "sensor_type")]
    pub metric_name: Option<Value>,
    /// 数字或数字字符串。
    pub value: Option<Value>,
    pub unit: Option<Value>,
    /// RFC 3339 字符串或 Unix 秒 / 毫秒。
    #[serde(alias = "ts", alias = "tsMs", alias = "ts_ms")]
    pub timestamp: Option<Value>,
    /// 0..=100 的整数。
    pub quality: Option<Value>,
    pub metadata: Option<Value>,
}

impl TelemetryRowRequest {
    /// 解析一行；行不是 JSON 对象（或同一字段重复出现）时返回原因。
    pub fn from_value(value: Value) -> Result<Self, String> {
        if !value.is_object() {
            return Err("reading must be a JSON object".to_string());
        }
        serde_json::from_value(value).map_err(|err| err.to_string())
    }
}

/// 行级错误。
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RowErrorDto {
    pub index: usize,
    pub reason: String,
}

/// 批量提交结果。
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResultDto {
    pub accepted: u64,
    pub rejected: u64,
    pub errors: Vec<RowErrorDto>,
}

/// 时序查询参数。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryQueryParams {
    #[serde(alias = "device_id")]
    pub device_id: String,
    #[serde(alias = "metric_name")]
    pub metric_name: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// `asc`（默认）或 `desc`。
    pub order: Option<String>,
    pub limit: Option<i64>,
}

/// 最新值查询参数。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestQueryParams {
    #[serde(alias = "metric_name")]
    pub metric_name: Option<String>,
}

/// 聚合查询参数。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateQueryParams {
    #[serde(alias = "device_id")]
    pub device_id: String,
    #[serde(alias = "metric_name")]
    pub metric_name: String,
    pub from: String,
    pub to: String,
}

/// 单条时序数据。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPointDto {
    pub device_id: String,
    pub metric_name: String,
    pub value: Decimal,
    pub unit: String,
    pub quality: i32,
    /// Unix 毫秒。
    pub timestamp: i64,
}

/// 聚合结果。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateDto {
    pub device_id: String,
    pub metric_name: String,
    pub from: i64,
    pub to: i64,
    pub min: Decimal,
    pub max: Decimal,
    pub avg: Decimal,
    pub sum: Decimal,
    pub count: i64,
}

/// 缓冲区状态。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferDto {
    pub len: usize,
    pub capacity: usize,
    pub batch_size: usize,
}

/// 采集链路计数。
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsDto {
    pub raw_events: u64,
    pub decoded_measurements: u64,
    pub dropped_malformed: u64,
    pub dropped_unknown_device: u64,
    pub dropped_invalid: u64,
    pub status_messages: u64,
    pub registry_errors: u64,
    pub buffer_overflow: u64,
    pub batches_flushed: u64,
    pub rows_written: u64,
    pub rows_failed: u64,
    pub batches_lost: u64,
    pub rows_lost: u64,
    pub write_retries: u64,
    pub bus_reconnects: u64,
    pub avg_write_latency_ms: f64,
    pub avg_end_to_end_latency_ms: f64,
    pub subscriber_state: Option<String>,
    pub buffer: Option<BufferDto>,
}
