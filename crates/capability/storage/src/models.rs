//! 数据模型
//!
//! - 设备模型：DeviceRecord（注册表查询输入）
//! - 时序查询：TelemetryQuery、TelemetryRecord、AggregateRecord
//! - 实时模型：LatestRecord

use rust_decimal::Decimal;

/// 设备记录。
///
/// `device_id` 为内部标识（时序表外键），`external_id` 为设备上报使用的序列号 / MAC。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_id: String,
    pub external_id: String,
    pub gateway_id: Option<String>,
    pub name: String,
}

/// 时间排序方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeOrder {
    #[default]
    Asc,
    Desc,
}

/// 时序查询条件。
#[derive(Debug, Clone)]
pub struct TelemetryQuery {
    pub device_id: String,
    pub metric_name: Option<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub order: TimeOrder,
    pub limit: i64,
}

/// 时序记录（查询输出）。
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub metric_name: String,
    pub value: Decimal,
    pub unit: String,
    pub quality: i32,
    pub ts_ms: i64,
}

/// 最新值记录。
pub type LatestRecord = TelemetryRecord;

/// 聚合结果。
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRecord {
    pub min: Decimal,
    pub max: Decimal,
    pub avg: Decimal,
    pub sum: Decimal,
    pub count: i64,
}
