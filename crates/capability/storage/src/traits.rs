//! 存储接口 Trait 定义
//!
//! - DeviceRegistry：外部标识 → 内部设备 ID（只读）
//! - TelemetryStore：时序写入 / 查询 / 清理
//! - RealtimeStore：每个 (设备, 指标) 的最新值
//!
//! 所有接口返回 StorageError，使用 async_trait 支持动态分发。

use crate::error::StorageError;
use crate::models::{AggregateRecord, LatestRecord, TelemetryQuery, TelemetryRecord};
use async_trait::async_trait;
use domain::Measurement;

/// 设备注册表查询接口
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// 解析外部标识；先匹配序列号，再匹配内部 ID。未找到返回 `None`。
    async fn resolve(&self, external_id: &str) -> Result<Option<String>, StorageError>;
}

/// 时序存储接口
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// 一条语句批量写入；任一行失败则整批不落库。
    async fn insert_batch(&self, items: &[Measurement]) -> Result<u64, StorageError>;

    /// 单行写入（批量失败后的逐行回退）。
    async fn insert_one(&self, item: &Measurement) -> Result<(), StorageError>;

    /// 按时间范围查询。
    async fn query(&self, query: TelemetryQuery) -> Result<Vec<TelemetryRecord>, StorageError>;

    /// 每个指标的最新一条。
    async fn latest(
        &self,
        device_id: &str,
        metric_name: Option<&str>,
    ) -> Result<Vec<LatestRecord>, StorageError>;

    /// 时间窗口内聚合；无数据返回 `None`。
    async fn aggregate(
        &self,
        device_id: &str,
        metric_name: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Option<AggregateRecord>, StorageError>;

    /// 删除早于 `cutoff_ms` 的数据，返回删除行数。
    async fn delete_before(&self, cutoff_ms: i64) -> Result<u64, StorageError>;
}

/// 实时数据存储接口
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// 更新最新值（同一 (设备, 指标) 只保留时间戳最大的一条）。
    async fn upsert_last_values(&self, items: &[Measurement]) -> Result<(), StorageError>;

    /// 查询设备最新值。
    async fn get_last_values(
        &self,
        device_id: &str,
        metric_name: Option<&str>,
    ) -> Result<Vec<LatestRecord>, StorageError>;
}
