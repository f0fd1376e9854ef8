//! # IoT Storage 模块
//!
//! 采集链路的存储抽象层：
//!
//! 1. **接口抽象层** (`traits.rs`)：DeviceRegistry / TelemetryStore / RealtimeStore
//! 2. **数据模型层** (`models.rs`)：设备记录、查询条件与结果
//! 3. **错误处理层** (`error.rs`)：StorageError 及其类别（Transient / Rejected / Other）
//! 4. **连接管理层** (`connection.rs`)：PostgreSQL 连接池
//! 5. **实现层**：
//!    - `in_memory/`：内存实现（测试与本地演示）
//!    - `postgres/`：PostgreSQL / TimescaleDB 实现
//!    - `redis.rs`：最新值缓存
//!
//! ## 写入约束
//!
//! - `telemetry_data` 上 (device_id, metric_name, timestamp) 唯一，重试产生的重复行由库拒绝
//! - device_id 外键引用 `device(id)`，未知设备写入被拒绝
//! - 批量写入为单条语句，任一行违反约束则整批回滚，由上层决定逐行回退

pub mod connection;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod redis;
pub mod traits;

pub use connection::*;
pub use error::*;
pub use models::*;
pub use redis::RedisRealtimeStore;
pub use traits::*;

pub use in_memory::{InMemoryDeviceRegistry, InMemoryRealtimeStore, InMemoryTelemetryStore};

pub use postgres::{PgDeviceRegistry, PgTelemetryStore, ensure_telemetry_schema};
