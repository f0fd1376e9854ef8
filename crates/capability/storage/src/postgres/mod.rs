//! # PostgreSQL / TimescaleDB 存储实现
//!
//! - **DeviceRegistry** (`device.rs`)：读取关系库 `device` 表解析设备身份
//! - **TelemetryStore** (`measurement.rs`)：`telemetry_data` hypertable 批量写入与查询
//! - **schema** (`schema.rs`)：启动时建表 / 建唯一索引 / 转换 hypertable
//!
//! 所有 SQL 使用参数绑定；批量写入使用 `QueryBuilder::push_values` 生成单条多行 insert。

pub mod device;
pub mod measurement;
pub mod schema;

pub use device::*;
pub use measurement::*;
pub use schema::*;
