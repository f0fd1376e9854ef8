//! 内存存储实现模块
//!
//! 用于本地演示和测试（未配置数据库 / Redis 时亦可运行）。
//!
//! - DeviceRegistry: InMemoryDeviceRegistry
//! - TelemetryStore: InMemoryTelemetryStore（含唯一约束与外键校验）
//! - RealtimeStore: InMemoryRealtimeStore

pub mod device;
pub mod measurement;
pub mod realtime;

pub use device::*;
pub use measurement::*;
pub use realtime::*;
