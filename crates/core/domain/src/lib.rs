pub mod batch;
pub mod data;

pub use batch::{Batch, BatchError, MAX_BATCH_SIZE};
pub use data::{
    DEFAULT_QUALITY, Measurement, MeasurementDraft, MeasurementError, Metadata, MetadataValue,
    RawEvent,
};
pub use rust_decimal::Decimal;

/// 当前 Unix 时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
