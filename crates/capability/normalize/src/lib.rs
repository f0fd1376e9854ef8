//! 报文解码与设备身份解析：RawEvent → 已绑定内部设备 ID 的 Measurement 列表。

pub mod payload;
pub mod resolver;

pub use payload::{
    DecodedMessage, DecodedReading, PayloadError, decode_payload, parse_decimal,
    parse_timestamp_ms, scalar,
};
pub use resolver::{CachedDeviceResolver, DeviceResolver, RegistryResolver, ResolverCacheConfig};

use domain::{Measurement, MeasurementDraft, MetadataValue, RawEvent};
use std::sync::Arc;

/// 规范化错误（整条消息丢弃）。
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] PayloadError),
    #[error("device identity missing")]
    MissingDevice,
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("registry error: {0}")]
    Registry(String),
}

/// 被丢弃的单条读数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedReading {
    pub index: usize,
    pub reason: String,
}

/// 一条消息的规范化结果。
#[derive(Debug, Clone)]
pub struct Normalized {
    pub device_id: String,
    pub measurements: Vec<Measurement>,
    pub rejected: Vec<RejectedReading>,
}

/// RawEvent → Measurement。
#[derive(Clone)]
pub struct Normalizer {
    resolver: Arc<dyn DeviceResolver>,
}

impl Normalizer {
    pub fn new(resolver: Arc<dyn DeviceResolver>) -> Self {
        Self { resolver }
    }

    /// 解码并绑定设备。
    ///
    /// - topic 中的设备标识优先于报文中的标识
    /// - 单条读数校验失败只丢弃该条
    pub async fn normalize(&self, event: RawEvent) -> Result<Normalized, NormalizeError> {
        let decoded = decode_payload(&event.payload)?;
        let external_id = event
            .device_hint
            .clone()
            .or(decoded.device_ref)
            .ok_or(NormalizeError::MissingDevice)?;
        let device_id = self
            .resolver
            .resolve(&external_id)
            .await
            .map_err(|err| NormalizeError::Registry(err.to_string()))?
            .ok_or_else(|| NormalizeError::UnknownDevice(external_id.clone()))?;

        let mut rejected: Vec<RejectedReading> = decoded
            .invalid
            .into_iter()
            .map(|(index, reason)| RejectedReading { index, reason })
            .collect();
        let mut measurements = Vec::with_capacity(decoded.readings.len());
        for reading in decoded.readings {
            let reading_index = reading.index;
            let mut metadata = reading.metadata;
            metadata.insert(
                "topic".to_string(),
                MetadataValue::String(event.topic.clone()),
            );
            if let Some(gateway_id) = &event.gateway_id {
                metadata.insert(
                    "gateway_id".to_string(),
                    MetadataValue::String(gateway_id.clone()),
                );
            }
            let draft = MeasurementDraft {
                device_id: device_id.clone(),
                metric_name: reading.metric_name,
                value: reading.value,
                unit: reading.unit,
                quality: reading.quality,
                ts_ms: reading.ts_ms,
                metadata,
            };
            match Measurement::new(draft, event.received_at_ms) {
                Ok(measurement) => measurements.push(measurement),
                Err(err) => rejected.push(RejectedReading {
                    index: reading_index,
                    reason: err.to_string(),
                }),
            }
        }
        rejected.sort_by_key(|item| item.index);
        Ok(Normalized {
            device_id,
            measurements,
            rejected,
        })
    }
}
