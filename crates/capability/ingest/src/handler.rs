//! 消息处理：规范化后追加到接入缓冲区。

use crate::{IngestError, RawEventHandler};
use async_trait::async_trait;
use domain::RawEvent;
use iot_normalize::{NormalizeError, Normalizer};
use iot_pipeline::Pipeline;
use std::sync::atomic::{AtomicU64, Ordering};

/// 处理计数快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStatsSnapshot {
    pub buffered: u64,
    pub dropped_malformed: u64,
    pub dropped_unknown_device: u64,
    pub dropped_invalid: u64,
    pub registry_errors: u64,
}

#[derive(Default)]
struct HandlerStats {
    buffered: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_unknown_device: AtomicU64,
    dropped_invalid: AtomicU64,
    registry_errors: AtomicU64,
}

/// 总线消息 → Measurement → 缓冲区。只做入队，不等待写库。
pub struct BufferingHandler {
    normalizer: Normalizer,
    pipeline: Pipeline,
    stats: HandlerStats,
}

impl BufferingHandler {
    pub fn new(normalizer: Normalizer, pipeline: Pipeline) -> Self {
        Self {
            normalizer,
            pipeline,
            stats: HandlerStats::default(),
        }
    }

    pub fn stats(&self) -> HandlerStatsSnapshot {
        HandlerStatsSnapshot {
            buffered: self.stats.buffered.load(Ordering::Relaxed),
            dropped_malformed: self.stats.dropped_malformed.load(Ordering::Relaxed),
            dropped_unknown_device: self.stats.dropped_unknown_device.load(Ordering::Relaxed),
            dropped_invalid: self.stats.dropped_invalid.load(Ordering::Relaxed),
            registry_errors: self.stats.registry_errors.load(Ordering::Relaxed),
        }
    }

    fn count_drop(&self, err: &NormalizeError) {
        match err {
            NormalizeError::Malformed(_) => {
                self.stats.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                iot_telemetry::record_dropped_malformed();
            }
            NormalizeError::MissingDevice | NormalizeError::UnknownDevice(_) => {
                self.stats
                    .dropped_unknown_device
                    .fetch_add(1, Ordering::Relaxed);
                iot_telemetry::record_dropped_unknown_device();
            }
            NormalizeError::Registry(_) => {
                self.stats.registry_errors.fetch_add(1, Ordering::Relaxed);
                iot_telemetry::record_registry_error();
            }
        }
    }
}

#[async_trait]
impl RawEventHandler for BufferingHandler {
    async fn handle(&self, event: RawEvent) -> Result<(), IngestError> {
        let topic = event.topic.clone();
        let normalized = match self.normalizer.normalize(event).await {
            Ok(normalized) => normalized,
            Err(err) => {
                self.count_drop(&err);
                return Err(IngestError::Handler(format!("{topic}: {err}")));
            }
        };
        if !normalized.rejected.is_empty() {
            let rejected = normalized.rejected.len() as u64;
            self.stats
                .dropped_invalid
                .fetch_add(rejected, Ordering::Relaxed);
            iot_telemetry::record_dropped_invalid(rejected);
            tracing::debug!(
                target: "iot.ingest",
                topic = %topic,
                device_id = %normalized.device_id,
                rejected,
                "readings_dropped"
            );
        }
        let count = normalized.measurements.len() as u64;
        if count == 0 {
            return Ok(());
        }
        iot_telemetry::record_decoded_measurements(count);
        self.stats.buffered.fetch_add(count, Ordering::Relaxed);
        self.pipeline.append_all(normalized.measurements);
        Ok(())
    }
}
