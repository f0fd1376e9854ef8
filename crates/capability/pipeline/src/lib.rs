//! 采集管线：接入缓冲区、刷盘调度、批量写入与数据保留。

pub mod buffer;
pub mod flusher;
pub mod retention;
pub mod shutdown;
pub mod writer;

pub use buffer::{AppendOutcome, IngestBuffer};
pub use flusher::{FlushSummary, Pipeline};
pub use retention::{RetentionConfig, retention_cutoff_ms, run_retention_once, spawn_retention};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use writer::{
    BatchSink, BatchWriter, RowFailure, WriteReport, WriterConfig, WriterStatsSnapshot,
};

use domain::{BatchError, MAX_BATCH_SIZE};
use std::time::Duration;

/// Pipeline 处理错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("batch lost after retries ({rows} rows): {reason}")]
    BatchLost { rows: usize, reason: String },
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// 缓冲与刷盘参数。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 达到该长度立即刷盘。
    pub buffer_batch_size: usize,
    /// 缓冲区硬上限，超出时淘汰最旧条目。
    pub buffer_capacity: usize,
    pub flush_interval: Duration,
    /// 单批写入上限（不超过 1000）。
    pub max_batch_size: usize,
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_batch_size: 100,
            buffer_capacity: 10_000,
            flush_interval: Duration::from_secs(5),
            max_batch_size: MAX_BATCH_SIZE,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl PipelineConfig {
    fn sanitized(mut self) -> Self {
        if self.buffer_batch_size == 0 {
            self.buffer_batch_size = 1;
        }
        if self.buffer_capacity < self.buffer_batch_size {
            self.buffer_capacity = self.buffer_batch_size;
        }
        self.max_batch_size = self.max_batch_size.clamp(1, MAX_BATCH_SIZE);
        if self.flush_interval.is_zero() {
            self.flush_interval = Duration::from_millis(1);
        }
        self
    }
}
