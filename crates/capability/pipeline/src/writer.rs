//! 批量写入：单条多行 insert，失败时按错误类别重试或逐行回退。

use crate::PipelineError;
use async_trait::async_trait;
use domain::{Batch, Measurement};
use iot_storage::{RealtimeStore, StorageError, TelemetryStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 写入参数。
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// 暂时性错误的最大重试次数（不含首次）。
    pub max_retries: u32,
    pub backoff: Duration,
    pub backoff_max: Duration,
    /// 单次存储调用超时。
    pub write_timeout: Duration,
    /// 逐行回退整体的截止时间。
    pub fallback_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(200),
            backoff_max: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            fallback_timeout: Duration::from_secs(30),
        }
    }
}

impl WriterConfig {
    fn sanitized(mut self) -> Self {
        if self.write_timeout.is_zero() {
            self.write_timeout = Duration::from_secs(1);
        }
        if self.fallback_timeout.is_zero() {
            self.fallback_timeout = self.write_timeout;
        }
        if self.backoff_max < self.backoff {
            self.backoff_max = self.backoff;
        }
        self
    }

    /// 第 `attempt` 次重试前的等待（从 1 开始，指数增长，有上限）。
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// 单行写入失败。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    /// 在批次中的序号。
    pub index: usize,
    pub device_id: String,
    pub metric_name: String,
    pub ts_ms: i64,
    pub reason: String,
}

/// 一个批次的写入结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// 已落库行数（含确认早已存在的行）。
    pub written: u64,
    /// 被存储拒绝的行（约束 / 数据错误）。
    pub failed: Vec<RowFailure>,
    /// 逐行回退中途放弃、未落库的行（存储不可用或超过截止时间）。
    pub lost: Vec<RowFailure>,
    /// 是否走了逐行回退。
    pub fallback: bool,
    pub retries: u32,
    /// 整批写入结果不确定后，逐行回退时发现已存在的行。
    pub recovered: u64,
}

impl WriteReport {
    pub fn failed_count(&self) -> u64 {
        self.failed.len() as u64
    }

    pub fn lost_count(&self) -> u64 {
        self.lost.len() as u64
    }
}

fn row_failure(index: usize, item: &Measurement, reason: &str) -> RowFailure {
    RowFailure {
        index,
        device_id: item.device_id().to_string(),
        metric_name: item.metric_name().to_string(),
        ts_ms: item.ts_ms(),
        reason: reason.to_string(),
    }
}

/// 写入器计数快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStatsSnapshot {
    pub batches_written: u64,
    pub rows_written: u64,
    pub rows_failed: u64,
    pub batches_lost: u64,
    pub rows_lost: u64,
    pub retries: u64,
    pub fallbacks: u64,
}

#[derive(Default)]
struct WriterStats {
    batches_written: AtomicU64,
    rows_written: AtomicU64,
    rows_failed: AtomicU64,
    batches_lost: AtomicU64,
    rows_lost: AtomicU64,
    retries: AtomicU64,
    fallbacks: AtomicU64,
}

impl WriterStats {
    fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            batches_written: self.batches_written.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            batches_lost: self.batches_lost.load(Ordering::Relaxed),
            rows_lost: self.rows_lost.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// 批次写入抽象（刷盘任务与同步提交接口共用）。
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn write(&self, batch: &Batch) -> Result<WriteReport, PipelineError>;
}

/// 基于存储层的批量写入器（telemetry_data + 可选 last_value）。
pub struct BatchWriter {
    store: Arc<dyn TelemetryStore>,
    realtime: Option<Arc<dyn RealtimeStore>>,
    config: WriterConfig,
    stats: WriterStats,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn TelemetryStore>, config: WriterConfig) -> Self {
        Self {
            store,
            realtime: None,
            config: config.sanitized(),
            stats: WriterStats::default(),
        }
    }

    pub fn with_realtime(mut self, realtime: Arc<dyn RealtimeStore>) -> Self {
        self.realtime = Some(realtime);
        self
    }

    pub fn stats(&self) -> WriterStatsSnapshot {
        self.stats.snapshot()
    }

    async fn insert_batch_once(&self, items: &[Measurement]) -> Result<u64, StorageError> {
        match tokio::time::timeout(self.config.write_timeout, self.store.insert_batch(items)).await
        {
            Ok(result) => result,
            Err(_) => Err(StorageError::transient("batch insert timed out")),
        }
    }

    /// 逐行写入，整体受 `fallback_timeout` 约束。
    ///
    /// 遇到暂时性错误或超时即停止，剩余行记入 `lost`；`uncertain` 为真时
    /// （之前的整批写入可能已提交）唯一约束冲突视为该行已落库。
    async fn insert_rows(
        &self,
        items: &[Measurement],
        uncertain: bool,
        report: &mut WriteReport,
    ) {
        let deadline = Instant::now() + self.config.fallback_timeout;
        let mut durable = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.abandon_rows(items, index, "row fallback deadline exceeded", report);
                break;
            }
            let timeout = self.config.write_timeout.min(remaining);
            let err = match tokio::time::timeout(timeout, self.store.insert_one(item)).await {
                Ok(Ok(())) => {
                    report.written += 1;
                    durable.push(item.clone());
                    continue;
                }
                Ok(Err(err)) => err,
                Err(_) => {
                    self.abandon_rows(items, index, "row insert timed out", report);
                    break;
                }
            };
            if uncertain && err.is_unique_violation() {
                report.written += 1;
                report.recovered += 1;
                durable.push(item.clone());
            } else if err.is_transient() {
                self.abandon_rows(items, index, err.message(), report);
                break;
            } else {
                tracing::debug!(
                    target: "iot.pipeline",
                    index,
                    device_id = item.device_id(),
                    metric_name = item.metric_name(),
                    ts_ms = item.ts_ms(),
                    error = %err,
                    "row_rejected"
                );
                report.failed.push(row_failure(index, item, err.message()));
            }
        }
        self.update_realtime(&durable).await;
    }

    fn abandon_rows(
        &self,
        items: &[Measurement],
        from: usize,
        reason: &str,
        report: &mut WriteReport,
    ) {
        let abandoned = &items[from..];
        report.lost.extend(
            abandoned
                .iter()
                .enumerate()
                .map(|(offset, item)| row_failure(from + offset, item, reason)),
        );
        self.stats.batches_lost.fetch_add(1, Ordering::Relaxed);
        self.stats
            .rows_lost
            .fetch_add(abandoned.len() as u64, Ordering::Relaxed);
        iot_telemetry::record_rows_lost(abandoned.len() as u64);
        tracing::error!(
            target: "iot.pipeline",
            from,
            rows = abandoned.len(),
            reason,
            "row_fallback_aborted"
        );
    }

    async fn update_realtime(&self, items: &[Measurement]) {
        let Some(realtime) = &self.realtime else {
            return;
        };
        if items.is_empty() {
            return;
        }
        let result =
            tokio::time::timeout(self.config.write_timeout, realtime.upsert_last_values(items))
                .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(target: "iot.pipeline", error = %err, "realtime_update_failed");
            }
            Err(_) => {
                tracing::warn!(target: "iot.pipeline", "realtime_update_timeout");
            }
        }
    }

    fn record_success(&self, report: &WriteReport, started: Instant, items: &[Measurement]) {
        let failed = report.failed_count();
        self.stats.batches_written.fetch_add(1, Ordering::Relaxed);
        self.stats
            .rows_written
            .fetch_add(report.written, Ordering::Relaxed);
        self.stats.rows_failed.fetch_add(failed, Ordering::Relaxed);
        iot_telemetry::record_batch_flushed(report.written, failed);
        iot_telemetry::record_write_latency_ms(started.elapsed().as_millis() as u64);
        let now = domain::now_epoch_ms();
        if let Some(newest) = items.iter().map(Measurement::ts_ms).max() {
            iot_telemetry::record_end_to_end_latency_ms(now.saturating_sub(newest).max(0) as u64);
        }
    }

    fn record_lost(&self, rows: usize, reason: &str) {
        self.stats.batches_lost.fetch_add(1, Ordering::Relaxed);
        self.stats
            .rows_lost
            .fetch_add(rows as u64, Ordering::Relaxed);
        iot_telemetry::record_batch_lost(rows as u64);
        tracing::error!(target: "iot.pipeline", rows, reason, "batch_lost");
    }
}

#[async_trait]
impl BatchSink for BatchWriter {
    /// 写入一个批次。
    ///
    /// - 整批成功：全部行落库
    /// - 暂时性错误：整批重试，耗尽后记为丢失并返回 `BatchLost`
    /// - 约束 / 数据错误：该批次回退为逐行写入，返回每行失败原因；
    ///   回退中存储不可用或超过截止时间时，剩余行记入 `lost`
    async fn write(&self, batch: &Batch) -> Result<WriteReport, PipelineError> {
        let items = batch.items();
        let mut report = WriteReport::default();
        if items.is_empty() {
            return Ok(report);
        }
        let started = Instant::now();
        let mut attempt = 0u32;
        // 超时等暂时性错误之后，整批可能已经提交
        let mut uncertain = false;
        loop {
            match self.insert_batch_once(items).await {
                Ok(_) => {
                    report.written = items.len() as u64;
                    self.update_realtime(items).await;
                    break;
                }
                Err(err) if err.is_transient() => {
                    uncertain = true;
                    if attempt >= self.config.max_retries {
                        self.record_lost(items.len(), err.message());
                        return Err(PipelineError::BatchLost {
                            rows: items.len(),
                            reason: err.message().to_string(),
                        });
                    }
                    attempt += 1;
                    report.retries += 1;
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    iot_telemetry::record_write_retry();
                    tracing::warn!(
                        target: "iot.pipeline",
                        attempt,
                        rows = items.len(),
                        error = %err,
                        "batch_write_retry"
                    );
                    tokio::time::sleep(self.config.backoff_for(attempt)).await;
                }
                Err(err) => {
                    tracing::warn!(
                        target: "iot.pipeline",
                        rows = items.len(),
                        error = %err,
                        "batch_write_fallback"
                    );
                    report.fallback = true;
                    self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                    self.insert_rows(items, uncertain, &mut report).await;
                    break;
                }
            }
        }
        self.record_success(&report, started, items);
        tracing::debug!(
            target: "iot.pipeline",
            written = report.written,
            failed = report.failed.len(),
            lost = report.lost.len(),
            fallback = report.fallback,
            "batch_written"
        );
        Ok(report)
    }
}
