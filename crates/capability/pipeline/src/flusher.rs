//! 刷盘调度：定时 / 达到批量阈值时取走缓冲区并按批写入；关停时做一次有界的最终刷盘。

use crate::buffer::{AppendOutcome, IngestBuffer};
use crate::shutdown::ShutdownSignal;
use crate::writer::{BatchSink, WriteReport};
use crate::{PipelineConfig, PipelineError};
use domain::{Batch, Measurement};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// 一次刷盘的汇总。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub batches: u64,
    pub written: u64,
    pub failed: u64,
    pub lost: u64,
}

impl FlushSummary {
    /// 合并两次刷盘的汇总。
    pub fn merge(self, other: FlushSummary) -> FlushSummary {
        FlushSummary {
            batches: self.batches + other.batches,
            written: self.written + other.written,
            failed: self.failed + other.failed,
            lost: self.lost + other.lost,
        }
    }
}

/// 刷盘进度，逐批更新；刷盘被截止时间打断时据此计算已落定与丢失的行。
#[derive(Default)]
struct FlushProgress {
    drained: AtomicU64,
    settled: AtomicU64,
    batches: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    lost: AtomicU64,
}

impl FlushProgress {
    fn record(&self, rows: u64, outcome: &Result<WriteReport, PipelineError>) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(report) => {
                self.written.fetch_add(report.written, Ordering::Relaxed);
                self.failed
                    .fetch_add(report.failed_count(), Ordering::Relaxed);
                self.lost.fetch_add(report.lost_count(), Ordering::Relaxed);
            }
            Err(_) => {
                self.lost.fetch_add(rows, Ordering::Relaxed);
            }
        }
        self.settled.fetch_add(rows, Ordering::Relaxed);
    }

    fn summary(&self) -> FlushSummary {
        FlushSummary {
            batches: self.batches.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }

    /// 已取出但尚未写完的行数。
    fn unsettled(&self) -> u64 {
        self.drained
            .load(Ordering::Relaxed)
            .saturating_sub(self.settled.load(Ordering::Relaxed))
    }
}

struct PipelineInner {
    buffer: Arc<IngestBuffer>,
    sink: Arc<dyn BatchSink>,
    config: PipelineConfig,
    flush_lock: Mutex<()>,
}

/// 采集管线：缓冲区 + 刷盘调度 + 批量写入。
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn new(sink: Arc<dyn BatchSink>) -> Self {
        Self::with_config(sink, PipelineConfig::default())
    }

    pub fn with_config(sink: Arc<dyn BatchSink>, config: PipelineConfig) -> Self {
        let config = config.sanitized();
        let buffer = Arc::new(IngestBuffer::new(
            config.buffer_capacity,
            config.buffer_batch_size,
        ));
        let inner = PipelineInner {
            buffer,
            sink,
            config,
            flush_lock: Mutex::new(()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn buffer(&self) -> Arc<IngestBuffer> {
        self.inner.buffer.clone()
    }

    /// 追加到缓冲区（不阻塞）。
    pub fn append(&self, item: Measurement) -> AppendOutcome {
        self.inner.buffer.append(item)
    }

    pub fn append_all(&self, items: impl IntoIterator<Item = Measurement>) -> AppendOutcome {
        self.inner.buffer.append_all(items)
    }

    /// 绕过缓冲区直接写入一个批次（同步提交接口）。
    pub async fn write_now(&self, items: Vec<Measurement>) -> Result<WriteReport, PipelineError> {
        let batch = Batch::new(items)?;
        self.inner.sink.write(&batch).await
    }

    /// 立即刷盘一次。
    pub async fn flush(&self) -> FlushSummary {
        self.flush_tracked(&FlushProgress::default()).await
    }

    async fn flush_tracked(&self, progress: &FlushProgress) -> FlushSummary {
        // 串行化刷盘，保证同一设备的先后批次按顺序写入
        let _guard = self.inner.flush_lock.lock().await;
        let items = self.inner.buffer.drain();
        if items.is_empty() {
            return FlushSummary::default();
        }
        let drained = items.len();
        progress
            .drained
            .fetch_add(drained as u64, Ordering::Relaxed);
        for batch in Batch::split(items, self.inner.config.max_batch_size) {
            let rows = batch.len() as u64;
            let outcome = self.inner.sink.write(&batch).await;
            if let Err(err) = &outcome
                && !matches!(err, PipelineError::BatchLost { .. })
            {
                tracing::error!(target: "iot.pipeline", error = %err, rows, "flush_batch_failed");
                iot_telemetry::record_rows_lost(rows);
            }
            progress.record(rows, &outcome);
        }
        let summary = progress.summary();
        tracing::info!(
            target: "iot.pipeline",
            drained,
            batches = summary.batches,
            written = summary.written,
            failed = summary.failed,
            lost = summary.lost,
            "pipeline_flushed"
        );
        summary
    }

    /// 截止时间到仍未写完：已取出未落定的行记为丢失。
    fn abandon(&self, progress: &FlushProgress) -> FlushSummary {
        let abandoned = progress.unsettled();
        iot_telemetry::record_rows_lost(abandoned);
        tracing::error!(
            target: "iot.pipeline",
            abandoned,
            timeout_ms = self.inner.config.shutdown_timeout.as_millis() as u64,
            "shutdown_drain_timeout"
        );
        let mut summary = progress.summary();
        summary.lost += abandoned;
        summary
    }

    /// 最终刷盘，在 `deadline` 前完成；之后仍留在缓冲区的行一并记为丢失。
    async fn drain_until(&self, deadline: Instant) -> FlushSummary {
        let progress = FlushProgress::default();
        let mut summary =
            match tokio::time::timeout_at(deadline, self.flush_tracked(&progress)).await {
                Ok(summary) => summary,
                Err(_) => self.abandon(&progress),
            };
        summary.lost += self.discard_stranded();
        summary
    }

    fn discard_stranded(&self) -> u64 {
        let stranded = self.inner.buffer.drain().len() as u64;
        if stranded > 0 {
            iot_telemetry::record_rows_lost(stranded);
            tracing::error!(target: "iot.pipeline", stranded, "buffer_stranded_after_drain");
        }
        stranded
    }

    /// 关停时的最终刷盘，受 `shutdown_timeout` 约束；超时未写完的行记为丢失。
    pub async fn drain_with_timeout(&self) -> FlushSummary {
        self.drain_until(Instant::now() + self.inner.config.shutdown_timeout)
            .await
    }

    /// 启动刷盘任务；`stop` 触发后执行最终刷盘并返回关停路径上的汇总。
    ///
    /// 触发时若有刷盘正在进行，它与最终刷盘共用同一个 `shutdown_timeout` 截止时间。
    pub fn spawn_flusher(&self, mut stop: ShutdownSignal) -> JoinHandle<FlushSummary> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let buffer = pipeline.buffer();
            let config = pipeline.config().clone();
            let mut ticker = tokio::time::interval(config.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            tracing::info!(
                target: "iot.pipeline",
                flush_interval_ms = config.flush_interval.as_millis() as u64,
                batch_size = config.buffer_batch_size,
                capacity = config.buffer_capacity,
                "flusher_started"
            );
            let summary = loop {
                tokio::select! {
                    biased;
                    _ = stop.wait() => {
                        break pipeline.drain_with_timeout().await;
                    }
                    _ = ticker.tick() => {}
                    _ = buffer.size_reached() => ticker.reset(),
                }
                let progress = FlushProgress::default();
                let flush = pipeline.flush_tracked(&progress);
                tokio::pin!(flush);
                tokio::select! {
                    biased;
                    _ = &mut flush => continue,
                    _ = stop.wait() => {}
                }
                let deadline = Instant::now() + config.shutdown_timeout;
                let in_flight = match tokio::time::timeout_at(deadline, &mut flush).await {
                    Ok(summary) => summary,
                    Err(_) => {
                        let summary = pipeline.abandon(&progress);
                        break summary.merge(FlushSummary {
                            lost: pipeline.discard_stranded(),
                            ..Default::default()
                        });
                    }
                };
                break in_flight.merge(pipeline.drain_until(deadline).await);
            };
            tracing::info!(
                target: "iot.pipeline",
                written = summary.written,
                lost = summary.lost,
                "flusher_stopped"
            );
            summary
        })
    }
}
