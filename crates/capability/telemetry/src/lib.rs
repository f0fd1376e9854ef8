//! 追踪、请求 ID 与采集链路计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub raw_events: u64,
    pub decoded_measurements: u64,
    pub dropped_malformed: u64,
    pub dropped_unknown_device: u64,
    pub dropped_invalid: u64,
    pub status_messages: u64,
    pub registry_errors: u64,
    pub buffer_overflow: u64,
    pub batches_flushed: u64,
    pub rows_written: u64,
    pub rows_failed: u64,
    pub batches_lost: u64,
    pub rows_lost: u64,
    pub write_retries: u64,
    pub bus_reconnects: u64,
    pub write_latency_ms_total: u64,
    pub write_latency_ms_count: u64,
    pub end_to_end_latency_ms_total: u64,
    pub end_to_end_latency_ms_count: u64,
}

/// 进程级计数器。
pub struct TelemetryMetrics {
    raw_events: AtomicU64,
    decoded_measurements: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_unknown_device: AtomicU64,
    dropped_invalid: AtomicU64,
    status_messages: AtomicU64,
    registry_errors: AtomicU64,
    buffer_overflow: AtomicU64,
    batches_flushed: AtomicU64,
    rows_written: AtomicU64,
    rows_failed: AtomicU64,
    batches_lost: AtomicU64,
    rows_lost: AtomicU64,
    write_retries: AtomicU64,
    bus_reconnects: AtomicU64,
    write_latency_ms_total: AtomicU64,
    write_latency_ms_count: AtomicU64,
    end_to_end_latency_ms_total: AtomicU64,
    end_to_end_latency_ms_count: AtomicU64,
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            raw_events: AtomicU64::new(0),
            decoded_measurements: AtomicU64::new(0),
            dropped_malformed: AtomicU64::new(0),
            dropped_unknown_device: AtomicU64::new(0),
            dropped_invalid: AtomicU64::new(0),
            status_messages: AtomicU64::new(0),
            registry_errors: AtomicU64::new(0),
            buffer_overflow: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            rows_failed: AtomicU64::new(0),
            batches_lost: AtomicU64::new(0),
            rows_lost: AtomicU64::new(0),
            write_retries: AtomicU64::new(0),
            bus_reconnects: AtomicU64::new(0),
            write_latency_ms_total: AtomicU64::new(0),
            write_latency_ms_count: AtomicU64::new(0),
            end_to_end_latency_ms_total: AtomicU64::new(0),
            end_to_end_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            raw_events: self.raw_events.load(Ordering::Relaxed),
            decoded_measurements: self.decoded_measurements.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_unknown_device: self.dropped_unknown_device.load(Ordering::Relaxed),
            dropped_invalid: self.dropped_invalid.load(Ordering::Relaxed),
            status_messages: self.status_messages.load(Ordering::Relaxed),
            registry_errors: self.registry_errors.load(Ordering::Relaxed),
            buffer_overflow: self.buffer_overflow.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            batches_lost: self.batches_lost.load(Ordering::Relaxed),
            rows_lost: self.rows_lost.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            bus_reconnects: self.bus_reconnects.load(Ordering::Relaxed),
            write_latency_ms_total: self.write_latency_ms_total.load(Ordering::Relaxed),
            write_latency_ms_count: self.write_latency_ms_count.load(Ordering::Relaxed),
            end_to_end_latency_ms_total: self.end_to_end_latency_ms_total.load(Ordering::Relaxed),
            end_to_end_latency_ms_count: self.end_to_end_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录总线消息接收次数。
pub fn record_raw_event() {
    metrics().raw_events.fetch_add(1, Ordering::Relaxed);
}

/// 记录解码成功的读数条数。
pub fn record_decoded_measurements(count: u64) {
    metrics()
        .decoded_measurements
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录报文格式错误丢弃次数。
pub fn record_dropped_malformed() {
    metrics().dropped_malformed.fetch_add(1, Ordering::Relaxed);
}

/// 记录未知设备丢弃次数（按消息计）。
pub fn record_dropped_unknown_device() {
    metrics()
        .dropped_unknown_device
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录非法读数丢弃条数。
pub fn record_dropped_invalid(count: u64) {
    metrics().dropped_invalid.fetch_add(count, Ordering::Relaxed);
}

/// 记录状态消息次数。
pub fn record_status_message() {
    metrics().status_messages.fetch_add(1, Ordering::Relaxed);
}

/// 记录设备注册表查询失败次数。
pub fn record_registry_error() {
    metrics().registry_errors.fetch_add(1, Ordering::Relaxed);
}

/// 记录缓冲区溢出淘汰条数。
pub fn record_buffer_overflow(evicted: u64) {
    metrics()
        .buffer_overflow
        .fetch_add(evicted, Ordering::Relaxed);
}

/// 记录一次批次写入结果。
pub fn record_batch_flushed(written: u64, failed: u64) {
    let metrics = metrics();
    metrics.batches_flushed.fetch_add(1, Ordering::Relaxed);
    metrics.rows_written.fetch_add(written, Ordering::Relaxed);
    metrics.rows_failed.fetch_add(failed, Ordering::Relaxed);
}

/// 记录一次批次丢失（重试耗尽）。
pub fn record_batch_lost(rows: u64) {
    metrics().batches_lost.fetch_add(1, Ordering::Relaxed);
    record_rows_lost(rows);
}

/// 记录丢失行数（批次丢失或关停超时）。
pub fn record_rows_lost(rows: u64) {
    metrics().rows_lost.fetch_add(rows, Ordering::Relaxed);
}

/// 记录写入重试次数。
pub fn record_write_retry() {
    metrics().write_retries.fetch_add(1, Ordering::Relaxed);
}

/// 记录总线重连次数。
pub fn record_bus_reconnect() {
    metrics().bus_reconnects.fetch_add(1, Ordering::Relaxed);
}

/// 记录写入延迟（毫秒）。
pub fn record_write_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .write_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .write_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录端到端延迟（毫秒，接收到落库）。
pub fn record_end_to_end_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .end_to_end_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .end_to_end_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}
