//! 接入缓冲区：总线消息处理与定时刷盘任务之间唯一的共享可变状态。

use domain::Measurement;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// 单次追加的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// 因容量上限被淘汰的最旧条目数。
    pub evicted: usize,
    /// 追加后缓冲区长度。
    pub len: usize,
}

/// 有界 FIFO 缓冲区。
///
/// - `append` 不阻塞；满时淘汰最旧条目并计数
/// - 长度达到 `batch_size` 时唤醒刷盘任务
/// - `drain` 在同一把锁内取走全部内容，之后的追加进入下一批
pub struct IngestBuffer {
    items: Mutex<VecDeque<Measurement>>,
    capacity: usize,
    batch_size: usize,
    overflow: AtomicU64,
    appended: AtomicU64,
    size_reached: Notify,
}

impl IngestBuffer {
    pub fn new(capacity: usize, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let capacity = capacity.max(batch_size);
        Self {
            items: Mutex::new(VecDeque::with_capacity(batch_size)),
            capacity,
            batch_size,
            overflow: AtomicU64::new(0),
            appended: AtomicU64::new(0),
            size_reached: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Measurement>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 追加一条读数。
    pub fn append(&self, item: Measurement) -> AppendOutcome {
        self.append_all(std::iter::once(item))
    }

    /// 按顺序追加多条读数（同一把锁内完成）。
    pub fn append_all(&self, items: impl IntoIterator<Item = Measurement>) -> AppendOutcome {
        let mut evicted = 0usize;
        let mut appended = 0u64;
        let len = {
            let mut queue = self.lock();
            for item in items {
                if queue.len() >= self.capacity {
                    queue.pop_front();
                    evicted += 1;
                }
                queue.push_back(item);
                appended += 1;
            }
            queue.len()
        };
        self.appended.fetch_add(appended, Ordering::Relaxed);
        if evicted > 0 {
            self.overflow.fetch_add(evicted as u64, Ordering::Relaxed);
            iot_telemetry::record_buffer_overflow(evicted as u64);
            tracing::warn!(
                target: "iot.pipeline",
                evicted,
                capacity = self.capacity,
                "buffer_overflow"
            );
        }
        if len >= self.batch_size {
            self.size_reached.notify_one();
        }
        AppendOutcome { evicted, len }
    }

    /// 取走当前全部内容。
    pub fn drain(&self) -> Vec<Measurement> {
        let mut queue = self.lock();
        std::mem::take(&mut *queue).into()
    }

    /// 等待长度达到批量阈值。
    pub async fn size_reached(&self) {
        self.size_reached.notified().await;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 累计溢出淘汰条数。
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// 累计追加条数。
    pub fn appended_count(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Decimal, MeasurementDraft};
    use std::sync::Arc;
    use std::time::Duration;

    fn reading(device: &str, ts_ms: i64) -> Measurement {
        Measurement::new(
            MeasurementDraft {
                device_id: device.to_string(),
                metric_name: "power".to_string(),
                value: Decimal::from(ts_ms),
                unit: "W".to_string(),
                ts_ms: Some(ts_ms),
                ..Default::default()
            },
            ts_ms,
        )
        .expect("measurement")
    }

    #[test]
    fn overflow_drops_oldest_and_counts_evictions() {
        let buffer = IngestBuffer::new(3, 2);
        for ts in 1..=5 {
            buffer.append(reading("D1", ts));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.overflow_count(), 2);
        let drained: Vec<i64> = buffer.drain().iter().map(Measurement::ts_ms).collect();
        assert_eq!(drained, vec![3, 4, 5]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn append_all_counts_each_eviction() {
        let buffer = IngestBuffer::new(2, 1);
        let outcome = buffer.append_all((1..=5).map(|ts| reading("D1", ts)));
        assert_eq!(outcome.evicted, 3);
        assert_eq!(outcome.len, 2);
        assert_eq!(buffer.overflow_count(), 3);
        assert_eq!(buffer.appended_count(), 5);
    }

    #[test]
    fn drain_preserves_per_device_order() {
        let buffer = IngestBuffer::new(100, 10);
        for ts in 1..=4 {
            buffer.append(reading("D1", ts));
            buffer.append(reading("D2", ts * 10));
        }
        let drained = buffer.drain();
        let d1: Vec<i64> = drained
            .iter()
            .filter(|item| item.device_id() == "D1")
            .map(Measurement::ts_ms)
            .collect();
        assert_eq!(d1, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn size_threshold_wakes_waiter() {
        let buffer = Arc::new(IngestBuffer::new(10, 2));
        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.size_reached().await })
        };
        tokio::task::yield_now().await;
        buffer.append(reading("D1", 1));
        buffer.append(reading("D1", 2));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("woken")
            .expect("join");
    }

    #[test]
    fn concurrent_appends_and_drains_lose_nothing() {
        let buffer = Arc::new(IngestBuffer::new(100_000, 1_000));
        let producers: Vec<_> = (0..4)
            .map(|worker| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for ts in 1..=2_000 {
                        buffer.append(reading(&format!("D{worker}"), ts));
                    }
                })
            })
            .collect();
        let mut drained = Vec::new();
        for _ in 0..50 {
            drained.extend(buffer.drain());
            std::thread::yield_now();
        }
        for producer in producers {
            producer.join().expect("producer");
        }
        drained.extend(buffer.drain());
        assert_eq!(drained.len(), 8_000);
        for worker in 0..4 {
            let device = format!("D{worker}");
            let series: Vec<i64> = drained
                .iter()
                .filter(|item| item.device_id() == device)
                .map(Measurement::ts_ms)
                .collect();
            assert_eq!(series, (1..=2_000).collect::<Vec<_>>());
        }
    }
}
