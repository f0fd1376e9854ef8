#![allow(dead_code)]

use async_trait::async_trait;
use domain::{Batch, Decimal, Measurement, MeasurementDraft};
use iot_pipeline::{BatchSink, PipelineError, WriteReport};
use iot_storage::{
    AggregateRecord, InMemoryTelemetryStore, LatestRecord, StorageError, TelemetryQuery,
    TelemetryRecord, TelemetryStore,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub fn reading(device: &str, metric: &str, ts_ms: i64) -> Measurement {
    Measurement::new(
        MeasurementDraft {
            device_id: device.to_string(),
            metric_name: metric.to_string(),
            value: Decimal::from(ts_ms),
            unit: "W".to_string(),
            ts_ms: Some(ts_ms),
            ..Default::default()
        },
        ts_ms,
    )
    .expect("measurement")
}

/// 记录每个批次的时间戳序列。
#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<Vec<i64>>>,
}

impl RecordingSink {
    pub fn batches(&self) -> Vec<Vec<i64>> {
        self.batches.lock().expect("lock").clone()
    }
}

#[async_trait]
impl BatchSink for RecordingSink {
    async fn write(&self, batch: &Batch) -> Result<WriteReport, PipelineError> {
        let series = batch.items().iter().map(Measurement::ts_ms).collect();
        self.batches.lock().expect("lock").push(series);
        Ok(WriteReport {
            written: batch.len() as u64,
            ..Default::default()
        })
    }
}

/// 逐行写入的故障模式。
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum RowFault {
    None,
    Hang,
    Transient,
}

/// 前 N 次批量写入返回暂时性错误，其余委托给内存存储。
pub struct FlakyStore {
    pub inner: InMemoryTelemetryStore,
    pub transient_failures: AtomicU32,
    pub batch_calls: AtomicU32,
    pub row_calls: AtomicU32,
    pub hang: bool,
    /// 整批写入一律按约束冲突拒绝。
    pub reject_batches: bool,
    /// 暂时性失败前先把数据写进去（模拟提交后连接超时）。
    pub commit_before_failure: bool,
    pub row_fault: RowFault,
}

impl FlakyStore {
    pub fn new(transient_failures: u32) -> Self {
        Self {
            inner: InMemoryTelemetryStore::new(),
            transient_failures: AtomicU32::new(transient_failures),
            batch_calls: AtomicU32::new(0),
            row_calls: AtomicU32::new(0),
            hang: false,
            reject_batches: false,
            commit_before_failure: false,
            row_fault: RowFault::None,
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(0)
        }
    }

    /// 整批被拒绝，逐行写入按 `row_fault` 出错。
    pub fn rejecting(row_fault: RowFault) -> Self {
        Self {
            reject_batches: true,
            row_fault,
            ..Self::new(0)
        }
    }

    /// 第一次整批写入已提交，但调用方收到暂时性错误。
    pub fn committed_then_failed() -> Self {
        Self {
            commit_before_failure: true,
            ..Self::new(1)
        }
    }

    fn take_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TelemetryStore for FlakyStore {
    async fn insert_batch(&self, items: &[Measurement]) -> Result<u64, StorageError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.reject_batches {
            return Err(StorageError::rejected("check constraint violated"));
        }
        if self.take_failure() {
            if self.commit_before_failure {
                self.inner.insert_batch(items).await?;
            }
            return Err(StorageError::transient("connection reset"));
        }
        self.inner.insert_batch(items).await
    }

    async fn insert_one(&self, item: &Measurement) -> Result<(), StorageError> {
        let calls = self.row_calls.fetch_add(1, Ordering::SeqCst);
        match self.row_fault {
            RowFault::Hang => tokio::time::sleep(Duration::from_secs(3600)).await,
            RowFault::Transient if calls >= 2 => {
                return Err(StorageError::transient("connection reset"));
            }
            _ => {}
        }
        self.inner.insert_one(item).await
    }

    async fn query(&self, query: TelemetryQuery) -> Result<Vec<TelemetryRecord>, StorageError> {
        self.inner.query(query).await
    }

    async fn latest(
        &self,
        device_id: &str,
        metric_name: Option<&str>,
    ) -> Result<Vec<LatestRecord>, StorageError> {
        self.inner.latest(device_id, metric_name).await
    }

    async fn aggregate(
        &self,
        device_id: &str,
        metric_name: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Option<AggregateRecord>, StorageError> {
        self.inner
            .aggregate(device_id, metric_name, from_ms, to_ms)
            .await
    }

    async fn delete_before(&self, cutoff_ms: i64) -> Result<u64, StorageError> {
        self.inner.delete_before(cutoff_ms).await
    }
}
