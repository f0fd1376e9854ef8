//! 时序存储内存实现
//!
//! 模拟数据库约束：(device_id, metric_name, ts) 唯一；可选的设备外键校验。
//! 批量写入要么全部成功，要么全部不落库。

use crate::error::StorageError;
use crate::in_memory::InMemoryDeviceRegistry;
use crate::models::{AggregateRecord, LatestRecord, TelemetryQuery, TelemetryRecord, TimeOrder};
use crate::traits::TelemetryStore;
use domain::Measurement;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

type RowKey = (String, String, i64);

fn row_key(item: &Measurement) -> RowKey {
    (
        item.device_id().to_string(),
        item.metric_name().to_string(),
        item.ts_ms(),
    )
}

fn to_record(item: &Measurement) -> TelemetryRecord {
    TelemetryRecord {
        device_id: item.device_id().to_string(),
        metric_name: item.metric_name().to_string(),
        value: item.value(),
        unit: item.unit().to_string(),
        quality: i32::from(item.quality()),
        ts_ms: item.ts_ms(),
    }
}

#[derive(Default)]
struct Rows {
    items: Vec<Measurement>,
    keys: HashSet<RowKey>,
}

/// 时序内存存储
#[derive(Default)]
pub struct InMemoryTelemetryStore {
    rows: RwLock<Rows>,
    devices: Option<Arc<InMemoryDeviceRegistry>>,
}

impl InMemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启用外键校验：写入的 device_id 必须在注册表中存在。
    pub fn with_registry(devices: Arc<InMemoryDeviceRegistry>) -> Self {
        Self {
            rows: RwLock::new(Rows::default()),
            devices: Some(devices),
        }
    }

    /// 当前累计行数（用于测试）
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 全部行（按写入顺序，用于测试）
    pub fn snapshot(&self) -> Vec<Measurement> {
        self.rows
            .read()
            .map(|rows| rows.items.clone())
            .unwrap_or_default()
    }

    fn check(&self, item: &Measurement, keys: &[&HashSet<RowKey>]) -> Result<(), StorageError> {
        if let Some(devices) = &self.devices
            && !devices.contains(item.device_id())
        {
            return Err(StorageError::rejected(format!(
                "foreign key violation: device {} not found",
                item.device_id()
            )));
        }
        let key = row_key(item);
        if keys.iter().any(|keys| keys.contains(&key)) {
            return Err(StorageError::duplicate(format!(
                "duplicate key: ({}, {}, {})",
                item.device_id(),
                item.metric_name(),
                item.ts_ms()
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TelemetryStore for InMemoryTelemetryStore {
    async fn insert_batch(&self, items: &[Measurement]) -> Result<u64, StorageError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut pending = HashSet::with_capacity(items.len());
        for item in items {
            self.check(item, &[&rows.keys, &pending])?;
            pending.insert(row_key(item));
        }
        rows.keys.extend(pending);
        rows.items.extend(items.iter().cloned());
        Ok(items.len() as u64)
    }

    async fn insert_one(&self, item: &Measurement) -> Result<(), StorageError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        self.check(item, &[&rows.keys])?;
        rows.keys.insert(row_key(item));
        rows.items.push(item.clone());
        Ok(())
    }

    async fn query(&self, query: TelemetryQuery) -> Result<Vec<TelemetryRecord>, StorageError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut selected: Vec<&Measurement> = rows
            .items
            .iter()
            .filter(|item| item.device_id() == query.device_id)
            .filter(|item| {
                query
                    .metric_name
                    .as_deref()
                    .is_none_or(|metric| item.metric_name() == metric)
            })
            .filter(|item| query.from_ms.is_none_or(|from| item.ts_ms() >= from))
            .filter(|item| query.to_ms.is_none_or(|to| item.ts_ms() <= to))
            .collect();
        selected.sort_by_key(|item| item.ts_ms());
        if matches!(query.order, TimeOrder::Desc) {
            selected.reverse();
        }
        let limit = query.limit.max(0) as usize;
        Ok(selected
            .into_iter()
            .take(limit)
            .map(to_record)
            .collect())
    }

    async fn latest(
        &self,
        device_id: &str,
        metric_name: Option<&str>,
    ) -> Result<Vec<LatestRecord>, StorageError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut latest: BTreeMap<&str, &Measurement> = BTreeMap::new();
        for item in rows.items.iter().filter(|item| item.device_id() == device_id) {
            if metric_name.is_some_and(|metric| item.metric_name() != metric) {
                continue;
            }
            let entry = latest.entry(item.metric_name()).or_insert(item);
            if item.ts_ms() > entry.ts_ms() {
                *entry = item;
            }
        }
        Ok(latest.into_values().map(to_record).collect())
    }

    async fn aggregate(
        &self,
        device_id: &str,
        metric_name: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Option<AggregateRecord>, StorageError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let values: Vec<Decimal> = rows
            .items
            .iter()
            .filter(|item| item.device_id() == device_id && item.metric_name() == metric_name)
            .filter(|item| item.ts_ms() >= from_ms && item.ts_ms() <= to_ms)
            .map(Measurement::value)
            .collect();
        let Some(first) = values.first().copied() else {
            return Ok(None);
        };
        let overflow = || StorageError::rejected("numeric value out of range");
        let (min, max, sum) = values.iter().try_fold(
            (first, first, Decimal::ZERO),
            |(min, max, sum), value| {
                let sum = sum.checked_add(*value)?;
                Some((min.min(*value), max.max(*value), sum))
            },
        )
        .ok_or_else(overflow)?;
        let count = values.len() as i64;
        let avg = sum
            .checked_div(Decimal::from(count))
            .ok_or_else(overflow)?
            .round_dp(6);
        Ok(Some(AggregateRecord {
            min,
            max,
            avg,
            sum,
            count,
        }))
    }

    async fn delete_before(&self, cutoff_ms: i64) -> Result<u64, StorageError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let before = rows.items.len();
        rows.items.retain(|item| item.ts_ms() >= cutoff_ms);
        let keys: HashSet<RowKey> = rows.items.iter().map(row_key).collect();
        rows.keys = keys;
        Ok((before - rows.items.len()) as u64)
    }
}
