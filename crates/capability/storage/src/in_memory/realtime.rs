//! 实时数据内存实现

use crate::error::StorageError;
use crate::models::LatestRecord;
use crate::traits::RealtimeStore;
use domain::Measurement;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// 实时数据内存存储，key 为 (device_id, metric_name)。
#[derive(Default)]
pub struct InMemoryRealtimeStore {
    last_values: RwLock<BTreeMap<(String, String), Measurement>>,
}

impl InMemoryRealtimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取 last_value 数量（用于测试）
    pub fn len(&self) -> usize {
        self.last_values.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl RealtimeStore for InMemoryRealtimeStore {
    async fn upsert_last_values(&self, items: &[Measurement]) -> Result<(), StorageError> {
        let mut values = self
            .last_values
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        for item in items {
            let key = (item.device_id().to_string(), item.metric_name().to_string());
            match values.get(&key) {
                Some(current) if current.ts_ms() > item.ts_ms() => {}
                _ => {
                    values.insert(key, item.clone());
                }
            }
        }
        Ok(())
    }

    async fn get_last_values(
        &self,
        device_id: &str,
        metric_name: Option<&str>,
    ) -> Result<Vec<LatestRecord>, StorageError> {
        let values = self
            .last_values
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(values
            .iter()
            .filter(|((device, metric), _)| {
                device == device_id && metric_name.is_none_or(|name| name == metric)
            })
            .map(|(_, item)| LatestRecord {
                device_id: item.device_id().to_string(),
                metric_name: item.metric_name().to_string(),
                value: item.value(),
                unit: item.unit().to_string(),
                quality: i32::from(item.quality()),
                ts_ms: item.ts_ms(),
            })
            .collect())
    }
}
