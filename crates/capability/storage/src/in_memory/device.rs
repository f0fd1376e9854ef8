//! 设备注册表内存实现

use crate::error::StorageError;
use crate::models::DeviceRecord;
use crate::traits::DeviceRegistry;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// 设备注册表内存存储
///
/// 使用 RwLock + HashMap 提供线程安全的内存存储，key 为内部设备 ID。
#[derive(Default)]
pub struct InMemoryDeviceRegistry {
    devices: RwLock<HashMap<String, DeviceRecord>>,
    lookups: AtomicU64,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记设备（同 ID 覆盖）。
    pub fn insert(&self, record: DeviceRecord) -> Result<(), StorageError> {
        let mut map = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        map.insert(record.device_id.clone(), record);
        Ok(())
    }

    /// 移除设备。
    pub fn remove(&self, device_id: &str) -> Result<bool, StorageError> {
        let mut map = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(map.remove(device_id).is_some())
    }

    /// 内部设备 ID 是否存在（时序写入的外键校验）。
    pub fn contains(&self, device_id: &str) -> bool {
        self.devices
            .read()
            .map(|map| map.contains_key(device_id))
            .unwrap_or(false)
    }

    /// 累计查询次数（用于测试缓存命中）。
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn resolve(&self, external_id: &str) -> Result<Option<String>, StorageError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let map = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        if let Some(record) = map.values().find(|item| item.external_id == external_id) {
            return Ok(Some(record.device_id.clone()));
        }
        Ok(map.get(external_id).map(|item| item.device_id.clone()))
    }
}
