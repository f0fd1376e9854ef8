//! 设备身份解析（带 TTL 缓存）。

use async_trait::async_trait;
use iot_storage::{DeviceRegistry, StorageError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 外部标识 → 内部设备 ID。
#[async_trait]
pub trait DeviceResolver: Send + Sync {
    async fn resolve(&self, external_id: &str) -> Result<Option<String>, StorageError>;
}

/// 直接查询注册表。
#[derive(Clone)]
pub struct RegistryResolver {
    registry: Arc<dyn DeviceRegistry>,
}

impl RegistryResolver {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DeviceResolver for RegistryResolver {
    async fn resolve(&self, external_id: &str) -> Result<Option<String>, StorageError> {
        self.registry.resolve(external_id).await
    }
}

/// 缓存参数。
#[derive(Debug, Clone, Copy)]
pub struct ResolverCacheConfig {
    pub ttl: Duration,
    pub negative_ttl: Duration,
    pub capacity: usize,
}

impl Default for ResolverCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            negative_ttl: Duration::from_secs(10),
            capacity: 10_000,
        }
    }
}

struct CacheEntry {
    device_id: Option<String>,
    expires_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

/// 注册表查询的 TTL 缓存。
///
/// 命中（含“未找到”）在 TTL 内直接返回；容量满时淘汰最早写入的条目。
/// 注册表错误不缓存。
pub struct CachedDeviceResolver {
    inner: Arc<dyn DeviceResolver>,
    config: ResolverCacheConfig,
    state: Mutex<CacheState>,
}

impl CachedDeviceResolver {
    pub fn new(inner: Arc<dyn DeviceResolver>, config: ResolverCacheConfig) -> Self {
        Self {
            inner,
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// 当前缓存条目数。
    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, external_id: &str, now: Instant) -> Option<Option<String>> {
        let state = self.state.lock().ok()?;
        let entry = state.entries.get(external_id)?;
        if entry.expires_at <= now {
            return None;
        }
        Some(entry.device_id.clone())
    }

    fn store(&self, external_id: &str, device_id: Option<String>, now: Instant) {
        if self.config.capacity == 0 {
            return;
        }
        let ttl = if device_id.is_some() {
            self.config.ttl
        } else {
            self.config.negative_ttl
        };
        if ttl.is_zero() {
            return;
        }
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let entry = CacheEntry {
            device_id,
            expires_at: now + ttl,
        };
        if state.entries.insert(external_id.to_string(), entry).is_none() {
            state.order.push_back(external_id.to_string());
        }
        while state.entries.len() > self.config.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
        }
    }
}

#[async_trait]
impl DeviceResolver for CachedDeviceResolver {
    async fn resolve(&self, external_id: &str) -> Result<Option<String>, StorageError> {
        let now = Instant::now();
        if let Some(hit) = self.lookup(external_id, now) {
            return Ok(hit);
        }
        let resolved = self.inner.resolve(external_id).await?;
        self.store(external_id, resolved.clone(), Instant::now());
        Ok(resolved)
    }
}
