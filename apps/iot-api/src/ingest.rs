//! 采集链路装配：存储、设备解析、管线、总线订阅。

use iot_config::AppConfig;
use iot_ingest::{
    BufferingHandler, MqttConnector, MqttConnectorConfig, Subscriber, SubscriberConfig,
};
use iot_normalize::{
    CachedDeviceResolver, DeviceResolver, Normalizer, RegistryResolver, ResolverCacheConfig,
};
use iot_pipeline::{BatchWriter, Pipeline, PipelineConfig, RetentionConfig, WriterConfig};
use iot_storage::{DeviceRegistry, RealtimeStore, TelemetryStore};
use std::sync::Arc;
use std::time::Duration;

/// 带缓存的设备解析器。
pub fn build_resolver(
    config: &AppConfig,
    registry: Arc<dyn DeviceRegistry>,
) -> Arc<dyn DeviceResolver> {
    let cache = ResolverCacheConfig {
        ttl: Duration::from_secs(config.registry_cache_ttl_seconds),
        negative_ttl: Duration::from_secs(config.registry_negative_ttl_seconds),
        capacity: config.registry_cache_capacity,
    };
    Arc::new(CachedDeviceResolver::new(
        Arc::new(RegistryResolver::new(registry)),
        cache,
    ))
}

/// 批量写入器 + 缓冲区 + 刷盘参数。
pub fn build_pipeline(
    config: &AppConfig,
    store: Arc<dyn TelemetryStore>,
    realtime: Option<Arc<dyn RealtimeStore>>,
) -> Pipeline {
    let writer_config = WriterConfig {
        max_retries: config.write_max_retries,
        backoff: Duration::from_millis(config.write_backoff_ms),
        backoff_max: Duration::from_millis(config.write_backoff_max_ms),
        write_timeout: Duration::from_millis(config.write_timeout_ms),
        fallback_timeout: Duration::from_millis(config.write_fallback_timeout_ms),
    };
    let mut writer = BatchWriter::new(store, writer_config);
    if let Some(realtime) = realtime {
        writer = writer.with_realtime(realtime);
    }
    Pipeline::with_config(
        Arc::new(writer),
        PipelineConfig {
            buffer_batch_size: config.buffer_batch_size,
            buffer_capacity: config.buffer_capacity,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            max_batch_size: config.max_batch_size,
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
        },
    )
}

pub fn retention_config(config: &AppConfig) -> RetentionConfig {
    RetentionConfig {
        retention_days: config.retention_days,
        interval: Duration::from_secs(config.retention_interval_seconds),
    }
}

/// MQTT 订阅任务（未启动）。
pub fn build_subscriber(
    config: &AppConfig,
    resolver: Arc<dyn DeviceResolver>,
    pipeline: Pipeline,
) -> Arc<Subscriber> {
    let connector = MqttConnector::new(MqttConnectorConfig {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
        client_id: config.mqtt_client_id.clone(),
        keep_alive: Duration::from_secs(config.mqtt_keep_alive_seconds),
        connect_timeout: Duration::from_millis(config.connect_timeout_ms),
    });
    let handler = BufferingHandler::new(Normalizer::new(resolver), pipeline);
    Arc::new(Subscriber::new(
        Arc::new(connector),
        Arc::new(handler),
        SubscriberConfig {
            topics: config.mqtt_topics.clone(),
            topic_prefix: config.mqtt_topic_prefix.clone(),
            reconnect_backoff: Duration::from_millis(config.reconnect_backoff_ms),
            reconnect_backoff_max: Duration::from_millis(config.reconnect_backoff_max_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            startup_attempts: config.startup_connect_attempts,
        },
    ))
}
