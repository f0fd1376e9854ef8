//! 应用运行配置加载。

use std::env;

/// 单批硬上限（与 `domain::MAX_BATCH_SIZE` 保持一致）。
const HARD_BATCH_LIMIT: usize = 1000;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub require_timescale: bool,
    pub redis_url: Option<String>,
    pub redis_last_value_ttl_seconds: Option<u64>,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: Option<String>,
    pub mqtt_topic_prefix: String,
    pub mqtt_topics: Vec<String>,
    pub mqtt_keep_alive_seconds: u64,
    pub ingest_enabled: bool,
    pub buffer_batch_size: usize,
    pub buffer_capacity: usize,
    pub flush_interval_ms: u64,
    pub max_batch_size: usize,
    pub write_max_retries: u32,
    pub write_backoff_ms: u64,
    pub write_backoff_max_ms: u64,
    pub write_timeout_ms: u64,
    pub write_fallback_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    pub connect_timeout_ms: u64,
    pub startup_connect_attempts: u32,
    pub registry_cache_ttl_seconds: u64,
    pub registry_negative_ttl_seconds: u64,
    pub registry_cache_capacity: usize,
    pub shutdown_timeout_ms: u64,
    pub retention_days: u64,
    pub retention_interval_seconds: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("IOT_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("IOT_DATABASE_URL".to_string()))?;
        let http_addr = env::var("IOT_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let database_max_connections =
            read_u32_with_default("IOT_DATABASE_MAX_CONNECTIONS", 10)?;
        let require_timescale = read_bool_with_default("IOT_REQUIRE_TIMESCALE", false);
        let redis_url = read_optional("IOT_REDIS_URL");
        let redis_last_value_ttl_seconds =
            read_optional_u64("IOT_REDIS_LAST_VALUE_TTL_SECONDS")?.filter(|value| *value > 0);
        let mqtt_host = normalize_mqtt_host(
            &env::var("IOT_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        );
        let mqtt_port = read_u16_with_default("IOT_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("IOT_MQTT_USERNAME");
        let mqtt_password = read_optional("IOT_MQTT_PASSWORD");
        let mqtt_client_id = read_optional("IOT_MQTT_CLIENT_ID");
        let mqtt_topic_prefix = env::var("IOT_MQTT_TOPIC_PREFIX")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| "iot".to_string());
        let mqtt_topics = match read_optional("IOT_MQTT_TOPICS") {
            Some(value) => parse_topic_list(&value),
            None => default_topics(&mqtt_topic_prefix),
        };
        let mqtt_keep_alive_seconds = read_u64_with_default("IOT_MQTT_KEEP_ALIVE_SECONDS", 30)?;
        let ingest_enabled = read_bool_with_default("IOT_INGEST", false);
        let buffer_batch_size = read_usize_with_default("IOT_BUFFER_BATCH_SIZE", 100)?;
        let buffer_capacity = read_usize_with_default("IOT_BUFFER_CAPACITY", 10_000)?;
        let flush_interval_ms = read_u64_with_default("IOT_FLUSH_INTERVAL_MS", 5_000)?;
        let max_batch_size = read_usize_with_default("IOT_MAX_BATCH_SIZE", HARD_BATCH_LIMIT)?;
        let write_max_retries = read_u32_with_default("IOT_WRITE_MAX_RETRIES", 3)?;
        let write_backoff_ms = read_u64_with_default("IOT_WRITE_BACKOFF_MS", 200)?;
        let write_backoff_max_ms = read_u64_with_default("IOT_WRITE_BACKOFF_MAX_MS", 5_000)?;
        let write_timeout_ms = read_u64_with_default("IOT_WRITE_TIMEOUT_MS", 10_000)?;
        let write_fallback_timeout_ms =
            read_u64_with_default("IOT_WRITE_FALLBACK_TIMEOUT_MS", 30_000)?;
        let reconnect_backoff_ms = read_u64_with_default("IOT_RECONNECT_BACKOFF_MS", 1_000)?;
        let reconnect_backoff_max_ms =
            read_u64_with_default("IOT_RECONNECT_BACKOFF_MAX_MS", 60_000)?;
        let connect_timeout_ms = read_u64_with_default("IOT_CONNECT_TIMEOUT_MS", 10_000)?;
        let startup_connect_attempts = read_u32_with_default("IOT_STARTUP_CONNECT_ATTEMPTS", 5)?;
        let registry_cache_ttl_seconds =
            read_u64_with_default("IOT_REGISTRY_CACHE_TTL_SECONDS", 60)?;
        let registry_negative_ttl_seconds =
            read_u64_with_default("IOT_REGISTRY_NEGATIVE_TTL_SECONDS", 10)?;
        let registry_cache_capacity = read_usize_with_default("IOT_REGISTRY_CACHE_CAPACITY", 10_000)?;
        let shutdown_timeout_ms = read_u64_with_default("IOT_SHUTDOWN_TIMEOUT_MS", 10_000)?;
        let retention_days = read_u64_with_default("IOT_RETENTION_DAYS", 0)?;
        let retention_interval_seconds =
            read_u64_with_default("IOT_RETENTION_INTERVAL_SECONDS", 86_400)?;

        let config = Self {
            http_addr,
            database_url,
            database_max_connections,
            require_timescale,
            redis_url,
            redis_last_value_ttl_seconds,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_topic_prefix,
            mqtt_topics,
            mqtt_keep_alive_seconds,
            ingest_enabled,
            buffer_batch_size,
            buffer_capacity,
            flush_interval_ms,
            max_batch_size,
            write_max_retries,
            write_backoff_ms,
            write_backoff_max_ms,
            write_timeout_ms,
            write_fallback_timeout_ms,
            reconnect_backoff_ms,
            reconnect_backoff_max_ms,
            connect_timeout_ms,
            startup_connect_attempts,
            registry_cache_ttl_seconds,
            registry_negative_ttl_seconds,
            registry_cache_capacity,
            shutdown_timeout_ms,
            retention_days,
            retention_interval_seconds,
        };
        config.validate()?;
        Ok(config)
    }

    /// 校验取值之间的一致性。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_batch_size == 0 {
            return Err(invalid("IOT_BUFFER_BATCH_SIZE", self.buffer_batch_size));
        }
        if self.buffer_capacity < self.buffer_batch_size {
            return Err(invalid("IOT_BUFFER_CAPACITY", self.buffer_capacity));
        }
        if self.max_batch_size == 0 || self.max_batch_size > HARD_BATCH_LIMIT {
            return Err(invalid("IOT_MAX_BATCH_SIZE", self.max_batch_size));
        }
        if self.flush_interval_ms == 0 {
            return Err(invalid("IOT_FLUSH_INTERVAL_MS", self.flush_interval_ms));
        }
        if self.mqtt_topics.is_empty() {
            return Err(ConfigError::Invalid(
                "IOT_MQTT_TOPICS".to_string(),
                String::new(),
            ));
        }
        if self.reconnect_backoff_max_ms < self.reconnect_backoff_ms {
            return Err(invalid(
                "IOT_RECONNECT_BACKOFF_MAX_MS",
                self.reconnect_backoff_max_ms,
            ));
        }
        Ok(())
    }
}

/// 默认订阅主题：设备直连与网关汇聚两类遥测及状态。
pub fn default_topics(prefix: &str) -> Vec<String> {
    let prefix = prefix.trim_end_matches('/');
    vec![
        format!("{prefix}/devices/+/telemetry"),
        format!("{prefix}/gateways/+/telemetry"),
        format!("{prefix}/devices/+/status"),
        format!("{prefix}/gateways/+/status"),
    ]
}

/// 去掉 `mqtt://` / `tcp://` 前缀与端口后缀（端口由 IOT_MQTT_PORT 决定）。
pub fn normalize_mqtt_host(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let host = without_scheme
        .split_once(':')
        .map(|(host, _)| host)
        .unwrap_or(without_scheme);
    host.trim_end_matches('/').to_string()
}

fn parse_topic_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|topic| !topic.is_empty())
        .map(str::to_string)
        .collect()
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid(key.to_string(), value.to_string())
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_optional_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
