//! IoT 遥测接入服务：MQTT 订阅 → 缓冲 → 批量写入 TimescaleDB，并提供批量提交与查询 API。

mod handlers;
mod ingest;
mod middleware;
mod routes;
mod utils;


use iot_config::AppConfig;
use iot_ingest::{IngestTasks, Subscriber};
use iot_normalize::DeviceResolver;
use iot_pipeline::{Pipeline, Shutdown, spawn_retention};
use iot_storage::{
    PgDeviceRegistry, PgTelemetryStore, RealtimeStore, RedisRealtimeStore, TelemetryStore,
    connect_pool, ensure_telemetry_schema,
};
use iot_telemetry::init_tracing;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub telemetry_store: Arc<dyn TelemetryStore>,
    pub realtime_store: Option<Arc<dyn RealtimeStore>>,
    pub resolver: Arc<dyn DeviceResolver>,
    pub pipeline: Pipeline,
    pub subscriber: Option<Arc<Subscriber>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    // 存储：连接池、建表（缺少 TimescaleDB 且要求时启动失败）
    let pool = connect_pool(&config.database_url, config.database_max_connections).await?;
    ensure_telemetry_schema(&pool, config.require_timescale).await?;
    let telemetry_store: Arc<dyn TelemetryStore> = Arc::new(PgTelemetryStore::new(pool.clone()));
    let realtime_store: Option<Arc<dyn RealtimeStore>> = match config.redis_url.as_deref() {
        Some(url) => Some(Arc::new(RedisRealtimeStore::connect_with_ttl(
            url,
            config.redis_last_value_ttl_seconds,
        )?)),
        None => None,
    };
    let resolver = ingest::build_resolver(&config, Arc::new(PgDeviceRegistry::new(pool)));
    let pipeline =
        ingest::build_pipeline(&config, telemetry_store.clone(), realtime_store.clone());

    let (shutdown, _) = Shutdown::new();
    let mut tasks = IngestTasks::spawn(&pipeline, shutdown.clone());
    let retention = spawn_retention(
        telemetry_store.clone(),
        ingest::retention_config(&config),
        shutdown.signal(),
    );

    // 总线订阅：启动期连不上视为致命错误
    let mut subscriber = None;
    if config.ingest_enabled {
        let bus = ingest::build_subscriber(&config, resolver.clone(), pipeline.clone());
        if let Err(err) = tasks.start_subscriber(bus.clone()).await {
            tracing::error!(target: "iot.ingest", error = %err, "bus_unreachable");
            tasks.shutdown().await;
            return Err(err.into());
        }
        subscriber = Some(bus);
    } else {
        tracing::info!(target: "iot.ingest", "ingest_disabled");
    }

    let state = AppState {
        telemetry_store,
        realtime_store,
        resolver,
        pipeline,
        subscriber,
    };
    let app = routes::create_app(state);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!(target: "iot.api", addr = %config.http_addr, "http_listening");

    let trigger = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(target: "iot.api", "shutdown_requested");
            trigger.trigger();
        })
        .await?;

    // 订阅退出后才做最终刷盘
    tasks.shutdown().await;
    if let Some(task) = retention {
        let _ = task.await;
    }
    Ok(())
}
