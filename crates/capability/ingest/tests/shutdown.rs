mod support;

use async_trait::async_trait;
use domain::{Decimal, Measurement, MeasurementDraft, RawEvent};
use iot_ingest::{
    BufferingHandler, IngestError, IngestTasks, RawEventHandler, Subscriber, SubscriberConfig,
    SubscriberState,
};
use iot_normalize::{Normalizer, RegistryResolver};
use iot_pipeline::{BatchWriter, Pipeline, PipelineConfig, Shutdown, WriterConfig};
use iot_storage::{DeviceRecord, InMemoryDeviceRegistry, InMemoryTelemetryStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use support::{FakeConnector, eventually, message};

/// 处理前先停顿，模拟关停时仍在处理中的消息。
struct SlowHandler {
    inner: BufferingHandler,
    started: AtomicBool,
}

#[async_trait]
impl RawEventHandler for SlowHandler {
    async fn handle(&self, event: RawEvent) -> Result<(), IngestError> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.inner.handle(event).await
    }
}

#[tokio::test]
async fn final_drain_waits_for_in_flight_message() {
    let registry = Arc::new(InMemoryDeviceRegistry::new());
    registry
        .insert(DeviceRecord {
            device_id: "D1".to_string(),
            external_id: "SN-D1".to_string(),
            gateway_id: None,
            name: "main meter".to_string(),
        })
        .expect("device");
    let store = Arc::new(InMemoryTelemetryStore::with_registry(registry.clone()));
    let writer = BatchWriter::new(store.clone(), WriterConfig::default());
    let pipeline = Pipeline::with_config(
        Arc::new(writer),
        PipelineConfig {
            flush_interval: Duration::from_secs(60),
            ..Default::default()
        },
    );
    let handler = Arc::new(SlowHandler {
        inner: BufferingHandler::new(
            Normalizer::new(Arc::new(RegistryResolver::new(registry))),
            pipeline.clone(),
        ),
        started: AtomicBool::new(false),
    });
    let connector = Arc::new(FakeConnector::new(vec![Some(vec![message(
        "iot/devices/D1/telemetry",
        r#"{"metric_name":"power","value":1.5,"timestamp":1700000000001}"#,
    )])]));
    let subscriber = Arc::new(Subscriber::new(
        connector,
        handler.clone(),
        SubscriberConfig {
            topics: vec!["iot/devices/+/telemetry".to_string()],
            ..Default::default()
        },
    ));

    let (shutdown, _) = Shutdown::new();
    let mut tasks = IngestTasks::spawn(&pipeline, shutdown);
    tasks
        .start_subscriber(subscriber.clone())
        .await
        .expect("started");

    eventually(|| handler.started.load(Ordering::SeqCst)).await;
    let summary = tasks.shutdown().await;

    assert_eq!(subscriber.state(), SubscriberState::Stopped);
    assert_eq!(summary.written, 1);
    assert_eq!(summary.lost, 0);
    assert_eq!(store.len(), 1);
    assert!(pipeline.buffer().is_empty());
}

#[tokio::test]
async fn shutdown_without_subscriber_still_drains() {
    let store = Arc::new(InMemoryTelemetryStore::new());
    let pipeline = Pipeline::new(Arc::new(BatchWriter::new(
        store.clone(),
        WriterConfig::default(),
    )));
    let (shutdown, _) = Shutdown::new();
    let tasks = IngestTasks::spawn(&pipeline, shutdown);
    let reading = Measurement::new(
        MeasurementDraft {
            device_id: "D1".to_string(),
            metric_name: "power".to_string(),
            value: Decimal::from(2),
            unit: "W".to_string(),
            ts_ms: Some(1_700_000_000_001),
            ..Default::default()
        },
        1_700_000_000_001,
    )
    .expect("reading");
    pipeline.append(reading);

    let summary = tasks.shutdown().await;
    assert_eq!(summary.written, 1);
    assert_eq!(store.len(), 1);
}
