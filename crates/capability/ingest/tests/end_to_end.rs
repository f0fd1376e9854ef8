mod support;

use async_trait::async_trait;
use domain::{Batch, Measurement};
use iot_ingest::{BufferingHandler, Subscriber, SubscriberConfig};
use iot_normalize::{Normalizer, RegistryResolver};
use iot_pipeline::{BatchSink, Pipeline, PipelineConfig, PipelineError, Shutdown, WriteReport};
use iot_storage::{DeviceRecord, InMemoryDeviceRegistry};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use support::{FakeConnector, eventually, message};

#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Vec<(String, String, i64)>>>,
}

impl RecordingSink {
    fn batches(&self) -> Vec<Vec<(String, String, i64)>> {
        self.batches.lock().expect("lock").clone()
    }
}

#[async_trait]
impl BatchSink for RecordingSink {
    async fn write(&self, batch: &Batch) -> Result<WriteReport, PipelineError> {
        let rows = batch
            .items()
            .iter()
            .map(|item: &Measurement| {
                (
                    item.device_id().to_string(),
                    item.metric_name().to_string(),
                    item.ts_ms(),
                )
            })
            .collect();
        self.batches.lock().expect("lock").push(rows);
        Ok(WriteReport {
            written: batch.len() as u64,
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn five_readings_in_one_window_become_one_ordered_batch() {
    let registry = Arc::new(InMemoryDeviceRegistry::new());
    registry
        .insert(DeviceRecord {
            device_id: "D1".to_string(),
            external_id: "SN-D1".to_string(),
            gateway_id: None,
            name: "main meter".to_string(),
        })
        .expect("device");
    let normalizer = Normalizer::new(Arc::new(RegistryResolver::new(registry)));

    let sink = Arc::new(RecordingSink::default());
    let pipeline = Pipeline::with_config(
        sink.clone(),
        PipelineConfig {
            flush_interval: Duration::from_millis(150),
            ..Default::default()
        },
    );
    let handler = Arc::new(BufferingHandler::new(normalizer, pipeline.clone()));

    let mut script = vec![
        message("iot/devices/D404/telemetry", r#"{"metric_name":"power","value":1}"#),
        message("iot/devices/D1/telemetry", "not json"),
    ];
    for ts in 1..=5 {
        let payload = format!(
            r#"{{"metric_name":"power","value":{ts}.5,"unit":"kW","timestamp":{}}}"#,
            1_700_000_000_000i64 + ts
        );
        script.push(support::Step::Message(
            "iot/devices/D1/telemetry",
            payload.into_bytes(),
        ));
    }
    let connector = Arc::new(FakeConnector::new(vec![Some(script)]));
    let subscriber = Arc::new(Subscriber::new(
        connector,
        handler.clone(),
        SubscriberConfig {
            topics: vec!["iot/devices/+/telemetry".to_string()],
            ..Default::default()
        },
    ));

    let (shutdown, signal) = Shutdown::new();
    let flusher = pipeline.spawn_flusher(shutdown.signal());
    let task = subscriber.clone().start(signal).await.expect("started");

    eventually(|| handler.stats().buffered == 5).await;
    eventually(|| !sink.batches().is_empty()).await;

    let expected: Vec<(String, String, i64)> = (1..=5)
        .map(|ts| ("D1".to_string(), "power".to_string(), 1_700_000_000_000 + ts))
        .collect();
    assert_eq!(sink.batches(), vec![expected]);
    let stats = handler.stats();
    assert_eq!(stats.dropped_unknown_device, 1);
    assert_eq!(stats.dropped_malformed, 1);

    shutdown.trigger();
    task.await.expect("join");
    let summary = flusher.await.expect("join");
    assert_eq!(summary.lost, 0);
    assert_eq!(sink.batches().len(), 1);
}
