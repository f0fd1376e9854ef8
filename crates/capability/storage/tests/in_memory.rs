use domain::{Decimal, Measurement, MeasurementDraft};
use iot_storage::{
    DeviceRecord, DeviceRegistry, InMemoryDeviceRegistry, InMemoryRealtimeStore,
    InMemoryTelemetryStore, RealtimeStore, StorageErrorKind, TelemetryQuery, TelemetryStore,
    TimeOrder,
};
use std::sync::Arc;

fn device(device_id: &str, external_id: &str) -> DeviceRecord {
    DeviceRecord {
        device_id: device_id.to_string(),
        external_id: external_id.to_string(),
        gateway_id: None,
        name: format!("meter {external_id}"),
    }
}

fn reading(device_id: &str, metric: &str, value: i64, ts_ms: i64) -> Measurement {
    Measurement::new(
        MeasurementDraft {
            device_id: device_id.to_string(),
            metric_name: metric.to_string(),
            value: Decimal::from(value),
            unit: "W".to_string(),
            ts_ms: Some(ts_ms),
            ..Default::default()
        },
        ts_ms,
    )
    .expect("measurement")
}

#[tokio::test]
async fn registry_resolves_serial_then_internal_id() {
    let registry = InMemoryDeviceRegistry::new();
    registry.insert(device("dev-1", "SN-001")).expect("insert");

    assert_eq!(
        registry.resolve("SN-001").await.expect("resolve"),
        Some("dev-1".to_string())
    );
    assert_eq!(
        registry.resolve("dev-1").await.expect("resolve"),
        Some("dev-1".to_string())
    );
    assert_eq!(registry.resolve("SN-404").await.expect("resolve"), None);
    assert_eq!(registry.lookups(), 3);
}

#[tokio::test]
async fn batch_with_duplicate_is_rejected_atomically() {
    let store = InMemoryTelemetryStore::new();
    store
        .insert_batch(&[reading("dev-1", "power", 1, 1_000)])
        .await
        .expect("first batch");

    let batch = vec![
        reading("dev-1", "power", 2, 2_000),
        reading("dev-1", "power", 3, 1_000),
    ];
    let err = store.insert_batch(&batch).await.unwrap_err();
    assert_eq!(err.kind(), StorageErrorKind::Rejected);
    assert!(err.is_unique_violation());
    assert_eq!(store.len(), 1);

    let repeated = vec![
        reading("dev-1", "power", 4, 3_000),
        reading("dev-1", "power", 5, 3_000),
    ];
    let err = store.insert_batch(&repeated).await.unwrap_err();
    assert!(err.is_unique_violation());
    assert_eq!(store.len(), 1);

    store.insert_one(&batch[0]).await.expect("row insert");
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn unknown_device_violates_foreign_key() {
    let registry = Arc::new(InMemoryDeviceRegistry::new());
    registry.insert(device("dev-1", "SN-001")).expect("insert");
    let store = InMemoryTelemetryStore::with_registry(registry);

    let err = store
        .insert_one(&reading("dev-9", "power", 1, 1_000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), StorageErrorKind::Rejected);
    assert!(!err.is_unique_violation());
    store
        .insert_one(&reading("dev-1", "power", 1, 1_000))
        .await
        .expect("known device");
}

#[tokio::test]
async fn query_latest_aggregate_and_retention() {
    let store = InMemoryTelemetryStore::new();
    let rows: Vec<Measurement> = (1..=5)
        .map(|i| reading("dev-1", "power", i * 10, i * 1_000))
        .chain([reading("dev-1", "voltage", 230, 3_500)])
        .collect();
    store.insert_batch(&rows).await.expect("insert");

    let items = store
        .query(TelemetryQuery {
            device_id: "dev-1".to_string(),
            metric_name: Some("power".to_string()),
            from_ms: Some(2_000),
            to_ms: Some(4_000),
            order: TimeOrder::Desc,
            limit: 2,
        })
        .await
        .expect("query");
    assert_eq!(
        items.iter().map(|item| item.ts_ms).collect::<Vec<_>>(),
        vec![4_000, 3_000]
    );

    let latest = store.latest("dev-1", None).await.expect("latest");
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].metric_name, "power");
    assert_eq!(latest[0].ts_ms, 5_000);

    let agg = store
        .aggregate("dev-1", "power", 0, 10_000)
        .await
        .expect("aggregate")
        .expect("some");
    assert_eq!(agg.count, 5);
    assert_eq!(agg.sum, Decimal::from(150));
    assert_eq!(agg.avg, Decimal::from(30));
    assert_eq!(agg.min, Decimal::from(10));
    assert_eq!(agg.max, Decimal::from(50));
    assert!(
        store
            .aggregate("dev-1", "power", 20_000, 30_000)
            .await
            .expect("aggregate")
            .is_none()
    );

    let deleted = store.delete_before(3_000).await.expect("delete");
    assert_eq!(deleted, 2);
    assert_eq!(store.len(), 4);
    store
        .insert_one(&reading("dev-1", "power", 1, 1_000))
        .await
        .expect("deleted key can be written again");
}

#[tokio::test]
async fn realtime_keeps_newest_value() {
    let store = InMemoryRealtimeStore::new();
    store
        .upsert_last_values(&[reading("dev-1", "power", 5, 5_000)])
        .await
        .expect("upsert");
    store
        .upsert_last_values(&[
            reading("dev-1", "power", 1, 1_000),
            reading("dev-1", "voltage", 230, 2_000),
        ])
        .await
        .expect("upsert");

    let values = store.get_last_values("dev-1", None).await.expect("get");
    assert_eq!(values.len(), 2);
    let power = store
        .get_last_values("dev-1", Some("power"))
        .await
        .expect("get");
    assert_eq!(power[0].value, Decimal::from(5));
}

#[tokio::test]
async fn aggregate_overflow_is_reported_not_panicking() {
    let store = InMemoryTelemetryStore::new();
    let huge = |ts_ms: i64| {
        Measurement::new(
            MeasurementDraft {
                device_id: "dev-1".to_string(),
                metric_name: "energy".to_string(),
                value: Decimal::MAX,
                unit: "Wh".to_string(),
                ts_ms: Some(ts_ms),
                ..Default::default()
            },
            ts_ms,
        )
        .expect("measurement")
    };
    store
        .insert_batch(&[huge(1_000), huge(2_000)])
        .await
        .expect("insert");

    let err = store
        .aggregate("dev-1", "energy", 0, 10_000)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), StorageErrorKind::Rejected);
}
