use async_trait::async_trait;
use domain::{MetadataValue, RawEvent};
use iot_normalize::{DeviceResolver, NormalizeError, Normalizer, RegistryResolver};
use iot_storage::{DeviceRecord, InMemoryDeviceRegistry, StorageError};
use std::sync::Arc;

fn normalizer() -> Normalizer {
    let registry = Arc::new(InMemoryDeviceRegistry::new());
    registry
        .insert(DeviceRecord {
            device_id: "dev-1".to_string(),
            external_id: "SN-1".to_string(),
            gateway_id: Some("gw-1".to_string()),
            name: "main meter".to_string(),
        })
        .expect("insert");
    Normalizer::new(Arc::new(RegistryResolver::new(registry)))
}

fn event(topic: &str, device_hint: Option<&str>, gateway_id: Option<&str>, payload: &str) -> RawEvent {
    RawEvent {
        topic: topic.to_string(),
        device_hint: device_hint.map(str::to_string),
        gateway_id: gateway_id.map(str::to_string),
        payload: payload.as_bytes().to_vec(),
        received_at_ms: 1_700_000_000_000,
    }
}

#[tokio::test]
async fn topic_identity_wins_and_defaults_apply() {
    let normalized = normalizer()
        .normalize(event(
            "iot/devices/SN-1/telemetry",
            Some("SN-1"),
            None,
            r#"{"device_id":"other","readings":[{"metric_name":"power","value":1.5,"unit":"kW"}]}"#,
        ))
        .await
        .expect("normalized");
    assert_eq!(normalized.device_id, "dev-1");
    let item = &normalized.measurements[0];
    assert_eq!(item.ts_ms(), 1_700_000_000_000);
    assert_eq!(item.quality(), 100);
    assert_eq!(
        item.metadata().get("topic"),
        Some(&MetadataValue::String("iot/devices/SN-1/telemetry".into()))
    );
}

#[tokio::test]
async fn gateway_payload_carries_identity_and_gateway_metadata() {
    let normalized = normalizer()
        .normalize(event(
            "iot/gateways/gw-1/telemetry",
            None,
            Some("gw-1"),
            r#"{"serialNumber":"SN-1","readings":[
                {"metric_name":"voltage","value":"231.2","unit":"V","quality":90},
                {"metric_name":"power","value":2,"quality":150}
            ]}"#,
        ))
        .await
        .expect("normalized");
    assert_eq!(normalized.measurements.len(), 1);
    assert_eq!(normalized.measurements[0].quality(), 90);
    assert_eq!(
        normalized.measurements[0].metadata().get("gateway_id"),
        Some(&MetadataValue::String("gw-1".into()))
    );
    assert_eq!(normalized.rejected.len(), 1);
    assert!(normalized.rejected[0].reason.contains("quality"));
}

#[tokio::test]
async fn unknown_and_missing_devices_are_errors() {
    let normalizer = normalizer();
    let err = normalizer
        .normalize(event(
            "iot/devices/SN-9/telemetry",
            Some("SN-9"),
            None,
            r#"{"readings":[{"metric_name":"power","value":1}]}"#,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, NormalizeError::UnknownDevice(id) if id == "SN-9"));

    let err = normalizer
        .normalize(event(
            "iot/gateways/gw-1/telemetry",
            None,
            Some("gw-1"),
            r#"{"readings":[{"metric_name":"power","value":1}]}"#,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, NormalizeError::MissingDevice));

    let err = normalizer
        .normalize(event("iot/devices/SN-1/telemetry", Some("SN-1"), None, "{oops"))
        .await
        .unwrap_err();
    assert!(matches!(err, NormalizeError::Malformed(_)));
}

struct BrokenResolver;

#[async_trait]
impl DeviceResolver for BrokenResolver {
    async fn resolve(&self, _external_id: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::transient("registry offline"))
    }
}

#[tokio::test]
async fn registry_failure_is_reported() {
    let normalizer = Normalizer::new(Arc::new(BrokenResolver));
    let err = normalizer
        .normalize(event(
            "iot/devices/SN-1/telemetry",
            Some("SN-1"),
            None,
            r#"{"metric_name":"power","value":1}"#,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, NormalizeError::Registry(_)));
}
