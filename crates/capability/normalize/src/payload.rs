//! 总线报文解码。
//!
//! 支持两种形态：
//! - 批量：`{ "device_id": ..., "timestamp": ..., "readings": [ { "metric_name": ..., "value": ... } ] }`
//! - 单条（旧传感器报文）：读数字段直接位于顶层，如 `{ "sensorType": "temperature", "value": 21.5 }`
//!
//! 未识别的标量字段进入 metadata，嵌套对象 / 数组被丢弃。

use chrono::{DateTime, NaiveDateTime};
use domain::{Decimal, Metadata, MetadataValue};
use serde_json::{Map, Value};
use std::str::FromStr;

const DEVICE_KEYS: [&str; 4] = ["device_id", "deviceId", "serial_number", "serialNumber"];
const METRIC_KEYS: [&str; 5] = [
    "metric_name",
    "metricName",
    "sensor_type",
    "sensorType",
    "metric",
];
const TIMESTAMP_KEYS: [&str; 5] = ["timestamp", "ts", "tsMs", "ts_ms", "time"];
const VALUE_KEY: &str = "value";
const UNIT_KEY: &str = "unit";
const QUALITY_KEY: &str = "quality";
const READINGS_KEY: &str = "readings";
const METADATA_KEY: &str = "metadata";

/// 小于等于该值的数字时间戳按秒处理，否则按毫秒。
const SECONDS_THRESHOLD: f64 = 2e10;

/// 报文级错误（整条消息丢弃）。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid json: {0}")]
    InvalidJson(String),
    #[error("payload is not a json object")]
    NotObject,
    #[error("payload has no readings")]
    NoReadings,
}

/// 解码后的单条读数（尚未绑定设备）。
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReading {
    /// 在报文 readings 中的序号。
    pub index: usize,
    pub metric_name: String,
    pub value: Decimal,
    pub unit: String,
    pub quality: Option<i64>,
    pub ts_ms: Option<i64>,
    pub metadata: Metadata,
}

/// 解码后的一条消息。
#[derive(Debug, Clone, Default)]
pub struct DecodedMessage {
    /// 报文内的设备标识（可能为空，由 topic 提供）。
    pub device_ref: Option<String>,
    pub readings: Vec<DecodedReading>,
    /// 无法构成读数的条目：(序号, 原因)。
    pub invalid: Vec<(usize, String)>,
}

/// 解码 JSON 报文。
pub fn decode_payload(payload: &[u8]) -> Result<DecodedMessage, PayloadError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|err| PayloadError::InvalidJson(err.to_string()))?;
    let Value::Object(root) = value else {
        return Err(PayloadError::NotObject);
    };

    let device_ref = DEVICE_KEYS
        .iter()
        .find_map(|key| root.get(*key).and_then(identifier));
    let message_ts = TIMESTAMP_KEYS
        .iter()
        .find_map(|key| root.get(*key))
        .and_then(parse_timestamp_ms);

    let mut decoded = DecodedMessage {
        device_ref,
        ..Default::default()
    };

    match root.get(READINGS_KEY) {
        Some(Value::Array(items)) => {
            if items.is_empty() {
                return Err(PayloadError::NoReadings);
            }
            let mut shared = Metadata::new();
            collect_metadata(&root, &mut shared);
            for (index, item) in items.iter().enumerate() {
                let Value::Object(fields) = item else {
                    decoded
                        .invalid
                        .push((index, "reading is not an object".to_string()));
                    continue;
                };
                match decode_reading(index, fields, message_ts) {
                    Ok(mut reading) => {
                        for (key, value) in &shared {
                            reading
                                .metadata
                                .entry(key.clone())
                                .or_insert_with(|| value.clone());
                        }
                        decoded.readings.push(reading);
                    }
                    Err(reason) => decoded.invalid.push((index, reason)),
                }
            }
        }
        Some(_) => return Err(PayloadError::NoReadings),
        None => {
            let has_metric = METRIC_KEYS.iter().any(|key| root.contains_key(*key));
            if !has_metric && !root.contains_key(VALUE_KEY) {
                return Err(PayloadError::NoReadings);
            }
            match decode_reading(0, &root, message_ts) {
                Ok(reading) => decoded.readings.push(reading),
                Err(reason) => decoded.invalid.push((0, reason)),
            }
        }
    }
    Ok(decoded)
}

fn decode_reading(
    index: usize,
    fields: &Map<String, Value>,
    default_ts: Option<i64>,
) -> Result<DecodedReading, String> {
    let metric_name = METRIC_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "metric_name required".to_string())?
        .to_string();
    let value = fields
        .get(VALUE_KEY)
        .ok_or_else(|| "value required".to_string())
        .and_then(|value| parse_decimal(value).ok_or_else(|| "value is not numeric".to_string()))?;
    let unit = fields
        .get(UNIT_KEY)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let quality = match fields.get(QUALITY_KEY) {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_i64()
                .ok_or_else(|| "quality is not an integer".to_string())?,
        ),
    };
    let ts_ms = match TIMESTAMP_KEYS.iter().find_map(|key| fields.get(*key)) {
        None | Some(Value::Null) => default_ts,
        Some(value) => {
            Some(parse_timestamp_ms(value).ok_or_else(|| "invalid timestamp".to_string())?)
        }
    };
    let mut metadata = Metadata::new();
    collect_metadata(fields, &mut metadata);
    if let Some(Value::Object(extra)) = fields.get(METADATA_KEY) {
        for (key, value) in extra {
            if let Some(value) = scalar(value) {
                metadata.insert(key.clone(), value);
            }
        }
    }
    Ok(DecodedReading {
        index,
        metric_name,
        value,
        unit,
        quality,
        ts_ms,
        metadata,
    })
}

fn is_known_key(key: &str) -> bool {
    DEVICE_KEYS.contains(&key)
        || METRIC_KEYS.contains(&key)
        || TIMESTAMP_KEYS.contains(&key)
        || matches!(
            key,
            VALUE_KEY | UNIT_KEY | QUALITY_KEY | READINGS_KEY | METADATA_KEY
        )
}

fn collect_metadata(fields: &Map<String, Value>, metadata: &mut Metadata) {
    for (key, value) in fields {
        if is_known_key(key) {
            continue;
        }
        if let Some(value) = scalar(value) {
            metadata.insert(key.clone(), value);
        }
    }
}

/// JSON 标量 → MetadataValue；null / 数组 / 对象返回 None。
pub fn scalar(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::Bool(v) => Some(MetadataValue::Bool(*v)),
        Value::Number(number) => number
            .as_i64()
            .map(MetadataValue::I64)
            .or_else(|| number.as_f64().map(MetadataValue::F64)),
        Value::String(v) => Some(MetadataValue::String(v.clone())),
        _ => None,
    }
}

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// 解析数值：JSON 数字或数字字符串（支持科学计数法）。
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(number) => {
            if let Some(v) = number.as_i64() {
                return Some(Decimal::from(v));
            }
            number.to_string()
        }
        Value::String(v) => v.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// 解析时间戳为 Unix 毫秒。
///
/// - 数字：绝对值不超过 2e10 视为秒，否则视为毫秒
/// - 字符串：RFC 3339，或不带时区的 `YYYY-MM-DDTHH:MM:SS[.fff]`（按 UTC），或数字字符串
pub fn parse_timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_f64().and_then(number_to_ms),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.timestamp_millis());
            }
            if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(parsed.and_utc().timestamp_millis());
            }
            text.parse::<f64>().ok().and_then(number_to_ms)
        }
        _ => None,
    }
}

fn number_to_ms(raw: f64) -> Option<i64> {
    if !raw.is_finite() {
        return None;
    }
    let ms = if raw.abs() <= SECONDS_THRESHOLD {
        raw * 1000.0
    } else {
        raw
    };
    Some(ms.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_batch_form_with_shared_timestamp() {
        let payload = json!({
            "device_id": "SN-1",
            "timestamp": "2024-05-01T10:00:00Z",
            "firmware": "1.2.0",
            "readings": [
                { "metric_name": "voltage", "value": 230.5, "unit": "V" },
                { "metricName": "power", "value": "1.25", "unit": "kW", "ts": 1714557660 },
                { "metric_name": "current" },
                "bogus"
            ]
        });
        let decoded = decode_payload(payload.to_string().as_bytes()).expect("decoded");
        assert_eq!(decoded.device_ref.as_deref(), Some("SN-1"));
        assert_eq!(decoded.readings.len(), 2);
        assert_eq!(decoded.readings[0].ts_ms, Some(1_714_557_600_000));
        assert_eq!(decoded.readings[1].ts_ms, Some(1_714_557_660_000));
        assert_eq!(decoded.readings[1].value, Decimal::new(125, 2));
        assert_eq!(
            decoded.readings[0].metadata.get("firmware"),
            Some(&MetadataValue::String("1.2.0".into()))
        );
        assert_eq!(decoded.invalid.len(), 2);
        assert_eq!(decoded.invalid[0].0, 2);
    }

    #[test]
    fn decodes_single_legacy_form() {
        let payload = br#"{"serialNumber": 42, "sensorType": "temperature", "value": 21.5, "severity": "info"}"#;
        let decoded = decode_payload(payload).expect("decoded");
        assert_eq!(decoded.device_ref.as_deref(), Some("42"));
        assert_eq!(decoded.readings[0].metric_name, "temperature");
        assert_eq!(decoded.readings[0].value.to_string(), "21.5");
        assert_eq!(decoded.readings[0].ts_ms, None);
        assert!(decoded.readings[0].metadata.contains_key("severity"));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            decode_payload(b"not json"),
            Err(PayloadError::InvalidJson(_))
        ));
        assert_eq!(decode_payload(b"[1,2]").unwrap_err(), PayloadError::NotObject);
        assert_eq!(
            decode_payload(br#"{"device_id":"a","readings":[]}"#).unwrap_err(),
            PayloadError::NoReadings
        );
        assert_eq!(
            decode_payload(br#"{"device_id":"a","status":"online"}"#).unwrap_err(),
            PayloadError::NoReadings
        );
    }

    #[test]
    fn timestamp_units() {
        assert_eq!(parse_timestamp_ms(&json!(1_700_000_000)), Some(1_700_000_000_000));
        assert_eq!(
            parse_timestamp_ms(&json!(1_700_000_000_123i64)),
            Some(1_700_000_000_123)
        );
        assert_eq!(
            parse_timestamp_ms(&json!("2024-01-01T00:00:00.500")),
            Some(1_704_067_200_500)
        );
        assert_eq!(parse_timestamp_ms(&json!("yesterday")), None);
    }

    #[test]
    fn decimal_sources() {
        assert_eq!(parse_decimal(&json!(7)), Some(Decimal::from(7)));
        assert_eq!(parse_decimal(&json!("1e3")), Some(Decimal::from(1000)));
        assert_eq!(parse_decimal(&json!(true)), None);
    }
}
