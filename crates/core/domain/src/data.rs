use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// 指标名最大长度（与 telemetry_data.metric_name 列宽一致）。
pub const MAX_METRIC_NAME_LEN: usize = 50;
/// 单位最大长度（与 telemetry_data.unit 列宽一致）。
pub const MAX_UNIT_LEN: usize = 20;
/// 未上报质量时的默认值。
pub const DEFAULT_QUALITY: u8 = 100;

/// 总线输入的原始消息。
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub topic: String,
    /// 从 topic 中解析出的设备标识（`.../devices/{id}/...`）。
    pub device_hint: Option<String>,
    /// 从 topic 中解析出的网关标识（`.../gateways/{id}/...`）。
    pub gateway_id: Option<String>,
    pub payload: Vec<u8>,
    pub received_at_ms: i64,
}

/// 元数据标量值（仅透传，不做校验）。
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// 构造 Measurement 的输入。
///
/// 时间戳与质量允许缺省，由 [`Measurement::new`] 补齐。
#[derive(Debug, Clone, Default)]
pub struct MeasurementDraft {
    pub device_id: String,
    pub metric_name: String,
    pub value: Decimal,
    pub unit: String,
    pub quality: Option<i64>,
    pub ts_ms: Option<i64>,
    pub metadata: Metadata,
}

/// Measurement 校验错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeasurementError {
    #[error("device_id required")]
    MissingDevice,
    #[error("metric_name required")]
    MissingMetric,
    #[error("metric_name too long: {0}")]
    MetricTooLong(usize),
    #[error("unit too long: {0}")]
    UnitTooLong(usize),
    #[error("quality out of range: {0}")]
    QualityOutOfRange(i64),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// 一条设备读数。构造后不可变。
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    device_id: String,
    metric_name: String,
    value: Decimal,
    unit: String,
    quality: u8,
    ts_ms: i64,
    metadata: Metadata,
}

impl Measurement {
    /// 校验并构造读数。
    ///
    /// - 来源未给时间戳时使用 `received_at_ms`，给了则原样保留（允许乱序与历史补录）
    /// - 质量缺省为 100
    pub fn new(draft: MeasurementDraft, received_at_ms: i64) -> Result<Self, MeasurementError> {
        let device_id = draft.device_id.trim().to_string();
        if device_id.is_empty() {
            return Err(MeasurementError::MissingDevice);
        }
        let metric_name = draft.metric_name.trim().to_string();
        if metric_name.is_empty() {
            return Err(MeasurementError::MissingMetric);
        }
        let metric_len = metric_name.chars().count();
        if metric_len > MAX_METRIC_NAME_LEN {
            return Err(MeasurementError::MetricTooLong(metric_len));
        }
        let unit_len = draft.unit.chars().count();
        if unit_len > MAX_UNIT_LEN {
            return Err(MeasurementError::UnitTooLong(unit_len));
        }
        let quality = match draft.quality {
            None => DEFAULT_QUALITY,
            Some(value) if (0..=100).contains(&value) => value as u8,
            Some(value) => return Err(MeasurementError::QualityOutOfRange(value)),
        };
        let ts_ms = match draft.ts_ms {
            None => received_at_ms,
            Some(value) if value > 0 => value,
            Some(value) => return Err(MeasurementError::InvalidTimestamp(value)),
        };
        Ok(Self {
            device_id,
            metric_name,
            value: draft.value,
            unit: draft.unit,
            quality,
            ts_ms,
            metadata: draft.metadata,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn ts_ms(&self) -> i64 {
        self.ts_ms
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn draft(metric: &str) -> MeasurementDraft {
        MeasurementDraft {
            device_id: "device-1".to_string(),
            metric_name: metric.to_string(),
            value: Decimal::from_str("230.125").expect("decimal"),
            unit: "V".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_fill_quality_and_timestamp() {
        let measurement = Measurement::new(draft("voltage"), 1_700_000_000_000).expect("valid");
        assert_eq!(measurement.quality(), DEFAULT_QUALITY);
        assert_eq!(measurement.ts_ms(), 1_700_000_000_000);
        assert_eq!(measurement.value().to_string(), "230.125");
    }

    #[test]
    fn source_timestamp_is_preserved() {
        let mut input = draft("voltage");
        input.ts_ms = Some(1_600_000_000_000);
        let measurement = Measurement::new(input, 1_700_000_000_000).expect("valid");
        assert_eq!(measurement.ts_ms(), 1_600_000_000_000);
    }

    #[test]
    fn rejects_invalid_fields() {
        assert_eq!(
            Measurement::new(draft("  "), 1).unwrap_err(),
            MeasurementError::MissingMetric
        );

        let mut input = draft("power");
        input.quality = Some(101);
        assert_eq!(
            Measurement::new(input, 1).unwrap_err(),
            MeasurementError::QualityOutOfRange(101)
        );

        let mut input = draft("power");
        input.device_id = String::new();
        assert_eq!(
            Measurement::new(input, 1).unwrap_err(),
            MeasurementError::MissingDevice
        );

        let long_metric = "m".repeat(MAX_METRIC_NAME_LEN + 1);
        assert!(matches!(
            Measurement::new(draft(&long_metric), 1),
            Err(MeasurementError::MetricTooLong(_))
        ));
    }
}
