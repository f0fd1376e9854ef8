//! Redis 实时数据写入实现

use crate::error::StorageError;
use crate::models::LatestRecord;
use crate::traits::RealtimeStore;
use domain::Measurement;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(serde::Serialize, serde::Deserialize)]
struct LastValuePayload {
    ts_ms: i64,
    value: Decimal,
    unit: String,
    quality: i32,
}

fn last_value_key(device_id: &str, metric_name: &str) -> String {
    format!("device:{}:metric:{}:last_value", device_id, metric_name)
}

fn parse_metric_from_key<'a>(key: &'a str, device_id: &str) -> Option<&'a str> {
    key.strip_prefix(&format!("device:{}:metric:", device_id))
        .and_then(|rest| rest.strip_suffix(":last_value"))
}

/// Redis 实时数据存储
pub struct RedisRealtimeStore {
    client: redis::Client,
    last_value_ttl_seconds: Option<u64>,
}

impl RedisRealtimeStore {
    pub fn new_with_ttl(client: redis::Client, last_value_ttl_seconds: Option<u64>) -> Self {
        Self {
            client,
            last_value_ttl_seconds,
        }
    }

    pub fn connect_with_ttl(
        redis_url: &str,
        last_value_ttl_seconds: Option<u64>,
    ) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)?;
        let ttl = last_value_ttl_seconds.filter(|value| *value > 0);
        Ok(Self::new_with_ttl(client, ttl))
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StorageError> {
        Ok(self.client.get_multiplexed_tokio_connection().await?)
    }
}

/// 同一批内每个 (设备, 指标) 只保留时间戳最大的一条。
fn newest_per_key(items: &[Measurement]) -> BTreeMap<String, &Measurement> {
    let mut newest: BTreeMap<String, &Measurement> = BTreeMap::new();
    for item in items {
        let key = last_value_key(item.device_id(), item.metric_name());
        match newest.get(&key) {
            Some(current) if current.ts_ms() > item.ts_ms() => {}
            _ => {
                newest.insert(key, item);
            }
        }
    }
    newest
}

#[async_trait::async_trait]
impl RealtimeStore for RedisRealtimeStore {
    async fn upsert_last_values(&self, items: &[Measurement]) -> Result<(), StorageError> {
        let newest = newest_per_key(items);
        if newest.is_empty() {
            return Ok(());
        }
        let mut connection = self.connection().await?;
        let keys: Vec<&String> = newest.keys().collect();
        let existing: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut connection)
            .await?;

        let mut pipe = redis::pipe();
        for ((key, item), current) in newest.iter().zip(existing) {
            let stale = current
                .and_then(|data| serde_json::from_str::<LastValuePayload>(&data).ok())
                .is_some_and(|stored| stored.ts_ms > item.ts_ms());
            if stale {
                continue;
            }
            let payload = LastValuePayload {
                ts_ms: item.ts_ms(),
                value: item.value(),
                unit: item.unit().to_string(),
                quality: i32::from(item.quality()),
            };
            let data = serde_json::to_string(&payload)?;
            match self.last_value_ttl_seconds {
                Some(ttl) => {
                    pipe.set_ex(key, data, ttl).ignore();
                }
                None => {
                    pipe.set(key, data).ignore();
                }
            }
        }
        pipe.query_async::<_, ()>(&mut connection).await?;
        Ok(())
    }

    async fn get_last_values(
        &self,
        device_id: &str,
        metric_name: Option<&str>,
    ) -> Result<Vec<LatestRecord>, StorageError> {
        let mut connection = self.connection().await?;
        let keys: Vec<String> = match metric_name {
            Some(metric) => vec![last_value_key(device_id, metric)],
            None => {
                let pattern = format!("device:{}:metric:*:last_value", device_id);
                let mut cursor: u64 = 0;
                let mut keys = Vec::new();
                loop {
                    let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut connection)
                        .await?;
                    keys.extend(batch);
                    if next_cursor == 0 {
                        break;
                    }
                    cursor = next_cursor;
                }
                keys.sort();
                keys
            }
        };

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(metric) = parse_metric_from_key(&key, device_id) else {
                continue;
            };
            let data: Option<String> = connection.get(&key).await?;
            let Some(data) = data else {
                continue;
            };
            let payload: LastValuePayload = serde_json::from_str(&data)?;
            items.push(LatestRecord {
                device_id: device_id.to_string(),
                metric_name: metric.to_string(),
                value: payload.value,
                unit: payload.unit,
                quality: payload.quality,
                ts_ms: payload.ts_ms,
            });
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::MeasurementDraft;

    fn reading(metric: &str, ts_ms: i64) -> Measurement {
        Measurement::new(
            MeasurementDraft {
                device_id: "d-1".into(),
                metric_name: metric.into(),
                value: Decimal::ONE,
                unit: "V".into(),
                ts_ms: Some(ts_ms),
                ..Default::default()
            },
            ts_ms,
        )
        .expect("measurement")
    }

    #[test]
    fn keys_round_trip_metric() {
        let key = last_value_key("d-1", "voltage");
        assert_eq!(parse_metric_from_key(&key, "d-1"), Some("voltage"));
        assert_eq!(parse_metric_from_key(&key, "d-2"), None);
    }

    #[test]
    fn newest_per_key_keeps_latest_timestamp() {
        let items = vec![reading("voltage", 30), reading("voltage", 10), reading("power", 5)];
        let newest = newest_per_key(&items);
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[&last_value_key("d-1", "voltage")].ts_ms(), 30);
    }
}
