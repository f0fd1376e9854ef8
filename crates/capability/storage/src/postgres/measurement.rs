//! Postgres 时序写入实现

use crate::error::StorageError;
use crate::models::{AggregateRecord, LatestRecord, TelemetryQuery, TelemetryRecord, TimeOrder};
use crate::traits::TelemetryStore;
use domain::{Measurement, Metadata, MetadataValue};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

const INSERT_PREFIX: &str =
    r#"insert into telemetry_data ("timestamp", device_id, metric_name, value, unit, quality, metadata) "#;

const SELECT_COLUMNS: &str = r#"select device_id::text as device_id, metric_name, value, unit, quality,
    (extract(epoch from "timestamp") * 1000)::bigint as ts_ms
    from telemetry_data"#;

pub struct PgTelemetryStore {
    pub pool: PgPool,
}

impl PgTelemetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn metadata_json(metadata: &Metadata) -> Option<String> {
    if metadata.is_empty() {
        return None;
    }
    let object: serde_json::Map<String, serde_json::Value> = metadata
        .iter()
        .map(|(key, value)| {
            let value = match value {
                MetadataValue::Bool(v) => serde_json::Value::Bool(*v),
                MetadataValue::I64(v) => serde_json::Value::from(*v),
                MetadataValue::F64(v) => serde_json::Value::from(*v),
                MetadataValue::String(v) => serde_json::Value::String(v.clone()),
            };
            (key.clone(), value)
        })
        .collect();
    Some(serde_json::Value::Object(object).to_string())
}

/// 设备主键是 uuid；无法解析的标识不可能命中任何行。
fn device_uuid(device_id: &str) -> Option<Uuid> {
    Uuid::parse_str(device_id.trim()).ok()
}

fn epoch_seconds(ts_ms: i64) -> f64 {
    ts_ms as f64 / 1000.0
}

fn push_rows<'a>(builder: &mut QueryBuilder<'a, Postgres>, items: &'a [Measurement]) {
    builder.push_values(items, |mut row, item| {
        row.push("to_timestamp(")
            .push_bind_unseparated(epoch_seconds(item.ts_ms()))
            .push_unseparated(")")
            .push_bind(item.device_id())
            .push_unseparated("::uuid")
            .push_bind(item.metric_name())
            .push_bind(item.value())
            .push_bind(item.unit())
            .push_bind(i32::from(item.quality()))
            .push_bind(metadata_json(item.metadata()))
            .push_unseparated("::jsonb");
    });
}

fn record_from_row(row: &PgRow) -> Result<TelemetryRecord, StorageError> {
    Ok(TelemetryRecord {
        device_id: row.try_get("device_id")?,
        metric_name: row.try_get("metric_name")?,
        value: row.try_get("value")?,
        unit: row.try_get("unit")?,
        quality: row.try_get("quality")?,
        ts_ms: row.try_get("ts_ms")?,
    })
}

#[async_trait::async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn insert_batch(&self, items: &[Measurement]) -> Result<u64, StorageError> {
        if items.is_empty() {
            return Ok(0);
        }
        let mut builder = QueryBuilder::<Postgres>::new(INSERT_PREFIX);
        push_rows(&mut builder, items);
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn insert_one(&self, item: &Measurement) -> Result<(), StorageError> {
        let mut builder = QueryBuilder::<Postgres>::new(INSERT_PREFIX);
        push_rows(&mut builder, std::slice::from_ref(item));
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn query(&self, query: TelemetryQuery) -> Result<Vec<TelemetryRecord>, StorageError> {
        let limit = query.limit.max(0);
        let Some(device) = device_uuid(&query.device_id) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }
        let order_by = match query.order {
            TimeOrder::Asc => "asc",
            TimeOrder::Desc => "desc",
        };
        let sql = format!(
            "{SELECT_COLUMNS} \
             where device_id = $1 \
             and ($2::text is null or metric_name = $2) \
             and ($3::float8 is null or \"timestamp\" >= to_timestamp($3)) \
             and ($4::float8 is null or \"timestamp\" <= to_timestamp($4)) \
             order by \"timestamp\" {order_by} \
             limit $5"
        );
        let rows = sqlx::query(&sql)
            .bind(device)
            .bind(query.metric_name.as_deref())
            .bind(query.from_ms.map(epoch_seconds))
            .bind(query.to_ms.map(epoch_seconds))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn latest(
        &self,
        device_id: &str,
        metric_name: Option<&str>,
    ) -> Result<Vec<LatestRecord>, StorageError> {
        let Some(device) = device_uuid(device_id) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "select distinct on (metric_name) * from ({SELECT_COLUMNS} \
             where device_id = $1 \
             and ($2::text is null or metric_name = $2)) as t \
             order by metric_name, ts_ms desc"
        );
        let rows = sqlx::query(&sql)
            .bind(device)
            .bind(metric_name)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn aggregate(
        &self,
        device_id: &str,
        metric_name: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Option<AggregateRecord>, StorageError> {
        let Some(device) = device_uuid(device_id) else {
            return Ok(None);
        };
        let row = sqlx::query(
            "select min(value) as min, max(value) as max, round(avg(value), 6) as avg, \
             sum(value) as sum, count(*) as count \
             from telemetry_data \
             where device_id = $1 and metric_name = $2 \
             and \"timestamp\" >= to_timestamp($3) and \"timestamp\" <= to_timestamp($4)",
        )
        .bind(device)
        .bind(metric_name)
        .bind(epoch_seconds(from_ms))
        .bind(epoch_seconds(to_ms))
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("count")?;
        if count == 0 {
            return Ok(None);
        }
        let min: Option<Decimal> = row.try_get("min")?;
        let max: Option<Decimal> = row.try_get("max")?;
        let avg: Option<Decimal> = row.try_get("avg")?;
        let sum: Option<Decimal> = row.try_get("sum")?;
        Ok(Some(AggregateRecord {
            min: min.unwrap_or_default(),
            max: max.unwrap_or_default(),
            avg: avg.unwrap_or_default(),
            sum: sum.unwrap_or_default(),
            count,
        }))
    }

    async fn delete_before(&self, cutoff_ms: i64) -> Result<u64, StorageError> {
        let result =
            sqlx::query("delete from telemetry_data where \"timestamp\" < to_timestamp($1)")
                .bind(epoch_seconds(cutoff_ms))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
