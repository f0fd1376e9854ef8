//! telemetry_data 表结构初始化

use crate::error::StorageError;
use sqlx::{PgPool, Row};

const CREATE_TABLE: &str = r#"create table if not exists telemetry_data (
    id uuid not null default gen_random_uuid(),
    "timestamp" timestamptz not null,
    device_id uuid not null references device(id) on delete cascade,
    metric_name varchar(50) not null,
    value numeric(18, 6) not null,
    unit varchar(20) not null,
    quality integer not null default 100,
    metadata jsonb
)"#;

const CREATE_INDEXES: [&str; 3] = [
    r#"create unique index if not exists ux_telemetry_device_metric_time
       on telemetry_data (device_id, metric_name, "timestamp")"#,
    r#"create index if not exists ix_telemetry_time on telemetry_data ("timestamp")"#,
    r#"create index if not exists ix_telemetry_metric on telemetry_data (metric_name, "timestamp")"#,
];

/// 建表、建索引；安装了 TimescaleDB 时转换为 hypertable。
///
/// `require_timescale` 为 true 且扩展缺失时返回错误（启动期致命）。
pub async fn ensure_telemetry_schema(
    pool: &PgPool,
    require_timescale: bool,
) -> Result<(), StorageError> {
    sqlx::query(CREATE_TABLE).execute(pool).await?;
    for statement in CREATE_INDEXES {
        sqlx::query(statement).execute(pool).await?;
    }

    let row = sqlx::query(
        "select exists(select 1 from pg_extension where extname = 'timescaledb') as installed",
    )
    .fetch_one(pool)
    .await?;
    let installed: bool = row.try_get("installed")?;
    if !installed {
        if require_timescale {
            return Err(StorageError::new("timescaledb extension not installed"));
        }
        return Ok(());
    }
    sqlx::query(
        "select create_hypertable('telemetry_data', 'timestamp', \
         if_not_exists => true, migrate_data => true)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
