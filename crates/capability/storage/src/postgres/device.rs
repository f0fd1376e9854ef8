//! Postgres 设备注册表实现

use crate::error::StorageError;
use crate::traits::DeviceRegistry;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgDeviceRegistry {
    pub pool: PgPool,
}

impl PgDeviceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DeviceRegistry for PgDeviceRegistry {
    async fn resolve(&self, external_id: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query(
            "select id::text as id from device \
             where device_id = $1 or id = $2 \
             order by (device_id = $1) desc \
             limit 1",
        )
        .bind(external_id)
        .bind(Uuid::parse_str(external_id).ok())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("id")?)),
            None => Ok(None),
        }
    }
}
