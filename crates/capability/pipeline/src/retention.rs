//! 历史数据清理任务。

use crate::shutdown::ShutdownSignal;
use iot_storage::{StorageError, TelemetryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const DAY_MS: i64 = 86_400_000;

/// 清理参数。
#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    /// 保留天数，0 表示不清理。
    pub retention_days: u64,
    pub interval: Duration,
}

/// 计算截止时间（毫秒）。
pub fn retention_cutoff_ms(now_ms: i64, retention_days: u64) -> i64 {
    let days = i64::try_from(retention_days).unwrap_or(i64::MAX);
    now_ms.saturating_sub(days.saturating_mul(DAY_MS))
}

/// 执行一次清理。
pub async fn run_retention_once(
    store: &dyn TelemetryStore,
    retention_days: u64,
    now_ms: i64,
) -> Result<u64, StorageError> {
    let cutoff_ms = retention_cutoff_ms(now_ms, retention_days);
    let deleted = store.delete_before(cutoff_ms).await?;
    tracing::info!(target: "iot.pipeline", deleted, cutoff_ms, "retention_applied");
    Ok(deleted)
}

/// 启动周期清理任务；`retention_days == 0` 时返回 None。
pub fn spawn_retention(
    store: Arc<dyn TelemetryStore>,
    config: RetentionConfig,
    mut shutdown: ShutdownSignal,
) -> Option<JoinHandle<()>> {
    if config.retention_days == 0 {
        return None;
    }
    let interval = config.interval.max(Duration::from_secs(1));
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = domain::now_epoch_ms();
                    if let Err(err) = run_retention_once(store.as_ref(), config.retention_days, now).await {
                        tracing::warn!(target: "iot.pipeline", error = %err, "retention_failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Decimal, Measurement, MeasurementDraft};
    use iot_storage::InMemoryTelemetryStore;

    #[test]
    fn cutoff_subtracts_whole_days() {
        assert_eq!(retention_cutoff_ms(10 * DAY_MS, 3), 7 * DAY_MS);
        assert_eq!(retention_cutoff_ms(0, u64::MAX), -i64::MAX);
    }

    #[tokio::test]
    async fn deletes_rows_older_than_cutoff() {
        let store = InMemoryTelemetryStore::new();
        let rows: Vec<Measurement> = [DAY_MS, 5 * DAY_MS, 9 * DAY_MS]
            .into_iter()
            .map(|ts| {
                Measurement::new(
                    MeasurementDraft {
                        device_id: "dev-1".into(),
                        metric_name: "energy".into(),
                        value: Decimal::ONE,
                        unit: "kWh".into(),
                        ts_ms: Some(ts),
                        ..Default::default()
                    },
                    ts,
                )
                .expect("measurement")
            })
            .collect();
        store.insert_batch(&rows).await.expect("insert");
        let deleted = run_retention_once(&store, 3, 10 * DAY_MS)
            .await
            .expect("retention");
        assert_eq!(deleted, 2);
        assert_eq!(store.len(), 1);
    }
}
