//! 采集链路后台任务：刷盘任务与订阅任务的启动和有序关停。

use crate::IngestError;
use crate::subscriber::Subscriber;
use iot_pipeline::{FlushSummary, Pipeline, Shutdown};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// 刷盘任务只响应自己的停止信号，保证最终刷盘发生在订阅任务退出之后。
pub struct IngestTasks {
    shutdown: Shutdown,
    flusher_stop: Shutdown,
    flusher: JoinHandle<FlushSummary>,
    subscriber: Option<JoinHandle<()>>,
}

impl IngestTasks {
    /// 启动刷盘任务。`shutdown` 是订阅任务监听的关停信号。
    pub fn spawn(pipeline: &Pipeline, shutdown: Shutdown) -> Self {
        let (flusher_stop, stop) = Shutdown::new();
        Self {
            shutdown,
            flusher_stop,
            flusher: pipeline.spawn_flusher(stop),
            subscriber: None,
        }
    }

    /// 启动订阅任务；启动期连不上总线时返回 `Unreachable`。
    pub async fn start_subscriber(
        &mut self,
        subscriber: Arc<Subscriber>,
    ) -> Result<(), IngestError> {
        let task = subscriber.start(self.shutdown.signal()).await?;
        self.subscriber = Some(task);
        Ok(())
    }

    /// 关停：触发订阅关停并等待其退出（进行中的消息处理完成），再执行最终刷盘。
    pub async fn shutdown(self) -> FlushSummary {
        self.shutdown.trigger();
        if let Some(task) = self.subscriber
            && let Err(err) = task.await
        {
            tracing::error!(target: "iot.ingest", error = %err, "subscriber_join_failed");
        }
        self.flusher_stop.trigger();
        match self.flusher.await {
            Ok(summary) => {
                tracing::info!(
                    target: "iot.pipeline",
                    written = summary.written,
                    lost = summary.lost,
                    "final_drain_completed"
                );
                summary
            }
            Err(err) => {
                tracing::error!(target: "iot.pipeline", error = %err, "flusher_join_failed");
                FlushSummary::default()
            }
        }
    }
}
