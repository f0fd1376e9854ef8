//! 总线订阅任务：连接状态机、断线重连与消息分发。

use crate::backoff::ReconnectBackoff;
use crate::connection::{BusConnection, BusConnector, BusMessage};
use crate::topic::{TopicKind, route_topic};
use crate::{IngestError, RawEventHandler};
use domain::RawEvent;
use iot_pipeline::ShutdownSignal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 订阅状态。
///
/// `Disconnected → Connecting → Subscribed → (出错) Reconnecting → Connecting`，
/// 只有关停会进入 `Stopped`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub topics: Vec<String>,
    pub topic_prefix: String,
    pub reconnect_backoff: Duration,
    pub reconnect_backoff_max: Duration,
    /// 单次连接 + 订阅的上限。
    pub connect_timeout: Duration,
    /// 启动阶段的连接尝试次数，全部失败视为致命错误。
    pub startup_attempts: u32,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            topic_prefix: "iot".to_string(),
            reconnect_backoff: Duration::from_secs(1),
            reconnect_backoff_max: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            startup_attempts: 5,
        }
    }
}

/// 订阅任务计数快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStatsSnapshot {
    pub messages: u64,
    pub status_messages: u64,
    pub reconnects: u64,
}

#[derive(Default)]
struct SubscriberStats {
    messages: AtomicU64,
    status_messages: AtomicU64,
    reconnects: AtomicU64,
}

enum SessionEnd {
    Shutdown,
    Lost(IngestError),
}

pub struct Subscriber {
    connector: Arc<dyn BusConnector>,
    handler: Arc<dyn RawEventHandler>,
    config: SubscriberConfig,
    state: watch::Sender<SubscriberState>,
    stats: SubscriberStats,
}

impl Subscriber {
    pub fn new(
        connector: Arc<dyn BusConnector>,
        handler: Arc<dyn RawEventHandler>,
        config: SubscriberConfig,
    ) -> Self {
        let (state, _) = watch::channel(SubscriberState::Disconnected);
        Self {
            connector,
            handler,
            config,
            state,
            stats: SubscriberStats::default(),
        }
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// 监听状态变化。
    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> SubscriberStatsSnapshot {
        SubscriberStatsSnapshot {
            messages: self.stats.messages.load(Ordering::Relaxed),
            status_messages: self.stats.status_messages.load(Ordering::Relaxed),
            reconnects: self.stats.reconnects.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, next: SubscriberState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(target: "iot.ingest", from = ?previous, to = ?next, "subscriber_state");
        }
    }

    fn backoff(&self) -> ReconnectBackoff {
        ReconnectBackoff::new(
            self.config.reconnect_backoff,
            self.config.reconnect_backoff_max,
        )
    }

    async fn connect_and_subscribe(&self) -> Result<Box<dyn BusConnection>, IngestError> {
        self.set_state(SubscriberState::Connecting);
        let attempt = async {
            let mut connection = self.connector.connect().await?;
            connection.subscribe(&self.config.topics).await?;
            Ok::<_, IngestError>(connection)
        };
        let connection = tokio::time::timeout(self.config.connect_timeout, attempt)
            .await
            .map_err(|_| IngestError::Timeout("connect"))??;
        self.set_state(SubscriberState::Subscribed);
        tracing::info!(
            target: "iot.ingest",
            topics = ?self.config.topics,
            "bus_subscribed"
        );
        Ok(connection)
    }

    /// 启动：有限次连接尝试，全部失败返回 `Unreachable`；成功后在后台运行订阅循环。
    pub async fn start(
        self: Arc<Self>,
        mut shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, IngestError> {
        let attempts = self.config.startup_attempts.max(1);
        let mut backoff = self.backoff();
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.connect_and_subscribe().await {
                Ok(connection) => {
                    let subscriber = self.clone();
                    return Ok(tokio::spawn(async move {
                        subscriber.run(connection, shutdown).await;
                    }));
                }
                Err(err) => {
                    tracing::warn!(
                        target: "iot.ingest",
                        attempt,
                        attempts,
                        error = %err,
                        "bus_connect_failed"
                    );
                    last_error = err.to_string();
                }
            }
            self.set_state(SubscriberState::Disconnected);
            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    _ = tokio::time::sleep(backoff.next_delay()) => {}
                }
            }
        }
        self.set_state(SubscriberState::Stopped);
        Err(IngestError::Unreachable {
            attempts,
            reason: last_error,
        })
    }

    async fn run(&self, mut connection: Box<dyn BusConnection>, mut shutdown: ShutdownSignal) {
        let mut backoff = self.backoff();
        loop {
            match self.session(connection.as_mut(), &mut shutdown).await {
                SessionEnd::Shutdown => {
                    connection.close(&self.config.topics).await;
                    break;
                }
                SessionEnd::Lost(err) => {
                    tracing::warn!(target: "iot.ingest", error = %err, "bus_connection_lost");
                }
            }
            self.set_state(SubscriberState::Reconnecting);
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            iot_telemetry::record_bus_reconnect();
            match self.reconnect(&mut backoff, &mut shutdown).await {
                Some(next) => connection = next,
                None => break,
            }
        }
        self.set_state(SubscriberState::Stopped);
        tracing::info!(target: "iot.ingest", "subscriber_stopped");
    }

    /// 重连直到成功或关停。
    async fn reconnect(
        &self,
        backoff: &mut ReconnectBackoff,
        shutdown: &mut ShutdownSignal,
    ) -> Option<Box<dyn BusConnection>> {
        loop {
            let delay = backoff.next_delay();
            tracing::info!(
                target: "iot.ingest",
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "bus_reconnect_scheduled"
            );
            tokio::select! {
                biased;
                _ = shutdown.wait() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            let outcome = tokio::select! {
                biased;
                _ = shutdown.wait() => return None,
                outcome = self.connect_and_subscribe() => outcome,
            };
            match outcome {
                Ok(connection) => {
                    backoff.reset();
                    return Some(connection);
                }
                Err(err) => {
                    self.set_state(SubscriberState::Reconnecting);
                    tracing::warn!(
                        target: "iot.ingest",
                        attempt = backoff.attempt(),
                        error = %err,
                        "bus_reconnect_failed"
                    );
                }
            }
        }
    }

    async fn session(
        &self,
        connection: &mut dyn BusConnection,
        shutdown: &mut ShutdownSignal,
    ) -> SessionEnd {
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.wait() => return SessionEnd::Shutdown,
                message = connection.next_message() => message,
            };
            match message {
                Ok(message) => self.dispatch(message).await,
                Err(err) => return SessionEnd::Lost(err),
            }
        }
    }

    /// 分发一条消息；处理失败只记录，不影响连接。
    async fn dispatch(&self, message: BusMessage) {
        self.stats.messages.fetch_add(1, Ordering::Relaxed);
        iot_telemetry::record_raw_event();
        let route = route_topic(&self.config.topic_prefix, &message.topic);
        if route.kind == TopicKind::Status {
            self.stats.status_messages.fetch_add(1, Ordering::Relaxed);
            iot_telemetry::record_status_message();
            tracing::debug!(
                target: "iot.ingest",
                topic = %message.topic,
                bytes = message.payload.len(),
                "status_message"
            );
            return;
        }
        let event = RawEvent {
            topic: message.topic,
            device_hint: route.device_hint,
            gateway_id: route.gateway_id,
            payload: message.payload,
            received_at_ms: domain::now_epoch_ms(),
        };
        if let Err(err) = self.handler.handle(event).await {
            tracing::debug!(target: "iot.ingest", error = %err, "message_dropped");
        }
    }
}
