//! 总线接入：MQTT 订阅、主题路由、断线重连，以及把消息送入采集管线。

pub mod backoff;
pub mod connection;
pub mod handler;
pub mod mqtt;
pub mod runtime;
pub mod subscriber;
pub mod topic;

pub use backoff::ReconnectBackoff;
pub use connection::{BusConnection, BusConnector, BusMessage};
pub use handler::{BufferingHandler, HandlerStatsSnapshot};
pub use mqtt::{MqttConnector, MqttConnectorConfig};
pub use runtime::IngestTasks;
pub use subscriber::{Subscriber, SubscriberConfig, SubscriberState, SubscriberStatsSnapshot};
pub use topic::{TopicKind, TopicRoute, route_topic};

use async_trait::async_trait;
use domain::RawEvent;

/// 接入错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("bus unreachable after {attempts} attempts: {reason}")]
    Unreachable { attempts: u32, reason: String },
    #[error("connection error: {0}")]
    Connection(String),
    #[error("subscribe error: {0}")]
    Subscribe(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("handler error: {0}")]
    Handler(String),
}

/// RawEvent 处理器（订阅任务每条消息调用一次，不得长时间阻塞）。
#[async_trait]
pub trait RawEventHandler: Send + Sync {
    async fn handle(&self, event: RawEvent) -> Result<(), IngestError>;
}
