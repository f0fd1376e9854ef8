//! 总线连接抽象。

use crate::IngestError;
use async_trait::async_trait;

/// 总线上收到的一条消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// 建立连接（每次重连调用一次）。
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, IngestError>;
}

/// 一条已建立的总线连接，由订阅任务独占。
#[async_trait]
pub trait BusConnection: Send {
    /// 订阅全部主题；不假设会话在重连后保留。
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), IngestError>;

    /// 下一条消息；连接断开时返回错误。
    async fn next_message(&mut self) -> Result<BusMessage, IngestError>;

    /// 退订并关闭（尽力而为）。
    async fn close(&mut self, topics: &[String]);
}
