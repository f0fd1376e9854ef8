//! MQTT 连接（rumqttc）。

use crate::IngestError;
use crate::connection::{BusConnection, BusConnector, BusMessage};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeFilter,
};
use std::time::Duration;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT 连接配置。
#[derive(Debug, Clone)]
pub struct MqttConnectorConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 为空时生成 `iot-ingest-{uuid}`。
    pub client_id: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

pub struct MqttConnector {
    config: MqttConnectorConfig,
}

impl MqttConnector {
    pub fn new(config: MqttConnectorConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> MqttOptions {
        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("iot-ingest-{}", uuid::Uuid::new_v4().simple()));
        let mut options = MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(self.config.keep_alive.max(Duration::from_secs(5)));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }
        options
    }
}

#[async_trait]
impl BusConnector for MqttConnector {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, IngestError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);
        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            return Ok(());
                        }
                        return Err(IngestError::Connection(format!(
                            "connection refused: {:?}",
                            ack.code
                        )));
                    }
                    Ok(_) => {}
                    Err(err) => return Err(IngestError::Connection(err.to_string())),
                }
            }
        };
        match tokio::time::timeout(self.config.connect_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => return Err(IngestError::Timeout("connect")),
        }
        tracing::info!(
            target: "iot.ingest",
            host = %self.config.host,
            port = self.config.port,
            "bus_connected"
        );
        Ok(Box::new(MqttConnection { client, eventloop }))
    }
}

struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
}

#[async_trait]
impl BusConnection for MqttConnection {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), IngestError> {
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));
        self.client
            .subscribe_many(filters)
            .await
            .map_err(|err| IngestError::Subscribe(err.to_string()))
    }

    async fn next_message(&mut self) -> Result<BusMessage, IngestError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(BusMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    tracing::debug!(target: "iot.ingest", pkid = ack.pkid, "bus_suback");
                }
                Ok(_) => {}
                Err(err) => return Err(IngestError::Connection(err.to_string())),
            }
        }
    }

    async fn close(&mut self, topics: &[String]) {
        for topic in topics {
            if let Err(err) = self.client.unsubscribe(topic.clone()).await {
                tracing::debug!(target: "iot.ingest", topic = %topic, error = %err, "bus_unsubscribe_failed");
            }
        }
        if let Err(err) = self.client.disconnect().await {
            tracing::debug!(target: "iot.ingest", error = %err, "bus_disconnect_failed");
            return;
        }
        let eventloop = &mut self.eventloop;
        let flushed = tokio::time::timeout(CLOSE_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            tracing::warn!(target: "iot.ingest", "bus_close_timeout");
        }
    }
}
