#![allow(dead_code)]

use async_trait::async_trait;
use domain::RawEvent;
use iot_ingest::{BusConnection, BusConnector, BusMessage, IngestError, RawEventHandler};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub enum Step {
    Message(&'static str, Vec<u8>),
    Drop,
}

pub fn message(topic: &'static str, payload: &str) -> Step {
    Step::Message(topic, payload.as_bytes().to_vec())
}

/// 按脚本依次给出连接；`None` 或脚本耗尽表示连接失败。
#[derive(Default)]
pub struct FakeConnector {
    scripts: Mutex<VecDeque<Option<Vec<Step>>>>,
    pub connects: AtomicU32,
    pub subscriptions: Arc<Mutex<Vec<Vec<String>>>>,
    pub closed: Arc<AtomicU32>,
}

impl FakeConnector {
    pub fn new(scripts: Vec<Option<Vec<Step>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.subscriptions.lock().expect("lock").clone()
    }
}

#[async_trait]
impl BusConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, IngestError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().expect("lock").pop_front().flatten();
        let Some(steps) = script else {
            return Err(IngestError::Connection("connection refused".to_string()));
        };
        Ok(Box::new(FakeConnection {
            steps: steps.into(),
            subscriptions: self.subscriptions.clone(),
            closed: self.closed.clone(),
        }))
    }
}

struct FakeConnection {
    steps: VecDeque<Step>,
    subscriptions: Arc<Mutex<Vec<Vec<String>>>>,
    closed: Arc<AtomicU32>,
}

#[async_trait]
impl BusConnection for FakeConnection {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), IngestError> {
        self.subscriptions
            .lock()
            .expect("lock")
            .push(topics.to_vec());
        Ok(())
    }

    async fn next_message(&mut self) -> Result<BusMessage, IngestError> {
        match self.steps.pop_front() {
            Some(Step::Message(topic, payload)) => Ok(BusMessage {
                topic: topic.to_string(),
                payload,
            }),
            Some(Step::Drop) => Err(IngestError::Connection("connection reset".to_string())),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self, _topics: &[String]) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<RawEvent>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<RawEvent> {
        self.events.lock().expect("lock").clone()
    }
}

#[async_trait]
impl RawEventHandler for RecordingHandler {
    async fn handle(&self, event: RawEvent) -> Result<(), IngestError> {
        self.events.lock().expect("lock").push(event);
        Ok(())
    }
}

/// 轮询直到条件成立（最多 2 秒）。
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(check(), "condition not reached in time");
}
