//! Broker seam and the in-process broker
//!
//! [`EventPublisher`] is the only thing producers see. [`InMemoryBroker`]
//! implements it with one unbounded channel per subscriber; messages
//! published to a topic nobody subscribes to yet are held and handed to
//! the first subscriber. `set_available(false)` simulates an outage: every
//! publish fails until it is switched back on.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("publish to {0} timed out")]
    Timeout(String),

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BrokerError {
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::Unavailable(_) => "BROKER_UNAVAILABLE",
            BrokerError::Timeout(_) => "BROKER_TIMEOUT",
            BrokerError::Serialization(_) => "BROKER_SERIALIZATION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError>;
}

/// Receiving end of one topic subscription
pub struct Subscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<BrokerMessage>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message; `None` once the broker is dropped
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for tests and draining
    pub fn try_recv(&mut self) -> Option<BrokerMessage> {
        self.rx.try_recv().ok()
    }
}

#[derive(Default)]
struct Topic {
    subscribers: Vec<mpsc::UnboundedSender<BrokerMessage>>,
    backlog: Vec<BrokerMessage>,
}

pub struct InMemoryBroker {
    topics: DashMap<String, Topic>,
    available: AtomicBool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut entry = self.topics.entry(topic.to_string()).or_default();
        for message in entry.backlog.drain(..) {
            // rx is alive in this scope
            let _ = tx.send(message);
        }
        entry.subscribers.push(tx);
        debug!(topic, subscribers = entry.subscribers.len(), "Subscribed");
        Subscription {
            topic: topic.to_string(),
            rx,
        }
    }

    /// Messages waiting for a first subscriber
    pub fn backlog_len(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|t| t.backlog.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if !self.is_available() {
            return Err(BrokerError::Unavailable(format!("topic {}", topic)));
        }

        let message = BrokerMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        };

        let mut entry = self.topics.entry(topic.to_string()).or_default();
        entry
            .subscribers
            .retain(|tx| tx.send(message.clone()).is_ok());
        if entry.subscribers.is_empty() {
            entry.backlog.push(message);
        }
        trace!(topic, key, "Published");
        Ok(())
    }
}
