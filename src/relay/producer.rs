//! Payment event producer

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::broker::{BrokerError, EventPublisher};
use super::events::PaymentEvent;

#[derive(Clone)]
pub struct PaymentEventProducer {
    publisher: Arc<dyn EventPublisher>,
    timeout: Duration,
}

impl PaymentEventProducer {
    pub fn new(publisher: Arc<dyn EventPublisher>, timeout: Duration) -> Self {
        Self { publisher, timeout }
    }

    /// Serialize and publish `event` to `topic`, keyed by payment id.
    /// The publish carries its own deadline.
    pub async fn publish(&self, topic: &str, event: &PaymentEvent) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(event)?;
        let key = event.key();
        match tokio::time::timeout(self.timeout, self.publisher.publish(topic, &key, payload)).await
        {
            Ok(result) => {
                result?;
                debug!(topic, payment_id = %event.payment_id, status = %event.status, "Payment event published");
                Ok(())
            }
            Err(_) => Err(BrokerError::Timeout(topic.to_string())),
        }
    }
}
