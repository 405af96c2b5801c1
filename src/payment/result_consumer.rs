//! Payment result consumer
//!
//! Applies `payment.completed` / `payment.failed` events to the stored
//! payment. The update is a CAS from PENDING, so redelivered or late events
//! for a payment that already settled change nothing.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::db::PaymentStore;
use super::error::PaymentError;
use super::types::{PaymentStatus, Settlement};
use crate::relay::{BrokerMessage, PaymentEvent, Subscription};

pub struct PaymentResultConsumer {
    store: Arc<dyn PaymentStore>,
}

impl PaymentResultConsumer {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    /// Apply one result message. Returns whether the payment changed.
    pub async fn handle(&self, message: &BrokerMessage) -> Result<bool, PaymentError> {
        let event: PaymentEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(topic = %message.topic, key = %message.key, error = %e, "Skipping undecodable result event");
                return Ok(false);
            }
        };

        let settlement = match event.status {
            PaymentStatus::Completed => Settlement::completed(event.journal_entry_id),
            PaymentStatus::Failed => Settlement::failed(
                event
                    .failure_reason
                    .unwrap_or_else(|| "ledger reported failure".to_string()),
            ),
            PaymentStatus::Pending => {
                warn!(payment_id = %event.payment_id, topic = %message.topic, "Ignoring non-terminal result event");
                return Ok(false);
            }
        };

        let applied = self
            .store
            .update_status_if(event.payment_id, PaymentStatus::Pending, &settlement)
            .await?;
        if applied {
            info!(payment_id = %event.payment_id, status = %settlement.status, "Payment settled");
        } else {
            debug!(payment_id = %event.payment_id, "Duplicate or late result event, payment unchanged");
        }
        Ok(applied)
    }

    /// Consume both result topics until the broker goes away
    pub async fn run(&self, mut completed: Subscription, mut failed: Subscription) {
        info!(
            topics = ?[completed.topic(), failed.topic()],
            "Starting payment result consumer"
        );
        let (mut completed_open, mut failed_open) = (true, true);

        while completed_open || failed_open {
            let message = tokio::select! {
                m = completed.recv(), if completed_open => match m {
                    Some(m) => m,
                    None => { completed_open = false; continue; }
                },
                m = failed.recv(), if failed_open => match m {
                    Some(m) => m,
                    None => { failed_open = false; continue; }
                },
            };
            if let Err(e) = self.handle(&message).await {
                // left PENDING; the recovery worker settles it
                warn!(key = %message.key, error = %e, "Failed to apply result event");
            }
        }
        info!("Payment result consumer stopped");
    }
}
