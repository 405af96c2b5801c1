//! `payment.created` consumer
//!
//! Posts the transfer for each created payment and reports the outcome on
//! `payment.completed` or `payment.failed`. The journal entry reference is
//! the payment id, so a redelivered event finds the existing entry and
//! republishes the same completion instead of moving money twice.
//! Failed postings are reported, not retried. Each message is handled on
//! its own task; redeliveries of one payment are handled in order.

use std::sync::Arc;
use tracing::{info, warn};

use super::engine::JournalEngine;
use crate::payment::types::PaymentStatus;
use crate::relay::{
    BrokerError, BrokerMessage, KeyedDispatcher, PAYMENT_COMPLETED, PAYMENT_FAILED, PaymentEvent,
    PaymentEventProducer, Subscription,
};

pub struct PaymentCreatedConsumer {
    engine: Arc<JournalEngine>,
    producer: PaymentEventProducer,
}

impl PaymentCreatedConsumer {
    pub fn new(engine: Arc<JournalEngine>, producer: PaymentEventProducer) -> Self {
        Self { engine, producer }
    }

    /// Process one message. Errors only when the result could not be
    /// published; the payment then stays PENDING for the recovery worker.
    pub async fn handle(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let event: PaymentEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(key = %message.key, error = %e, "Skipping undecodable payment.created event");
                return Ok(());
            }
        };
        if event.status != PaymentStatus::Pending {
            warn!(payment_id = %event.payment_id, status = %event.status, "Skipping non-pending payment.created event");
            return Ok(());
        }

        let result = self
            .engine
            .post_transfer_in(
                event.from_account_id,
                event.to_account_id,
                event.amount,
                Some(&event.currency),
                &event.description,
                Some(event.payment_id.to_string()),
            )
            .await;

        match result {
            Ok(outcome) => {
                info!(
                    payment_id = %event.payment_id,
                    entry_id = %outcome.entry.id,
                    created = outcome.created,
                    "Payment posted to ledger"
                );
                let entry_id = outcome.entry.id;
                self.producer
                    .publish(PAYMENT_COMPLETED, &event.completed(entry_id))
                    .await
            }
            Err(e) => {
                warn!(
                    payment_id = %event.payment_id,
                    code = e.code(),
                    error = %e,
                    "Payment rejected by ledger"
                );
                let reason = format!("{}: {}", e.code(), e);
                self.producer
                    .publish(PAYMENT_FAILED, &event.failed(reason))
                    .await
            }
        }
    }

    pub async fn run(self: Arc<Self>, mut subscription: Subscription) {
        info!(topic = subscription.topic(), "Starting payment.created consumer");
        let dispatcher = KeyedDispatcher::default();
        while let Some(message) = subscription.recv().await {
            let consumer = self.clone();
            dispatcher
                .dispatch(message.key.clone(), async move {
                    if let Err(e) = consumer.handle(&message).await {
                        warn!(key = %message.key, code = e.code(), error = %e, "Could not publish payment result");
                    }
                })
                .await;
        }
        info!("payment.created consumer stopped");
    }
}
