//! Payment event schema and topic names

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payment::types::{Payment, PaymentStatus};

pub const PAYMENT_CREATED: &str = "payment.created";
pub const PAYMENT_COMPLETED: &str = "payment.completed";
pub const PAYMENT_FAILED: &str = "payment.failed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub payment_id: Uuid,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub description: String,
    pub status: PaymentStatus,
    pub timestamp: DateTime<Utc>,
    /// Set on payment.completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_entry_id: Option<Uuid>,
    /// Set on payment.failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl PaymentEvent {
    /// Broker partition key
    pub fn key(&self) -> String {
        self.payment_id.to_string()
    }

    pub fn completed(mut self, journal_entry_id: Uuid) -> Self {
        self.status = PaymentStatus::Completed;
        self.journal_entry_id = Some(journal_entry_id);
        self.failure_reason = None;
        self.timestamp = Utc::now();
        self
    }

    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.status = PaymentStatus::Failed;
        self.journal_entry_id = None;
        self.failure_reason = Some(reason.into());
        self.timestamp = Utc::now();
        self
    }
}

impl From<&Payment> for PaymentEvent {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            from_account_id: payment.from_account_id,
            to_account_id: payment.to_account_id,
            amount: payment.amount,
            currency: payment.currency.clone(),
            description: payment.description.clone(),
            status: payment.status,
            timestamp: Utc::now(),
            journal_entry_id: payment.journal_entry_id,
            failure_reason: payment.failure_reason.clone(),
        }
    }
}
