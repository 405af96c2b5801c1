//! Payment model and transfer request validation

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::PaymentError;
use crate::money;

/// Payment lifecycle
///
/// ```text
/// PENDING ──▶ COMPLETED
///    │
///    └──────▶ FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    /// Terminal payments are never mutated again
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(PaymentError::DatabaseError(format!(
                "unknown payment status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    #[serde(rename = "payment_id")]
    pub id: Uuid,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub description: String,
    /// Ledger entry posted for this payment (reference_id = payment id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_entry_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// A fresh PENDING payment
    pub fn new(
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: Decimal,
        currency: String,
        description: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            from_account_id,
            to_account_id,
            amount,
            currency,
            status: PaymentStatus::Pending,
            description,
            journal_entry_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ledger reference correlating the journal entry with this payment
    pub fn reference_id(&self) -> String {
        self.id.to_string()
    }

    pub fn apply(&mut self, settlement: &Settlement) {
        self.status = settlement.status;
        self.journal_entry_id = settlement.journal_entry_id;
        self.failure_reason = settlement.failure_reason.clone();
        self.updated_at = Utc::now();
    }
}

/// Terminal outcome written onto a PENDING payment
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub status: PaymentStatus,
    pub journal_entry_id: Option<Uuid>,
    pub failure_reason: Option<String>,
}

impl Settlement {
    pub fn completed(journal_entry_id: Option<Uuid>) -> Self {
        Self {
            status: PaymentStatus::Completed,
            journal_entry_id,
            failure_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: PaymentStatus::Failed,
            journal_entry_id: None,
            failure_reason: Some(reason.into()),
        }
    }
}

/// `POST /transfer` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: String,
    pub to_account_id: String,
    pub amount: String,
    pub currency: String,
    #[serde(default)]
    pub description: String,
}

/// A request that passed every pre-persistence check
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTransfer {
    pub from: Uuid,
    pub to: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
}

impl TransferRequest {
    /// Checks run in a fixed order so each request gets one stable code:
    /// amount, distinct accounts, id format, currency.
    pub fn validate(&self) -> Result<ValidatedTransfer, PaymentError> {
        let amount = money::parse_amount(&self.amount)?;

        let (from_raw, to_raw) = (self.from_account_id.trim(), self.to_account_id.trim());
        if from_raw.eq_ignore_ascii_case(to_raw) {
            return Err(PaymentError::SameAccount);
        }

        let from = Uuid::parse_str(from_raw)
            .map_err(|_| PaymentError::InvalidAccountId(self.from_account_id.clone()))?;
        let to = Uuid::parse_str(to_raw)
            .map_err(|_| PaymentError::InvalidAccountId(self.to_account_id.clone()))?;
        if from == to {
            return Err(PaymentError::SameAccount);
        }

        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::InvalidCurrency(self.currency.clone()));
        }

        Ok(ValidatedTransfer {
            from,
            to,
            amount,
            currency: currency.to_ascii_uppercase(),
            description: self.description.trim().to_string(),
        })
    }
}

impl ValidatedTransfer {
    pub fn into_payment(self) -> Payment {
        Payment::new(self.from, self.to, self.amount, self.currency, self.description)
    }
}
