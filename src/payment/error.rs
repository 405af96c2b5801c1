//! Transfer Orchestrator Error Types

use thiserror::Error;
use uuid::Uuid;

use crate::money::MoneyError;

/// Orchestrator errors
///
/// Validation errors are raised before anything is persisted. Ledger and
/// breaker errors are raised after the PENDING payment exists, and are
/// returned together with the (FAILED) payment.
#[derive(Error, Debug, Clone)]
pub enum PaymentError {
    // === Validation Errors ===
    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("{0}")]
    InvalidAmountFormat(String),

    #[error("Source and target account cannot be the same")]
    SameAccount,

    #[error("Invalid account id: {0}")]
    InvalidAccountId(String),

    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    // === Ledger Outcomes ===
    #[error("Insufficient funds in account {0}")]
    InsufficientFunds(Uuid),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Ledger rejected the transfer ({code}): {message}")]
    LedgerRejected { code: String, message: String },

    // === Availability ===
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    // === Lookup / System ===
    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl PaymentError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::InvalidAmount => "INVALID_AMOUNT",
            PaymentError::InvalidAmountFormat(_) => "INVALID_AMOUNT_FORMAT",
            PaymentError::SameAccount => "SAME_ACCOUNT",
            PaymentError::InvalidAccountId(_) => "INVALID_ACCOUNT_ID",
            PaymentError::InvalidCurrency(_) => "INVALID_CURRENCY",
            PaymentError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            PaymentError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            PaymentError::LedgerRejected { .. } => "LEDGER_REJECTED",
            PaymentError::CircuitOpen(_) => "CIRCUIT_OPEN",
            PaymentError::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            PaymentError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            PaymentError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            PaymentError::InvalidAmount
            | PaymentError::InvalidAmountFormat(_)
            | PaymentError::SameAccount
            | PaymentError::InvalidAccountId(_)
            | PaymentError::InvalidCurrency(_) => 400,
            PaymentError::AccountNotFound(_) | PaymentError::PaymentNotFound(_) => 404,
            PaymentError::InsufficientFunds(_) | PaymentError::LedgerRejected { .. } => 422,
            PaymentError::CircuitOpen(_) | PaymentError::LedgerUnavailable(_) => 503,
            PaymentError::DatabaseError(_) => 500,
        }
    }

    /// The ledger could not be asked, as opposed to answering no
    pub fn is_outage(&self) -> bool {
        matches!(
            self,
            PaymentError::CircuitOpen(_) | PaymentError::LedgerUnavailable(_)
        )
    }

    /// Rejected before any persistence
    pub fn is_validation(&self) -> bool {
        self.http_status() == 400
    }
}

impl From<MoneyError> for PaymentError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::NotPositive => PaymentError::InvalidAmount,
            other => PaymentError::InvalidAmountFormat(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for PaymentError {
    fn from(e: sqlx::Error) -> Self {
        PaymentError::DatabaseError(e.to_string())
    }
}
