//! Ledger Error Types

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Journal Engine / Account Store errors
///
/// None of these leave a partial posting behind: every failure inside a
/// posting transaction rolls the whole transaction back.
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Postings do not balance (signed sum {0})")]
    Unbalanced(Decimal),

    #[error("Source and target account cannot be the same")]
    SameAccount,

    // === Lookup Errors ===
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Journal entry not found: {0}")]
    EntryNotFound(Uuid),

    // === Business Rule Errors ===
    #[error("Account {0} is not active")]
    AccountInactive(Uuid),

    #[error("Account {account} is in {actual}, expected {expected}")]
    CurrencyMismatch {
        account: Uuid,
        expected: String,
        actual: String,
    },

    #[error("Insufficient funds in account {0}")]
    InsufficientFunds(Uuid),

    #[error("Journal entry {0} is already void")]
    AlreadyVoid(Uuid),

    // === Concurrency ===
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    // === System Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl LedgerError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidArgument(_) => "INVALID_ARGUMENT",
            LedgerError::Unbalanced(_) => "UNBALANCED_ENTRY",
            LedgerError::SameAccount => "SAME_ACCOUNT",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            LedgerError::AccountInactive(_) => "ACCOUNT_INACTIVE",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            LedgerError::AlreadyVoid(_) => "ALREADY_VOID",
            LedgerError::Conflict(_) => "CONFLICT",
            LedgerError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::InvalidArgument(_)
            | LedgerError::Unbalanced(_)
            | LedgerError::SameAccount => 400,
            LedgerError::AccountNotFound(_) | LedgerError::EntryNotFound(_) => 404,
            LedgerError::AlreadyVoid(_) | LedgerError::Conflict(_) => 409,
            LedgerError::AccountInactive(_)
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::InsufficientFunds(_) => 422,
            LedgerError::DatabaseError(_) => 500,
        }
    }

    /// The whole posting may be attempted again
    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Conflict(_))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if crate::db::is_unique_violation(&e) || crate::db::is_retryable(&e) {
            LedgerError::Conflict(e.to_string())
        } else {
            LedgerError::DatabaseError(e.to_string())
        }
    }
}
