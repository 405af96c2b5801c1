//! Orchestrator -> Journal Engine client
//!
//! [`HttpLedgerClient`] is the synchronous fallback path over HTTP
//! (`POST /transactions`, `GET /accounts/{id}`). [`LocalLedgerClient`]
//! calls an in-process engine directly and is used when both services share
//! one process in tests.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::types::Payment;
use crate::api::ApiResponse;
use crate::ledger::engine::JournalEngine;
use crate::ledger::error::LedgerError;
use crate::ledger::types::{AccountBalance, JournalEntry, NewJournalEntry};

#[derive(Debug, Clone, Error)]
pub enum LedgerCallError {
    /// The ledger answered and refused the request
    #[error("ledger rejected request ({status} {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    /// The ledger could not be reached or answered garbage
    #[error("ledger unreachable: {0}")]
    Unavailable(String),
}

impl LedgerCallError {
    /// Whether the error says something about ledger health. Business
    /// rejections (4xx) come from a healthy ledger and must not trip the
    /// breaker.
    pub fn is_failure(&self) -> bool {
        match self {
            LedgerCallError::Rejected { status, .. } => *status >= 500,
            LedgerCallError::Unavailable(_) => true,
        }
    }
}

impl From<LedgerError> for LedgerCallError {
    fn from(e: LedgerError) -> Self {
        LedgerCallError::Rejected {
            status: e.http_status(),
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Post the payment's transfer; returns the journal entry id. Idempotent
    /// on the payment id.
    async fn post_transfer(&self, payment: &Payment) -> Result<Uuid, LedgerCallError>;

    async fn get_balance(&self, account_id: Uuid) -> Result<AccountBalance, LedgerCallError>;
}

fn transfer_entry(payment: &Payment) -> NewJournalEntry {
    let description = if payment.description.is_empty() {
        format!("payment {}", payment.id)
    } else {
        payment.description.clone()
    };
    let mut entry = NewJournalEntry::transfer(
        payment.from_account_id,
        payment.to_account_id,
        payment.amount,
        description,
        Some(payment.reference_id()),
    );
    entry.currency = Some(payment.currency.clone());
    entry
}

// ============================================================================
// HTTP
// ============================================================================

pub struct HttpLedgerClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerCallError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerCallError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, LedgerCallError> {
        let status = response.status();
        let body: ApiResponse<T> = response.json().await.map_err(|e| {
            LedgerCallError::Unavailable(format!("undecodable ledger response ({}): {}", status, e))
        })?;

        match body.data {
            Some(data) if status.is_success() && body.is_success() => Ok(data),
            _ => Err(LedgerCallError::Rejected {
                status: status.as_u16(),
                code: body.error.unwrap_or_else(|| "UNKNOWN".to_string()),
                message: body.msg,
            }),
        }
    }
}

fn transport_error(e: reqwest::Error) -> LedgerCallError {
    LedgerCallError::Unavailable(e.to_string())
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn post_transfer(&self, payment: &Payment) -> Result<Uuid, LedgerCallError> {
        let response = self
            .http
            .post(format!("{}/transactions", self.base_url))
            .json(&transfer_entry(payment))
            .send()
            .await
            .map_err(transport_error)?;
        let entry: JournalEntry = Self::decode(response).await?;
        Ok(entry.id)
    }

    async fn get_balance(&self, account_id: Uuid) -> Result<AccountBalance, LedgerCallError> {
        let response = self
            .http
            .get(format!("{}/accounts/{}", self.base_url, account_id))
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }
}

// ============================================================================
// In-process
// ============================================================================

pub struct LocalLedgerClient {
    engine: Arc<JournalEngine>,
}

impl LocalLedgerClient {
    pub fn new(engine: Arc<JournalEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl LedgerClient for LocalLedgerClient {
    async fn post_transfer(&self, payment: &Payment) -> Result<Uuid, LedgerCallError> {
        let outcome = self.engine.post_entry(transfer_entry(payment)).await?;
        Ok(outcome.entry.id)
    }

    async fn get_balance(&self, account_id: Uuid) -> Result<AccountBalance, LedgerCallError> {
        Ok(self.engine.get_balance(account_id).await?)
    }
}
