//! Transfer Orchestrator
//!
//! Public entry point for money movement. A transfer is validated, checked
//! against the sender's balance, persisted as a PENDING [`Payment`], then
//! settled either asynchronously (`payment.created` through the broker) or
//! synchronously against the Journal Engine behind a circuit breaker.

pub mod api;
pub mod db;
pub mod error;
pub mod ledger_client;
pub mod orchestrator;
pub mod result_consumer;
pub mod types;
pub mod worker;

pub use db::{InMemoryPaymentStore, PaymentStore, PgPaymentStore};
pub use error::PaymentError;
pub use ledger_client::{HttpLedgerClient, LedgerCallError, LedgerClient, LocalLedgerClient};
pub use orchestrator::{TransferFailure, TransferOrchestrator};
pub use result_consumer::PaymentResultConsumer;
pub use types::{Payment, PaymentStatus, Settlement, TransferRequest};
pub use worker::{RecoveryWorker, WorkerConfig};
