//! bank_ledger - Double-entry ledger and settlement core
//!
//! Two services and the plumbing between them.
//!
//! # Modules
//!
//! - [`ledger`] - Journal Engine and Account Store (double-entry postings, void)
//! - [`payment`] - Transfer Orchestrator (payments, result consumer, recovery)
//! - [`relay`] - Event Relay (payment events, broker seam, in-process broker)
//! - [`resilience`] - Per-destination circuit breakers
//! - [`cache`] - Read-through balance cache
//! - [`money`] - Amount parsing
//! - [`api`] - Shared HTTP response envelope
//! - [`db`] - PostgreSQL pool and schema
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing setup
//! - [`services`] - Process wiring

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod payment;
pub mod relay;
pub mod resilience;
pub mod services;

pub use ledger::{JournalEngine, LedgerError};
pub use payment::{Payment, PaymentError, PaymentStatus, TransferOrchestrator};
pub use resilience::{BreakerRegistry, CircuitBreaker};
