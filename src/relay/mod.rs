//! Event Relay
//!
//! Producer/consumer plumbing between the orchestrator and the ledger.
//!
//! ```text
//! Orchestrator ──payment.created──▶ Ledger consumer ──payment.completed──▶ Result consumer
//!                                                   └─payment.failed─────▶
//! ```
//!
//! Messages are JSON [`PaymentEvent`]s keyed by payment id. Delivery is
//! at-least-once, so every consumer is idempotent per payment id.

pub mod broker;
pub mod dispatch;
pub mod events;
pub mod producer;

pub use broker::{BrokerError, BrokerMessage, EventPublisher, InMemoryBroker, Subscription};
pub use dispatch::KeyedDispatcher;
pub use events::{PAYMENT_COMPLETED, PAYMENT_CREATED, PAYMENT_FAILED, PaymentEvent};
pub use producer::PaymentEventProducer;
