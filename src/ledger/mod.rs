//! Journal Engine and Account Store
//!
//! Double-entry bookkeeping: every [`JournalEntry`] carries at least two
//! postings whose signed amounts (amount × direction) sum to zero, and each
//! account's materialized balance is the signed sum of its postings. A
//! posting and its balance updates commit together or not at all.
//!
//! ```text
//! HTTP / payment.created
//!          │
//!          ▼
//!   JournalEngine ──▶ LedgerStore::begin ──▶ lock accounts (id order)
//!          │                                      │
//!          │                     funds + status + currency checks
//!          │                                      │
//!          │                 insert entry/postings, CAS balances
//!          │                                      │
//!          └──── invalidate BalanceCache ◀─── commit
//! ```

pub mod api;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod memory;
pub mod pg;
pub mod store;
pub mod types;

pub use consumer::PaymentCreatedConsumer;
pub use engine::{JournalEngine, PostOutcome};
pub use error::LedgerError;
pub use memory::InMemoryLedgerStore;
pub use pg::PgLedgerStore;
pub use store::{LedgerStore, LedgerTx};
pub use types::{
    Account, AccountBalance, AccountStatus, AccountType, Direction, EntryStatus, JournalEntry,
    NewAccount, NewJournalEntry, Posting, PostingRequest,
};
