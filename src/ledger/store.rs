//! Account Store seam
//!
//! The Journal Engine talks to persistence only through these traits. A
//! [`LedgerTx`] is one atomic unit: nothing it writes is visible to other
//! readers until `commit`, and dropping or rolling it back discards every
//! staged change.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::error::LedgerError;
use super::types::{Account, AccountStatus, EntryStatus, JournalEntry, Posting};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError>;

    async fn insert_account(&self, account: &Account) -> Result<(), LedgerError>;

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, LedgerError>;

    /// Change lifecycle status; returns the updated row
    async fn set_account_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<Option<Account>, LedgerError>;

    /// Entry with its postings in insertion order
    async fn get_entry(&self, id: Uuid) -> Result<Option<JournalEntry>, LedgerError>;

    async fn find_entry_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<JournalEntry>, LedgerError>;
}

#[async_trait]
pub trait LedgerTx: Send {
    async fn find_entry_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<JournalEntry>, LedgerError>;

    /// Read an entry and lock it against concurrent status changes
    async fn lock_entry(&mut self, id: Uuid) -> Result<Option<JournalEntry>, LedgerError>;

    /// Read an account and lock its row until commit/rollback
    async fn lock_account(&mut self, id: Uuid) -> Result<Option<Account>, LedgerError>;

    /// Insert the entry header (postings are inserted separately)
    async fn insert_entry(&mut self, entry: &JournalEntry) -> Result<(), LedgerError>;

    async fn insert_posting(&mut self, posting: &Posting, seq: i16) -> Result<(), LedgerError>;

    async fn set_entry_status(&mut self, id: Uuid, status: EntryStatus)
    -> Result<(), LedgerError>;

    /// Compare-and-swap on the version counter.
    ///
    /// Sets `balance = new_balance, version = version + 1` only if the
    /// stored version still equals `expected_version`. Returns false when
    /// another writer got there first.
    async fn update_balance(
        &mut self,
        account_id: Uuid,
        new_balance: Decimal,
        expected_version: i64,
    ) -> Result<bool, LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}
