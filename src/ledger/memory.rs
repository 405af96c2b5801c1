//! In-memory Account Store
//!
//! Used when no PostgreSQL URL is configured and by the test suites. A
//! transaction holds the store lock from `begin` until commit/rollback, so
//! in-memory transactions are fully serialized. Writes are staged in the
//! transaction and applied in one step on commit.
//!
//! Two fault hooks exist for exercising failure paths:
//! [`InMemoryLedgerStore::fail_posting_insert_after`] and
//! [`InMemoryLedgerStore::inject_version_conflicts`].

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::error::LedgerError;
use super::store::{LedgerStore, LedgerTx};
use super::types::{Account, AccountStatus, EntryStatus, JournalEntry, Posting};

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<Uuid, Account>,
    entries: HashMap<Uuid, JournalEntry>,
    references: HashMap<String, Uuid>,
}

impl LedgerState {
    fn entry_by_reference(&self, reference_id: &str) -> Option<JournalEntry> {
        self.references
            .get(reference_id)
            .and_then(|id| self.entries.get(id))
            .cloned()
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    /// usize::MAX = disabled
    fail_after_postings: AtomicUsize,
    version_conflicts: AtomicU32,
}

#[derive(Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    faults: Arc<FaultPlan>,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        let faults = FaultPlan::default();
        faults.fail_after_postings.store(usize::MAX, Ordering::SeqCst);
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            faults: Arc::new(faults),
        }
    }

    /// Every transaction fails when it tries to insert posting number `n + 1`
    /// (i.e. after `n` postings have been staged). `None` disables the fault.
    pub fn fail_posting_insert_after(&self, n: Option<usize>) {
        self.faults
            .fail_after_postings
            .store(n.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    /// The next `n` balance updates report a lost version race.
    pub fn inject_version_conflicts(&self, n: u32) {
        self.faults.version_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of committed journal entries
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Every committed posting against `account_id`
    pub async fn postings_for(&self, account_id: Uuid) -> Vec<Posting> {
        let state = self.state.lock().await;
        state
            .entries
            .values()
            .flat_map(|e| e.postings.iter())
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn set_balance(&self, account_id: Uuid, balance: Decimal) {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&account_id) {
            account.balance = balance;
        }
    }

    /// All committed entries
    pub async fn entries(&self) -> Vec<JournalEntry> {
        self.state.lock().await.entries.values().cloned().collect()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryTx {
            guard,
            faults: self.faults.clone(),
            new_entries: Vec::new(),
            staged_postings: 0,
            balance_updates: HashMap::new(),
            status_updates: Vec::new(),
        }))
    }

    async fn insert_account(&self, account: &Account) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if state.accounts.values().any(|a| a.number == account.number) {
            return Err(LedgerError::InvalidArgument(format!(
                "account number already exists: {}",
                account.number
            )));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, LedgerError> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn set_account_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<Option<Account>, LedgerError> {
        let mut state = self.state.lock().await;
        Ok(state.accounts.get_mut(&id).map(|a| {
            a.status = status;
            a.updated_at = Utc::now();
            a.clone()
        }))
    }

    async fn get_entry(&self, id: Uuid) -> Result<Option<JournalEntry>, LedgerError> {
        Ok(self.state.lock().await.entries.get(&id).cloned())
    }

    async fn find_entry_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<JournalEntry>, LedgerError> {
        Ok(self.state.lock().await.entry_by_reference(reference_id))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<LedgerState>,
    faults: Arc<FaultPlan>,
    new_entries: Vec<JournalEntry>,
    staged_postings: usize,
    /// account -> (new balance, new version)
    balance_updates: HashMap<Uuid, (Decimal, i64)>,
    status_updates: Vec<(Uuid, EntryStatus)>,
}

impl InMemoryTx {
    fn current_version(&self, account: &Account) -> i64 {
        self.balance_updates
            .get(&account.id)
            .map(|(_, v)| *v)
            .unwrap_or(account.version)
    }
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn find_entry_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<JournalEntry>, LedgerError> {
        Ok(self.guard.entry_by_reference(reference_id))
    }

    async fn lock_entry(&mut self, id: Uuid) -> Result<Option<JournalEntry>, LedgerError> {
        Ok(self.guard.entries.get(&id).cloned())
    }

    async fn lock_account(&mut self, id: Uuid) -> Result<Option<Account>, LedgerError> {
        let Some(account) = self.guard.accounts.get(&id) else {
            return Ok(None);
        };
        let mut account = account.clone();
        if let Some((balance, version)) = self.balance_updates.get(&id) {
            account.balance = *balance;
            account.version = *version;
        }
        Ok(Some(account))
    }

    async fn insert_entry(&mut self, entry: &JournalEntry) -> Result<(), LedgerError> {
        let mut header = entry.clone();
        header.postings.clear();
        self.new_entries.push(header);
        Ok(())
    }

    async fn insert_posting(&mut self, posting: &Posting, _seq: i16) -> Result<(), LedgerError> {
        if self.staged_postings >= self.faults.fail_after_postings.load(Ordering::SeqCst) {
            return Err(LedgerError::DatabaseError(
                "injected failure: posting insert".into(),
            ));
        }
        let entry = self
            .new_entries
            .iter_mut()
            .find(|e| e.id == posting.entry_id)
            .ok_or_else(|| {
                LedgerError::DatabaseError(format!(
                    "posting references unknown entry {}",
                    posting.entry_id
                ))
            })?;
        entry.postings.push(posting.clone());
        self.staged_postings += 1;
        Ok(())
    }

    async fn set_entry_status(
        &mut self,
        id: Uuid,
        status: EntryStatus,
    ) -> Result<(), LedgerError> {
        self.status_updates.push((id, status));
        Ok(())
    }

    async fn update_balance(
        &mut self,
        account_id: Uuid,
        new_balance: Decimal,
        expected_version: i64,
    ) -> Result<bool, LedgerError> {
        let injected = self
            .faults
            .version_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Ok(false);
        }

        let Some(account) = self.guard.accounts.get(&account_id) else {
            return Ok(false);
        };
        if self.current_version(account) != expected_version {
            return Ok(false);
        }
        self.balance_updates
            .insert(account_id, (new_balance, expected_version + 1));
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let InMemoryTx {
            mut guard,
            new_entries,
            balance_updates,
            status_updates,
            ..
        } = *self;

        for entry in &new_entries {
            if let Some(ref reference) = entry.reference_id
                && guard.references.contains_key(reference)
            {
                return Err(LedgerError::Conflict(format!(
                    "reference already posted: {}",
                    reference
                )));
            }
        }

        let now = Utc::now();
        for (account_id, (balance, version)) in balance_updates {
            if let Some(account) = guard.accounts.get_mut(&account_id) {
                account.balance = balance;
                account.version = version;
                account.updated_at = now;
            }
        }
        for entry in new_entries {
            if let Some(ref reference) = entry.reference_id {
                guard.references.insert(reference.clone(), entry.id);
            }
            guard.entries.insert(entry.id, entry);
        }
        for (id, status) in status_updates {
            if let Some(entry) = guard.entries.get_mut(&id) {
                entry.status = status;
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}
