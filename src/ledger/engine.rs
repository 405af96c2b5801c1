//! Journal Engine
//!
//! Enforces the ledger invariants on top of a [`LedgerStore`]:
//!
//! - every entry has at least two postings, all strictly positive, and
//!   Σ(amount × direction) = 0
//! - an entry and all its balance updates commit in one transaction or not
//!   at all
//! - each balance update is a version compare-and-swap; losing the race
//!   restarts the whole posting (up to `max_attempts`)
//! - a `reference_id` is posted at most once; replays return the original
//!   entry

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::LedgerError;
use super::store::{LedgerStore, LedgerTx};
use super::types::{
    Account, AccountBalance, AccountStatus, EntryStatus, JournalEntry, NewAccount,
    NewJournalEntry, PostingRequest, normalize_currency,
};
use crate::cache::BalanceCache;

/// Default number of attempts for a posting that keeps losing version races
pub const DEFAULT_MAX_POST_ATTEMPTS: u32 = 3;

/// Result of a posting request
#[derive(Debug, Clone, PartialEq)]
pub struct PostOutcome {
    pub entry: JournalEntry,
    /// false when an entry with the same reference already existed
    pub created: bool,
}

pub struct JournalEngine {
    store: Arc<dyn LedgerStore>,
    cache: Option<Arc<BalanceCache>>,
    max_attempts: u32,
}

impl JournalEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            cache: None,
            max_attempts: DEFAULT_MAX_POST_ATTEMPTS,
        }
    }

    pub fn with_cache(mut self, cache: Arc<BalanceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    pub async fn open_account(&self, req: NewAccount) -> Result<Account, LedgerError> {
        let account = req.into_account()?;
        self.store.insert_account(&account).await?;
        info!(
            account_id = %account.id,
            number = %account.number,
            account_type = account.account_type.as_str(),
            currency = %account.currency,
            "Account opened"
        );
        Ok(account)
    }

    pub async fn retire_account(&self, id: Uuid) -> Result<Account, LedgerError> {
        let account = self
            .store
            .set_account_status(id, AccountStatus::Retired)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))?;
        info!(account_id = %id, "Account retired");
        Ok(account)
    }

    pub async fn get_account(&self, id: Uuid) -> Result<Account, LedgerError> {
        self.store
            .get_account(id)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// Balance read, served through the cache when one is configured
    pub async fn get_balance(&self, id: Uuid) -> Result<AccountBalance, LedgerError> {
        let balance = match self.cache {
            Some(ref cache) => cache.get(id).await?,
            None => self
                .store
                .get_account(id)
                .await?
                .as_ref()
                .map(AccountBalance::from),
        };
        balance.ok_or(LedgerError::AccountNotFound(id))
    }

    pub async fn get_entry(&self, id: Uuid) -> Result<JournalEntry, LedgerError> {
        self.store
            .get_entry(id)
            .await?
            .ok_or(LedgerError::EntryNotFound(id))
    }

    // ========================================================================
    // Posting
    // ========================================================================

    /// Move `amount` from one account to another: the sender gets a credit
    /// (−1) posting and the receiver a debit (+1) posting.
    pub async fn post_transfer(
        &self,
        from: Uuid,
        to: Uuid,
        amount: Decimal,
        description: &str,
        reference_id: Option<String>,
    ) -> Result<PostOutcome, LedgerError> {
        self.post_transfer_in(from, to, amount, None, description, reference_id)
            .await
    }

    /// [`post_transfer`](Self::post_transfer) that also requires both
    /// accounts to be held in `currency`
    pub async fn post_transfer_in(
        &self,
        from: Uuid,
        to: Uuid,
        amount: Decimal,
        currency: Option<&str>,
        description: &str,
        reference_id: Option<String>,
    ) -> Result<PostOutcome, LedgerError> {
        if from == to {
            return Err(LedgerError::SameAccount);
        }
        let mut req = NewJournalEntry::transfer(from, to, amount, description, reference_id);
        req.currency = currency.map(str::to_string);
        self.post_entry(req).await
    }

    pub async fn post_entry(&self, req: NewJournalEntry) -> Result<PostOutcome, LedgerError> {
        req.validate()?;

        if let Some(ref reference) = req.reference_id
            && let Some(entry) = self.store.find_entry_by_reference(reference).await?
        {
            debug!(reference_id = %reference, entry_id = %entry.id, "Reference already posted");
            return Ok(PostOutcome {
                entry,
                created: false,
            });
        }

        let (store, request) = (&self.store, &req);
        let outcome = self
            .with_retry("post", move || async move {
                let mut tx = store.begin().await?;
                let result = apply_entry(tx.as_mut(), request).await;
                finish(tx, result).await
            })
            .await?;

        if outcome.created {
            info!(
                entry_id = %outcome.entry.id,
                reference_id = ?outcome.entry.reference_id,
                postings = outcome.entry.postings.len(),
                "Journal entry posted"
            );
            self.invalidate(req.net_deltas().keys()).await;
        }
        Ok(outcome)
    }

    /// Reverse a POSTED entry with a compensating entry and mark the
    /// original VOID, in one transaction. Returns the compensating entry.
    pub async fn void_entry(&self, id: Uuid) -> Result<JournalEntry, LedgerError> {
        let store = &self.store;
        let (outcome, touched) = self
            .with_retry("void", move || async move {
                let mut tx = store.begin().await?;
                let result = apply_void(tx.as_mut(), id).await;
                finish(tx, result).await
            })
            .await?;

        info!(
            entry_id = %id,
            compensating_entry_id = %outcome.entry.id,
            "Journal entry voided"
        );
        self.invalidate(touched.keys()).await;
        Ok(outcome.entry)
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut attempt_fn: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LedgerError>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Err(e) if e.is_conflict() && attempt < self.max_attempts => {
                    warn!(op, attempt, error = %e, "Posting lost a concurrent update, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn invalidate<'a>(&self, accounts: impl Iterator<Item = &'a Uuid>) {
        if let Some(ref cache) = self.cache {
            for id in accounts {
                cache.invalidate(*id).await;
            }
        }
    }
}

async fn finish<T>(
    tx: Box<dyn LedgerTx>,
    result: Result<T, LedgerError>,
) -> Result<T, LedgerError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Post one entry inside `tx`. Accounts are locked in ascending id order.
async fn apply_entry(
    tx: &mut dyn LedgerTx,
    req: &NewJournalEntry,
) -> Result<PostOutcome, LedgerError> {
    if let Some(ref reference) = req.reference_id
        && let Some(entry) = tx.find_entry_by_reference(reference).await?
    {
        return Ok(PostOutcome {
            entry,
            created: false,
        });
    }

    let mut currency = req
        .currency
        .as_deref()
        .map(normalize_currency)
        .transpose()?;

    let deltas = req.net_deltas();
    let mut updates = Vec::with_capacity(deltas.len());
    for (&account_id, &delta) in &deltas {
        let account = tx
            .lock_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        if account.status != AccountStatus::Active {
            return Err(LedgerError::AccountInactive(account_id));
        }
        match currency {
            None => currency = Some(account.currency.clone()),
            Some(ref expected) if *expected != account.currency => {
                return Err(LedgerError::CurrencyMismatch {
                    account: account_id,
                    expected: expected.clone(),
                    actual: account.currency.clone(),
                });
            }
            Some(_) => {}
        }

        let new_balance = account.balance.checked_add(delta).ok_or_else(|| {
            LedgerError::InvalidArgument(format!("balance of account {} would overflow", account_id))
        })?;
        if delta < Decimal::ZERO
            && new_balance < Decimal::ZERO
            && !account.account_type.allows_negative()
        {
            return Err(LedgerError::InsufficientFunds(account_id));
        }
        updates.push((account_id, new_balance, account.version));
    }

    let entry = req.clone().into_entry();
    tx.insert_entry(&entry).await?;
    for (seq, posting) in entry.postings.iter().enumerate() {
        tx.insert_posting(posting, seq as i16).await?;
    }

    for (account_id, new_balance, version) in updates {
        if !tx.update_balance(account_id, new_balance, version).await? {
            return Err(LedgerError::Conflict(format!(
                "account {} changed since version {}",
                account_id, version
            )));
        }
    }

    Ok(PostOutcome {
        entry,
        created: true,
    })
}

async fn apply_void(
    tx: &mut dyn LedgerTx,
    id: Uuid,
) -> Result<(PostOutcome, BTreeMap<Uuid, Decimal>), LedgerError> {
    let original = tx
        .lock_entry(id)
        .await?
        .ok_or(LedgerError::EntryNotFound(id))?;

    match original.status {
        EntryStatus::Posted => {}
        EntryStatus::Void => return Err(LedgerError::AlreadyVoid(id)),
        EntryStatus::Pending => {
            return Err(LedgerError::InvalidArgument(format!(
                "journal entry {} is not posted",
                id
            )));
        }
    }

    let compensating = NewJournalEntry {
        description: format!("void of {}", id),
        reference_id: Some(format!("void:{}", id)),
        currency: None,
        postings: original
            .postings
            .iter()
            .map(|p| PostingRequest {
                account_id: p.account_id,
                amount: p.amount,
                direction: p.direction.inverse(),
            })
            .collect(),
    };
    compensating.validate()?;

    tx.set_entry_status(id, EntryStatus::Void).await?;
    let outcome = apply_entry(tx, &compensating).await?;
    Ok((outcome, compensating.net_deltas()))
}
