//! Ledger data model: accounts, journal entries and postings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::LedgerError;
use crate::money::{self, MoneyError};

/// Chart-of-accounts classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Income => "INCOME",
            AccountType::Expense => "EXPENSE",
        }
    }

    /// Funding-side accounts may run a negative balance; customer-facing
    /// accounts may not.
    #[inline]
    pub fn allows_negative(&self) -> bool {
        matches!(self, AccountType::Equity | AccountType::Income)
    }
}

impl FromStr for AccountType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASSET" => Ok(AccountType::Asset),
            "LIABILITY" => Ok(AccountType::Liability),
            "EQUITY" => Ok(AccountType::Equity),
            "INCOME" => Ok(AccountType::Income),
            "EXPENSE" => Ok(AccountType::Expense),
            other => Err(LedgerError::InvalidArgument(format!(
                "unknown account type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    /// Soft-retired: kept for history, accepts no new postings
    Retired,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Retired => "RETIRED",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(AccountStatus::Active),
            "RETIRED" => Ok(AccountStatus::Retired),
            other => Err(LedgerError::InvalidArgument(format!(
                "unknown account status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub number: String,
    pub account_type: AccountType,
    pub currency: String,
    pub status: AccountStatus,
    /// Materialized Σ(amount × direction) over all postings to this account
    pub balance: Decimal,
    /// Optimistic concurrency counter, bumped on every balance change
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Balance view served by `GET /accounts/{id}` and the Balance Cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub id: Uuid,
    pub account_type: AccountType,
    pub currency: String,
    pub balance: Decimal,
    pub version: i64,
}

impl From<&Account> for AccountBalance {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            account_type: account.account_type,
            currency: account.currency.clone(),
            balance: account.balance,
            version: account.version,
        }
    }
}

/// Request to open an account
#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    pub owner_id: Uuid,
    pub number: String,
    pub account_type: AccountType,
    pub currency: String,
}

impl NewAccount {
    pub fn into_account(self) -> Result<Account, LedgerError> {
        let number = self.number.trim().to_string();
        if number.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "account number must not be empty".into(),
            ));
        }
        let currency = normalize_currency(&self.currency)?;
        let now = Utc::now();
        Ok(Account {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            number,
            account_type: self.account_type,
            currency,
            status: AccountStatus::Active,
            balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// ISO 4217 shape check: three ASCII letters, stored upper-case
pub fn normalize_currency(code: &str) -> Result<String, LedgerError> {
    let code = code.trim();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(LedgerError::InvalidArgument(format!(
            "invalid currency code: {}",
            code
        )));
    }
    Ok(code.to_ascii_uppercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryStatus {
    Pending,
    Posted,
    Void,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Posted => "POSTED",
            EntryStatus::Void => "VOID",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EntryStatus::Pending),
            "POSTED" => Ok(EntryStatus::Posted),
            "VOID" => Ok(EntryStatus::Void),
            other => Err(LedgerError::InvalidArgument(format!(
                "unknown entry status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Posting direction: +1 debit, −1 credit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Direction {
    Debit = 1,
    Credit = -1,
}

impl Direction {
    #[inline]
    pub fn sign(&self) -> i16 {
        *self as i16
    }

    pub fn from_sign(sign: i16) -> Option<Self> {
        match sign {
            1 => Some(Direction::Debit),
            -1 => Some(Direction::Credit),
            _ => None,
        }
    }

    pub fn inverse(&self) -> Self {
        match self {
            Direction::Debit => Direction::Credit,
            Direction::Credit => Direction::Debit,
        }
    }
}

impl Serialize for Direction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i16(self.sign())
    }
}

impl<'de> Deserialize<'de> for Direction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let sign = i16::deserialize(deserializer)?;
        Direction::from_sign(sign)
            .ok_or_else(|| serde::de::Error::custom(format!("direction must be 1 or -1, got {}", sign)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub direction: Direction,
}

impl Posting {
    #[inline]
    pub fn signed_amount(&self) -> Decimal {
        signed(self.amount, self.direction)
    }
}

#[inline]
fn signed(amount: Decimal, direction: Direction) -> Decimal {
    match direction {
        Direction::Debit => amount,
        Direction::Credit => -amount,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub transaction_date: DateTime<Utc>,
    pub description: String,
    /// Correlates the entry with its originating payment
    pub reference_id: Option<String>,
    pub status: EntryStatus,
    pub postings: Vec<Posting>,
}

impl JournalEntry {
    /// Σ(amount × direction) over all postings; zero for every valid entry
    pub fn signed_sum(&self) -> Decimal {
        self.postings.iter().map(Posting::signed_amount).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.signed_sum().is_zero()
    }
}

/// One leg of a posting request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingRequest {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub direction: Direction,
}

/// A journal entry waiting to be posted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub description: String,
    #[serde(default)]
    pub reference_id: Option<String>,
    /// When present every touched account must be in this currency
    #[serde(default)]
    pub currency: Option<String>,
    pub postings: Vec<PostingRequest>,
}

impl NewJournalEntry {
    /// Two-legged transfer: sender credited (−1), receiver debited (+1)
    pub fn transfer(
        from: Uuid,
        to: Uuid,
        amount: Decimal,
        description: impl Into<String>,
        reference_id: Option<String>,
    ) -> Self {
        Self {
            description: description.into(),
            reference_id,
            currency: None,
            postings: vec![
                PostingRequest {
                    account_id: from,
                    amount,
                    direction: Direction::Credit,
                },
                PostingRequest {
                    account_id: to,
                    amount,
                    direction: Direction::Debit,
                },
            ],
        }
    }

    /// Structural checks that need no store access.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.postings.len() < 2 {
            return Err(LedgerError::InvalidArgument(
                "a journal entry needs at least two postings".into(),
            ));
        }
        for p in &self.postings {
            money::check_amount(p.amount).map_err(|e| match e {
                MoneyError::NotPositive => {
                    LedgerError::InvalidArgument("posting amount must be greater than zero".into())
                }
                other => LedgerError::InvalidArgument(other.to_string()),
            })?;
        }
        let sum = self
            .postings
            .iter()
            .try_fold(Decimal::ZERO, |acc, p| {
                acc.checked_add(signed(p.amount, p.direction))
            })
            .ok_or_else(|| LedgerError::InvalidArgument("posting amounts overflow".into()))?;
        if !sum.is_zero() {
            return Err(LedgerError::Unbalanced(sum));
        }
        if let Some(ref reference) = self.reference_id
            && reference.trim().is_empty()
        {
            return Err(LedgerError::InvalidArgument(
                "reference_id must not be blank".into(),
            ));
        }
        if let Some(ref currency) = self.currency {
            normalize_currency(currency)?;
        }
        Ok(())
    }

    /// Net balance change per account, ordered by account id so that row
    /// locks are always taken in the same order.
    pub fn net_deltas(&self) -> BTreeMap<Uuid, Decimal> {
        let mut deltas = BTreeMap::new();
        for p in &self.postings {
            *deltas.entry(p.account_id).or_insert(Decimal::ZERO) += signed(p.amount, p.direction);
        }
        deltas
    }

    /// Materialize into a POSTED entry with fresh ids.
    pub fn into_entry(self) -> JournalEntry {
        let entry_id = Uuid::new_v4();
        let postings = self
            .postings
            .into_iter()
            .map(|p| Posting {
                id: Uuid::new_v4(),
                entry_id,
                account_id: p.account_id,
                amount: p.amount,
                direction: p.direction,
            })
            .collect();
        JournalEntry {
            id: entry_id,
            transaction_date: Utc::now(),
            description: self.description,
            reference_id: self.reference_id,
            status: EntryStatus::Posted,
            postings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_transfer_is_balanced() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let req = NewJournalEntry::transfer(a, b, dec("100"), "rent", None);
        assert!(req.validate().is_ok());

        let deltas = req.net_deltas();
        assert_eq!(deltas[&a], dec("-100"));
        assert_eq!(deltas[&b], dec("100"));

        let entry = req.into_entry();
        assert_eq!(entry.status, EntryStatus::Posted);
        assert_eq!(entry.postings.len(), 2);
        assert!(entry.is_balanced());
        assert!(entry.postings.iter().all(|p| p.entry_id == entry.id));
    }

    #[test]
    fn test_validate_rejects_unbalanced() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut req = NewJournalEntry::transfer(a, b, dec("10"), "x", None);
        req.postings[1].amount = dec("9");
        assert!(matches!(req.validate(), Err(LedgerError::Unbalanced(_))));
    }

    #[test]
    fn test_validate_rejects_non_positive_and_short() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let req = NewJournalEntry::transfer(a, b, Decimal::ZERO, "x", None);
        assert!(matches!(req.validate(), Err(LedgerError::InvalidArgument(_))));

        let mut req = NewJournalEntry::transfer(a, b, dec("5"), "x", None);
        req.postings.truncate(1);
        assert!(matches!(req.validate(), Err(LedgerError::InvalidArgument(_))));

        let req = NewJournalEntry::transfer(a, b, dec("0.00001"), "x", None);
        assert!(matches!(req.validate(), Err(LedgerError::InvalidArgument(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_amounts() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut req = NewJournalEntry::transfer(a, b, Decimal::MAX, "x", None);
        req.postings[0].direction = Direction::Debit;
        match req.validate() {
            Err(LedgerError::InvalidArgument(msg)) => assert!(msg.contains("15 integer digits")),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[test]
    fn test_direction_json() {
        let p: PostingRequest = serde_json::from_str(&format!(
            r#"{{"account_id":"{}","amount":"12.50","direction":-1}}"#,
            Uuid::nil()
        ))
        .unwrap();
        assert_eq!(p.direction, Direction::Credit);
        assert_eq!(p.amount, dec("12.5"));

        let bad = serde_json::from_str::<PostingRequest>(&format!(
            r#"{{"account_id":"{}","amount":"1","direction":0}}"#,
            Uuid::nil()
        ));
        assert!(bad.is_err());
    }

    #[test]
    fn test_currency_normalization() {
        assert_eq!(normalize_currency("usd").unwrap(), "USD");
        assert!(normalize_currency("US").is_err());
        assert!(normalize_currency("U$D").is_err());
    }

    #[test]
    fn test_allows_negative() {
        assert!(AccountType::Equity.allows_negative());
        assert!(AccountType::Income.allows_negative());
        assert!(!AccountType::Asset.allows_negative());
        assert!(!AccountType::Liability.allows_negative());
    }
}
