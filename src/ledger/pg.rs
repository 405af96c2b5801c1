//! PostgreSQL Account Store
//!
//! Row locks (`SELECT ... FOR UPDATE`) serialize concurrent postings that
//! touch the same account; the version predicate on every balance update
//! catches anything that slips past them.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::error::LedgerError;
use super::store::{LedgerStore, LedgerTx};
use super::types::{Account, AccountStatus, Direction, EntryStatus, JournalEntry, Posting};

const ACCOUNT_COLUMNS: &str = "id, owner_id, number, account_type, currency, status, balance, version, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, transaction_date, description, reference_id, status";

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_account(row: &PgRow) -> Result<Account, LedgerError> {
    let account_type: String = row.try_get("account_type")?;
    let status: String = row.try_get("status")?;
    let currency: String = row.try_get("currency")?;
    Ok(Account {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        number: row.try_get("number")?,
        account_type: account_type.parse()?,
        currency: currency.trim().to_string(),
        status: status.parse()?,
        balance: row.try_get("balance")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_posting(row: &PgRow) -> Result<Posting, LedgerError> {
    let sign: i16 = row.try_get("direction")?;
    let direction = Direction::from_sign(sign).ok_or_else(|| {
        LedgerError::DatabaseError(format!("corrupt posting direction: {}", sign))
    })?;
    Ok(Posting {
        id: row.try_get("id")?,
        entry_id: row.try_get("entry_id")?,
        account_id: row.try_get("account_id")?,
        amount: row.try_get("amount")?,
        direction,
    })
}

fn row_to_entry_header(row: &PgRow) -> Result<JournalEntry, LedgerError> {
    let status: String = row.try_get("status")?;
    Ok(JournalEntry {
        id: row.try_get("id")?,
        transaction_date: row.try_get("transaction_date")?,
        description: row.try_get("description")?,
        reference_id: row.try_get("reference_id")?,
        status: status.parse()?,
        postings: Vec::new(),
    })
}

/// Load the postings of `entry` from any executor (pool or transaction)
async fn load_postings<'e, E>(executor: E, entry: &mut JournalEntry) -> Result<(), LedgerError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(
        "SELECT id, entry_id, account_id, amount, direction FROM postings WHERE entry_id = $1 ORDER BY seq",
    )
    .bind(entry.id)
    .fetch_all(executor)
    .await?;

    entry.postings = rows
        .iter()
        .map(row_to_posting)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(())
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn insert_account(&self, account: &Account) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO accounts
                (id, owner_id, number, account_type, currency, status, balance, version, created_at, updated_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(account.id)
        .bind(account.owner_id)
        .bind(&account.number)
        .bind(account.account_type.as_str())
        .bind(&account.currency)
        .bind(account.status.as_str())
        .bind(account.balance)
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if crate::db::is_unique_violation(&e) {
                LedgerError::InvalidArgument(format!(
                    "account number already exists: {}",
                    account.number
                ))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn set_account_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query(&format!(
            "UPDATE accounts SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(status.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn get_entry(&self, id: Uuid) -> Result<Option<JournalEntry>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM journal_entries WHERE id = $1",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut entry = row_to_entry_header(&row)?;
                load_postings(&self.pool, &mut entry).await?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn find_entry_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<JournalEntry>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM journal_entries WHERE reference_id = $1",
            ENTRY_COLUMNS
        ))
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut entry = row_to_entry_header(&row)?;
                load_postings(&self.pool, &mut entry).await?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn find_entry_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<JournalEntry>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM journal_entries WHERE reference_id = $1",
            ENTRY_COLUMNS
        ))
        .bind(reference_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => {
                let mut entry = row_to_entry_header(&row)?;
                load_postings(&mut *self.tx, &mut entry).await?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn lock_entry(&mut self, id: Uuid) -> Result<Option<JournalEntry>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM journal_entries WHERE id = $1 FOR UPDATE",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => {
                let mut entry = row_to_entry_header(&row)?;
                load_postings(&mut *self.tx, &mut entry).await?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn lock_account(&mut self, id: Uuid) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn insert_entry(&mut self, entry: &JournalEntry) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO journal_entries (id, transaction_date, description, reference_id, status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.id)
        .bind(entry.transaction_date)
        .bind(&entry.description)
        .bind(&entry.reference_id)
        .bind(entry.status.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_posting(&mut self, posting: &Posting, seq: i16) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO postings (id, entry_id, seq, account_id, amount, direction)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(posting.id)
        .bind(posting.entry_id)
        .bind(seq)
        .bind(posting.account_id)
        .bind(posting.amount)
        .bind(posting.direction.sign())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn set_entry_status(
        &mut self,
        id: Uuid,
        status: EntryStatus,
    ) -> Result<(), LedgerError> {
        sqlx::query("UPDATE journal_entries SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_balance(
        &mut self,
        account_id: Uuid,
        new_balance: Decimal,
        expected_version: i64,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $1, version = version + 1, updated_at = NOW()
            WHERE id = $2 AND version = $3
            "#,
        )
        .bind(new_balance)
        .bind(account_id)
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
