//! Payment persistence
//!
//! Status changes are compare-and-swap on the current status
//! (`UPDATE ... WHERE status = 'PENDING'`), so a payment that reached a
//! terminal state is never rewritten, no matter how many result events or
//! recovery attempts arrive for it.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use super::error::PaymentError;
use super::types::{Payment, PaymentStatus, Settlement};
use crate::db::SafeRow;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: &Payment) -> Result<(), PaymentError>;

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, PaymentError>;

    /// Apply `settlement` only if the stored status equals `expected`.
    /// Returns false when the payment is missing or in another state.
    async fn update_status_if(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        settlement: &Settlement,
    ) -> Result<bool, PaymentError>;

    /// PENDING payments not touched for at least `older_than`, oldest first
    async fn find_stale_pending(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<Payment>, PaymentError>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

const PAYMENT_COLUMNS: &str = "payment_id, from_account_id, to_account_id, amount, currency, status, description, journal_entry_id, failure_reason, created_at, updated_at";

pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_payment(row: &PgRow) -> Result<Payment, PaymentError> {
    let status: String = row.try_get("status")?;
    let currency: String = row.try_get("currency")?;
    Ok(Payment {
        id: row.try_get("payment_id")?,
        from_account_id: row.try_get("from_account_id")?,
        to_account_id: row.try_get("to_account_id")?,
        amount: row.try_get("amount")?,
        currency: currency.trim().to_string(),
        status: status.parse()?,
        description: row.try_get("description")?,
        journal_entry_id: row.try_get_log::<Option<Uuid>>("journal_entry_id").flatten(),
        failure_reason: row.try_get_log::<Option<String>>("failure_reason").flatten(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert(&self, payment: &Payment) -> Result<(), PaymentError> {
        sqlx::query(
            r#"INSERT INTO payments
               (payment_id, from_account_id, to_account_id, amount, currency, status,
                description, journal_entry_id, failure_reason, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(payment.id)
        .bind(payment.from_account_id)
        .bind(payment.to_account_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.description)
        .bind(payment.journal_entry_id)
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, PaymentError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE payment_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn update_status_if(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        settlement: &Settlement,
    ) -> Result<bool, PaymentError> {
        let result = sqlx::query(
            r#"UPDATE payments
               SET status = $1, journal_entry_id = $2, failure_reason = $3, updated_at = NOW()
               WHERE payment_id = $4 AND status = $5"#,
        )
        .bind(settlement.status.as_str())
        .bind(settlement.journal_entry_id)
        .bind(&settlement.failure_reason)
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_stale_pending(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<Payment>, PaymentError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {} FROM payments
               WHERE status = 'PENDING' AND updated_at < NOW() - make_interval(secs => $1)
               ORDER BY updated_at
               LIMIT $2"#,
            PAYMENT_COLUMNS
        ))
        .bind(older_than.as_secs_f64())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_payment).collect()
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct InMemoryPaymentStore {
    payments: DashMap<Uuid, Payment>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.payments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payments.is_empty()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: &Payment) -> Result<(), PaymentError> {
        if self.payments.contains_key(&payment.id) {
            return Err(PaymentError::DatabaseError(format!(
                "duplicate payment id {}",
                payment.id
            )));
        }
        self.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, PaymentError> {
        Ok(self.payments.get(&id).map(|p| p.value().clone()))
    }

    async fn update_status_if(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        settlement: &Settlement,
    ) -> Result<bool, PaymentError> {
        match self.payments.get_mut(&id) {
            Some(mut payment) if payment.status == expected => {
                payment.apply(settlement);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stale_pending(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<Payment>, PaymentError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;
        let mut stale: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Pending && p.updated_at <= cutoff)
            .map(|p| p.value().clone())
            .collect();
        stale.sort_by_key(|p| p.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }
}
