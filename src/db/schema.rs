//! PostgreSQL schema bootstrap
//!
//! `accounts`, `journal_entries` and `postings` belong to the Journal Engine;
//! `payments` belongs to the Transfer Orchestrator. The two sides are linked
//! only by `journal_entries.reference_id = payments.payment_id`, never by a
//! foreign key.

use anyhow::Result;
use sqlx::PgPool;

const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id             UUID PRIMARY KEY,
    owner_id       UUID NOT NULL,
    number         VARCHAR(64) NOT NULL UNIQUE,
    account_type   VARCHAR(16) NOT NULL,
    currency       CHAR(3) NOT NULL,
    status         VARCHAR(16) NOT NULL DEFAULT 'ACTIVE',
    balance        NUMERIC(19, 4) NOT NULL DEFAULT 0,
    version        BIGINT NOT NULL DEFAULT 0,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_JOURNAL_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS journal_entries (
    id               UUID PRIMARY KEY,
    transaction_date TIMESTAMPTZ NOT NULL,
    description      TEXT NOT NULL,
    reference_id     VARCHAR(128),
    status           VARCHAR(16) NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

// One entry per reference: the idempotency key for redelivered payment events
const CREATE_REFERENCE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS journal_entries_reference_uq
    ON journal_entries (reference_id) WHERE reference_id IS NOT NULL
"#;

const CREATE_POSTINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS postings (
    id         UUID PRIMARY KEY,
    entry_id   UUID NOT NULL REFERENCES journal_entries(id),
    seq        SMALLINT NOT NULL,
    account_id UUID NOT NULL REFERENCES accounts(id),
    amount     NUMERIC(19, 4) NOT NULL CHECK (amount > 0),
    direction  SMALLINT NOT NULL CHECK (direction IN (-1, 1))
)
"#;

const CREATE_POSTINGS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS postings_entry_idx ON postings (entry_id, seq)
"#;

const CREATE_PAYMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payments (
    payment_id       UUID PRIMARY KEY,
    from_account_id  UUID NOT NULL,
    to_account_id    UUID NOT NULL,
    amount           NUMERIC(19, 4) NOT NULL CHECK (amount > 0),
    currency         CHAR(3) NOT NULL,
    status           VARCHAR(16) NOT NULL,
    description      TEXT NOT NULL,
    journal_entry_id UUID,
    failure_reason   TEXT,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_PAYMENTS_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS payments_status_updated_idx ON payments (status, updated_at)
"#;

/// Create all tables and indexes if they do not exist yet.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing PostgreSQL schema...");

    let statements = [
        ("accounts", CREATE_ACCOUNTS_TABLE),
        ("journal_entries", CREATE_JOURNAL_ENTRIES_TABLE),
        ("journal_entries_reference_uq", CREATE_REFERENCE_INDEX),
        ("postings", CREATE_POSTINGS_TABLE),
        ("postings_entry_idx", CREATE_POSTINGS_INDEX),
        ("payments", CREATE_PAYMENTS_TABLE),
        ("payments_status_updated_idx", CREATE_PAYMENTS_STATUS_INDEX),
    ];

    for (name, sql) in statements {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", name, e))?;
    }

    tracing::info!("PostgreSQL schema initialized successfully");
    Ok(())
}
