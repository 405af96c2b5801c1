//! Journal Engine HTTP API
//!
//! - `POST /accounts`, `GET /accounts/{id}`, `POST /accounts/{id}/retire`
//! - `POST /transactions` (201 created, 200 when the reference was already posted)
//! - `GET /transactions/{id}`, `POST /transactions/{id}/void`
//! - `GET /health`

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use std::sync::Arc;
use uuid::Uuid;

use super::engine::JournalEngine;
use super::error::LedgerError;
use super::types::{Account, AccountBalance, JournalEntry, NewAccount, NewJournalEntry};
use crate::api::{self, ApiError, ApiResult, HealthResponse, created, ok};

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        if e.http_status() >= 500 {
            tracing::error!(error = %e, "Ledger request failed");
        }
        ApiError::new(e.http_status(), e.code(), e.to_string())
    }
}

pub fn router(engine: Arc<JournalEngine>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/accounts", post(open_account))
        .route("/accounts/{id}", get(get_account))
        .route("/accounts/{id}/retire", post(retire_account))
        .route("/transactions", post(post_transaction))
        .route("/transactions/{id}", get(get_transaction))
        .route("/transactions/{id}/void", post(void_transaction))
        .with_state(engine)
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::new(400, "INVALID_ARGUMENT", format!("invalid id: {}", raw)))
}

async fn health_check() -> ApiResult<HealthResponse> {
    api::health("ledger")
}

async fn open_account(
    State(engine): State<Arc<JournalEngine>>,
    payload: Result<Json<NewAccount>, JsonRejection>,
) -> ApiResult<Account> {
    let Json(req) = payload?;
    created(engine.open_account(req).await?)
}

/// Balance read used by the orchestrator pre-check; served via the cache
async fn get_account(
    State(engine): State<Arc<JournalEngine>>,
    Path(id): Path<String>,
) -> ApiResult<AccountBalance> {
    let id = parse_id(&id)?;
    ok(engine.get_balance(id).await?)
}

async fn retire_account(
    State(engine): State<Arc<JournalEngine>>,
    Path(id): Path<String>,
) -> ApiResult<Account> {
    let id = parse_id(&id)?;
    ok(engine.retire_account(id).await?)
}

async fn post_transaction(
    State(engine): State<Arc<JournalEngine>>,
    payload: Result<Json<NewJournalEntry>, JsonRejection>,
) -> ApiResult<JournalEntry> {
    let Json(req) = payload?;
    let outcome = engine.post_entry(req).await?;
    if outcome.created {
        created(outcome.entry)
    } else {
        ok(outcome.entry)
    }
}

async fn get_transaction(
    State(engine): State<Arc<JournalEngine>>,
    Path(id): Path<String>,
) -> ApiResult<JournalEntry> {
    let id = parse_id(&id)?;
    ok(engine.get_entry(id).await?)
}

async fn void_transaction(
    State(engine): State<Arc<JournalEngine>>,
    Path(id): Path<String>,
) -> ApiResult<JournalEntry> {
    let id = parse_id(&id)?;
    created(engine.void_entry(id).await?)
}
