//! Transfer Orchestrator HTTP API
//!
//! - `POST /transfer`: 201 with the Payment (PENDING or COMPLETED). Failures
//!   after persistence carry the FAILED payment in `data`.
//! - `GET /payments/{id}`
//! - `GET /health`

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use std::sync::Arc;
use uuid::Uuid;

use super::error::PaymentError;
use super::orchestrator::{TransferFailure, TransferOrchestrator};
use super::types::{Payment, TransferRequest};
use crate::api::{self, ApiError, ApiResult, HealthResponse, created, ok};

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        if e.http_status() >= 500 {
            tracing::error!(code = e.code(), error = %e, "Orchestrator request failed");
        }
        ApiError::new(e.http_status(), e.code(), e.to_string())
    }
}

impl From<TransferFailure> for ApiError {
    fn from(failure: TransferFailure) -> Self {
        let err = ApiError::from(failure.error);
        match failure.payment {
            Some(ref payment) => err.with_data(payment),
            None => err,
        }
    }
}

pub fn router(orchestrator: Arc<TransferOrchestrator>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/transfer", post(transfer))
        .route("/payments/{id}", get(get_payment))
        .with_state(orchestrator)
}

async fn health_check() -> ApiResult<HealthResponse> {
    api::health("orchestrator")
}

async fn transfer(
    State(orchestrator): State<Arc<TransferOrchestrator>>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> ApiResult<Payment> {
    let Json(req) = payload?;
    created(orchestrator.initiate_transfer(req).await?)
}

async fn get_payment(
    State(orchestrator): State<Arc<TransferOrchestrator>>,
    Path(id): Path<String>,
) -> ApiResult<Payment> {
    let id = Uuid::parse_str(&id).map_err(|_| {
        ApiError::new(400, "INVALID_ARGUMENT", format!("invalid payment id: {}", id))
    })?;
    ok(orchestrator.get_payment(id).await?)
}
