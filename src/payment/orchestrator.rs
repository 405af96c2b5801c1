//! Transfer Orchestrator
//!
//! ```text
//! validate ──▶ pre-check ──▶ persist PENDING ──▶ publish payment.created ──▶ return PENDING
//!                                                    │ failed / no broker
//!                                                    ▼
//!                                  breaker("ledger") ─▶ POST /transactions
//!                                                    │
//!                                      COMPLETED ◀───┴───▶ FAILED (+ error)
//! ```
//!
//! Nothing is persisted for a request that fails validation or the
//! pre-check. Once the payment exists, every failure is reported together
//! with the payment so the caller can reconcile.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::db::PaymentStore;
use super::error::PaymentError;
use super::ledger_client::{LedgerCallError, LedgerClient};
use super::types::{Payment, PaymentStatus, Settlement, TransferRequest, ValidatedTransfer};
use crate::config::PrecheckPolicy;
use crate::relay::{PAYMENT_CREATED, PaymentEvent, PaymentEventProducer};
use crate::resilience::{BreakerError, BreakerRegistry};

/// Breaker guarding `POST /transactions`
pub const LEDGER_POSTING: &str = "ledger";
/// Breaker guarding `GET /accounts/{id}`
pub const LEDGER_ACCOUNTS: &str = "ledger.accounts";

/// A failed transfer, with the payment when one was persisted
#[derive(Debug, Clone)]
pub struct TransferFailure {
    pub error: PaymentError,
    pub payment: Option<Payment>,
}

impl TransferFailure {
    fn rejected(error: PaymentError) -> Self {
        Self {
            error,
            payment: None,
        }
    }
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payment {
            Some(ref p) => write!(f, "payment {} {}: {}", p.id, p.status, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for TransferFailure {}

pub struct TransferOrchestrator {
    store: Arc<dyn PaymentStore>,
    ledger: Arc<dyn LedgerClient>,
    producer: Option<PaymentEventProducer>,
    breakers: Arc<BreakerRegistry>,
    /// None disables the balance pre-check
    precheck: Option<PrecheckPolicy>,
}

impl TransferOrchestrator {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        ledger: Arc<dyn LedgerClient>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            store,
            ledger,
            producer: None,
            breakers,
            precheck: Some(PrecheckPolicy::FailOpen),
        }
    }

    pub fn with_producer(mut self, producer: PaymentEventProducer) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn with_precheck(mut self, precheck: Option<PrecheckPolicy>) -> Self {
        self.precheck = precheck;
        self
    }

    pub fn store(&self) -> &Arc<dyn PaymentStore> {
        &self.store
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub async fn get_payment(&self, id: Uuid) -> Result<Payment, PaymentError> {
        self.store
            .get(id)
            .await?
            .ok_or(PaymentError::PaymentNotFound(id))
    }

    pub async fn initiate_transfer(&self, req: TransferRequest) -> Result<Payment, TransferFailure> {
        let transfer = req.validate().map_err(|e| {
            debug!(code = e.code(), error = %e, "Transfer rejected by validation");
            TransferFailure::rejected(e)
        })?;

        self.precheck(&transfer)
            .await
            .map_err(TransferFailure::rejected)?;

        let payment = transfer.into_payment();
        self.store
            .insert(&payment)
            .await
            .map_err(TransferFailure::rejected)?;
        info!(
            payment_id = %payment.id,
            from = %payment.from_account_id,
            to = %payment.to_account_id,
            amount = %payment.amount,
            currency = %payment.currency,
            "Payment created"
        );

        if let Some(ref producer) = self.producer {
            match producer
                .publish(PAYMENT_CREATED, &PaymentEvent::from(&payment))
                .await
            {
                Ok(()) => return Ok(payment),
                Err(e) => warn!(
                    payment_id = %payment.id,
                    error = %e,
                    "Broker publish failed, settling synchronously"
                ),
            }
        }

        self.settle_sync(payment).await
    }

    /// Advisory balance check; the ledger's in-transaction check is the
    /// authoritative one.
    async fn precheck(&self, transfer: &ValidatedTransfer) -> Result<(), PaymentError> {
        let Some(policy) = self.precheck else {
            return Ok(());
        };

        let breaker = self.breakers.get(LEDGER_ACCOUNTS);
        let result = breaker
            .call_with(
                self.ledger.get_balance(transfer.from),
                LedgerCallError::is_failure,
            )
            .await;

        let lookup_error = match result {
            Ok(balance) => {
                if !balance.account_type.allows_negative() && balance.balance < transfer.amount {
                    debug!(account_id = %transfer.from, "Pre-check: insufficient funds");
                    return Err(PaymentError::InsufficientFunds(transfer.from));
                }
                return Ok(());
            }
            Err(BreakerError::Inner(LedgerCallError::Rejected { status: 404, .. })) => {
                PaymentError::AccountNotFound(transfer.from.to_string())
            }
            Err(e) => breaker_error(e, transfer.from),
        };

        match policy {
            PrecheckPolicy::FailOpen => {
                warn!(
                    account_id = %transfer.from,
                    error = %lookup_error,
                    "Balance pre-check inconclusive, deferring to ledger"
                );
                Ok(())
            }
            PrecheckPolicy::FailClosed => Err(lookup_error),
        }
    }

    /// Post the payment through the breaker and record the outcome.
    /// Safe to repeat: the ledger is idempotent on the payment id.
    pub async fn settle_sync(&self, payment: Payment) -> Result<Payment, TransferFailure> {
        match self.post(&payment).await {
            Ok(entry_id) => self.complete(payment, entry_id).await,
            Err(error) => Err(self.fail(payment, error).await),
        }
    }

    /// Re-settle a payment found stuck in PENDING. An unreachable ledger or
    /// open breaker leaves it PENDING for the next scan, since the broker
    /// path may still deliver it; only a ledger rejection fails it.
    pub async fn recover(&self, payment: Payment) -> Result<Payment, TransferFailure> {
        match self.post(&payment).await {
            Ok(entry_id) => self.complete(payment, entry_id).await,
            Err(error) if error.is_outage() => {
                debug!(
                    payment_id = %payment.id,
                    code = error.code(),
                    "Ledger unavailable, payment stays PENDING"
                );
                Err(TransferFailure {
                    error,
                    payment: Some(payment),
                })
            }
            Err(error) => Err(self.fail(payment, error).await),
        }
    }

    async fn post(&self, payment: &Payment) -> Result<Uuid, PaymentError> {
        let breaker = self.breakers.get(LEDGER_POSTING);
        breaker
            .call_with(self.ledger.post_transfer(payment), LedgerCallError::is_failure)
            .await
            .map_err(|e| {
                if outcome_unknown(&e) {
                    warn!(
                        payment_id = %payment.id,
                        reference_id = %payment.reference_id(),
                        error = %e,
                        "Ledger posting outcome unknown, entry may exist under this reference"
                    );
                }
                breaker_error(e, payment.from_account_id)
            })
    }

    async fn complete(&self, payment: Payment, entry_id: Uuid) -> Result<Payment, TransferFailure> {
        let updated = self
            .record(&payment, Settlement::completed(Some(entry_id)))
            .await
            .map_err(|error| TransferFailure {
                error,
                payment: Some(payment.clone()),
            })?;
        info!(payment_id = %payment.id, entry_id = %entry_id, "Payment settled synchronously");
        Ok(updated)
    }

    async fn fail(&self, payment: Payment, error: PaymentError) -> TransferFailure {
        warn!(
            payment_id = %payment.id,
            code = error.code(),
            error = %error,
            "Synchronous settlement failed"
        );
        let recorded = self
            .record(&payment, Settlement::failed(format!("{}: {}", error.code(), error)))
            .await;
        let updated = match recorded {
            Ok(p) => p,
            Err(db_err) => {
                error!(payment_id = %payment.id, error = %db_err, "Could not record failed payment");
                payment
            }
        };
        TransferFailure {
            error,
            payment: Some(updated),
        }
    }

    /// CAS PENDING -> terminal. When the payment already left PENDING
    /// (another path settled it) the stored version wins.
    pub async fn record(&self, payment: &Payment, settlement: Settlement) -> Result<Payment, PaymentError> {
        if self
            .store
            .update_status_if(payment.id, PaymentStatus::Pending, &settlement)
            .await?
        {
            let mut updated = payment.clone();
            updated.apply(&settlement);
            return Ok(updated);
        }
        let current = self.get_payment(payment.id).await?;
        debug!(
            payment_id = %payment.id,
            status = %current.status,
            "Payment already settled, keeping stored outcome"
        );
        Ok(current)
    }
}

/// The request may have reached the ledger and committed
fn outcome_unknown(e: &BreakerError<LedgerCallError>) -> bool {
    match e {
        BreakerError::Open(_) => false,
        BreakerError::Timeout(_) => true,
        BreakerError::Inner(LedgerCallError::Unavailable(_)) => true,
        BreakerError::Inner(LedgerCallError::Rejected { status, .. }) => *status >= 500,
    }
}

/// Map a guarded ledger call failure onto the orchestrator taxonomy
fn breaker_error(e: BreakerError<LedgerCallError>, from: Uuid) -> PaymentError {
    match e {
        BreakerError::Open(destination) => PaymentError::CircuitOpen(destination),
        BreakerError::Timeout(destination) => {
            PaymentError::LedgerUnavailable(format!("{} timed out", destination))
        }
        BreakerError::Inner(LedgerCallError::Unavailable(msg)) => PaymentError::LedgerUnavailable(msg),
        BreakerError::Inner(LedgerCallError::Rejected {
            status,
            code,
            message,
        }) => match code.as_str() {
            "INSUFFICIENT_FUNDS" => PaymentError::InsufficientFunds(from),
            "ACCOUNT_NOT_FOUND" => PaymentError::AccountNotFound(message),
            _ if status >= 500 => PaymentError::LedgerUnavailable(message),
            _ => PaymentError::LedgerRejected { code, message },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{AccountBalance, AccountType};
    use crate::payment::db::InMemoryPaymentStore;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted ledger: fixed balance, configurable posting result
    struct MockLedger {
        balance: Result<AccountBalance, LedgerCallError>,
        post: Mutex<Result<Uuid, LedgerCallError>>,
        posts: AtomicUsize,
    }

    impl MockLedger {
        fn healthy(balance: i64) -> Self {
            Self {
                balance: Ok(AccountBalance {
                    id: Uuid::nil(),
                    account_type: AccountType::Asset,
                    currency: "USD".into(),
                    balance: Decimal::from(balance),
                    version: 1,
                }),
                post: Mutex::new(Ok(Uuid::new_v4())),
                posts: AtomicUsize::new(0),
            }
        }

        fn down() -> Self {
            Self {
                balance: Err(LedgerCallError::Unavailable("refused".into())),
                post: Mutex::new(Err(LedgerCallError::Unavailable("refused".into()))),
                posts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerClient for MockLedger {
        async fn post_transfer(&self, _payment: &Payment) -> Result<Uuid, LedgerCallError> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            self.post.lock().unwrap().clone()
        }

        async fn get_balance(&self, _account_id: Uuid) -> Result<AccountBalance, LedgerCallError> {
            self.balance.clone()
        }
    }

    fn request(amount: &str) -> TransferRequest {
        TransferRequest {
            from_account_id: Uuid::new_v4().to_string(),
            to_account_id: Uuid::new_v4().to_string(),
            amount: amount.into(),
            currency: "USD".into(),
            description: "test".into(),
        }
    }

    fn orchestrator(ledger: Arc<MockLedger>) -> (TransferOrchestrator, Arc<InMemoryPaymentStore>) {
        let store = Arc::new(InMemoryPaymentStore::new());
        let o = TransferOrchestrator::new(store.clone(), ledger, Arc::new(BreakerRegistry::default()));
        (o, store)
    }

    #[tokio::test]
    async fn test_sync_success_completes_payment() {
        let ledger = Arc::new(MockLedger::healthy(500));
        let (o, store) = orchestrator(ledger.clone());

        let payment = o.initiate_transfer(request("100")).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert!(payment.journal_entry_id.is_some());
        let stored = store.get(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert_eq!(stored.journal_entry_id, payment.journal_entry_id);
    }

    #[tokio::test]
    async fn test_validation_failure_persists_nothing() {
        let ledger = Arc::new(MockLedger::healthy(500));
        let (o, store) = orchestrator(ledger.clone());

        let mut req = request("100");
        req.to_account_id = req.from_account_id.clone();
        let failure = o.initiate_transfer(req).await.unwrap_err();
        assert_eq!(failure.error.code(), "SAME_ACCOUNT");
        assert!(failure.payment.is_none());

        let failure = o.initiate_transfer(request("-50.00")).await.unwrap_err();
        assert_eq!(failure.error.to_string(), "amount must be greater than zero");
        assert!(store.is_empty());
        assert_eq!(ledger.posts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_precheck_rejects_before_persist() {
        let ledger = Arc::new(MockLedger::healthy(50));
        let (o, store) = orchestrator(ledger.clone());

        let failure = o.initiate_transfer(request("100")).await.unwrap_err();
        assert!(matches!(failure.error, PaymentError::InsufficientFunds(_)));
        assert!(failure.payment.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_precheck_fail_open_vs_fail_closed() {
        let ledger = Arc::new(MockLedger::down());
        let (o, store) = orchestrator(ledger.clone());

        // fail-open: the transfer proceeds and fails at settlement
        let failure = o.initiate_transfer(request("1")).await.unwrap_err();
        let payment = failure.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(failure.error.code(), "LEDGER_UNAVAILABLE");
        assert_eq!(store.len(), 1);

        let (o, store) = orchestrator(ledger);
        let o = o.with_precheck(Some(PrecheckPolicy::FailClosed));
        let failure = o.initiate_transfer(request("1")).await.unwrap_err();
        assert_eq!(failure.error.code(), "LEDGER_UNAVAILABLE");
        assert!(failure.payment.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_ledger_rejection_marks_failed() {
        let ledger = Arc::new(MockLedger::healthy(500));
        *ledger.post.lock().unwrap() = Err(LedgerCallError::Rejected {
            status: 422,
            code: "ACCOUNT_INACTIVE".into(),
            message: "Account is not active".into(),
        });
        let (o, _store) = orchestrator(ledger);

        let failure = o.initiate_transfer(request("1")).await.unwrap_err();
        assert_eq!(failure.error.code(), "LEDGER_REJECTED");
        let payment = failure.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert!(payment.failure_reason.unwrap().starts_with("LEDGER_REJECTED"));
        // a business rejection does not count against the breaker
        assert_eq!(o.breakers().get(LEDGER_POSTING).failure_count(), 0);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let ledger = Arc::new(MockLedger::down());
        let (o, _store) = orchestrator(ledger.clone());
        let o = o.with_precheck(None);

        for _ in 0..5 {
            let failure = o.initiate_transfer(request("1")).await.unwrap_err();
            assert_eq!(failure.error.code(), "LEDGER_UNAVAILABLE");
        }
        let failure = o.initiate_transfer(request("1")).await.unwrap_err();
        assert_eq!(failure.error.code(), "CIRCUIT_OPEN");
        assert_eq!(failure.payment.unwrap().status, PaymentStatus::Failed);
        assert_eq!(ledger.posts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_record_keeps_existing_terminal_state() {
        let ledger = Arc::new(MockLedger::healthy(500));
        let (o, store) = orchestrator(ledger);
        let payment = Payment::new(Uuid::new_v4(), Uuid::new_v4(), Decimal::ONE, "USD".into(), "".into());
        store.insert(&payment).await.unwrap();

        let done = o.record(&payment, Settlement::completed(None)).await.unwrap();
        assert_eq!(done.status, PaymentStatus::Completed);
        let again = o.record(&payment, Settlement::failed("late")).await.unwrap();
        assert_eq!(again.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_recover_keeps_pending_through_outage() {
        let ledger = Arc::new(MockLedger::down());
        let (o, store) = orchestrator(ledger.clone());
        let payment = Payment::new(Uuid::new_v4(), Uuid::new_v4(), Decimal::ONE, "USD".into(), "".into());
        store.insert(&payment).await.unwrap();

        // unreachable, then breaker open: neither is an answer from the ledger
        for _ in 0..6 {
            let failure = o.recover(payment.clone()).await.unwrap_err();
            assert!(failure.error.is_outage());
            assert_eq!(failure.payment.unwrap().status, PaymentStatus::Pending);
        }
        assert_eq!(o.breakers().get(LEDGER_POSTING).state(), crate::resilience::BreakerState::Open);
        assert_eq!(store.get(payment.id).await.unwrap().unwrap().status, PaymentStatus::Pending);

        // the broker path completes it meanwhile
        assert!(
            store
                .update_status_if(payment.id, PaymentStatus::Pending, &Settlement::completed(None))
                .await
                .unwrap()
        );
        assert_eq!(store.get(payment.id).await.unwrap().unwrap().status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_recover_fails_on_rejection() {
        let ledger = Arc::new(MockLedger::healthy(500));
        *ledger.post.lock().unwrap() = Err(LedgerCallError::Rejected {
            status: 422,
            code: "INSUFFICIENT_FUNDS".into(),
            message: "Insufficient funds".into(),
        });
        let (o, store) = orchestrator(ledger);
        let payment = Payment::new(Uuid::new_v4(), Uuid::new_v4(), Decimal::ONE, "USD".into(), "".into());
        store.insert(&payment).await.unwrap();

        let failure = o.recover(payment.clone()).await.unwrap_err();
        assert_eq!(failure.error.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(store.get(payment.id).await.unwrap().unwrap().status, PaymentStatus::Failed);
    }

    #[test]
    fn test_outcome_unknown_classification() {
        assert!(outcome_unknown(&BreakerError::Timeout("ledger".into())));
        assert!(outcome_unknown(&BreakerError::Inner(LedgerCallError::Unavailable(
            "reset".into()
        ))));
        assert!(outcome_unknown(&BreakerError::Inner(LedgerCallError::Rejected {
            status: 502,
            code: "UNKNOWN".into(),
            message: "bad gateway".into(),
        })));
        assert!(!outcome_unknown(&BreakerError::Open("ledger".into())));
        assert!(!outcome_unknown(&BreakerError::Inner(LedgerCallError::Rejected {
            status: 422,
            code: "INSUFFICIENT_FUNDS".into(),
            message: "no".into(),
        })));
    }

    #[tokio::test]
    async fn test_get_payment_not_found() {
        let (o, _store) = orchestrator(Arc::new(MockLedger::healthy(0)));
        assert!(matches!(
            o.get_payment(Uuid::new_v4()).await,
            Err(PaymentError::PaymentNotFound(_))
        ));
    }
}
