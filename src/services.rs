//! Process wiring
//!
//! ```text
//! --ledger        Journal Engine HTTP API
//! --orchestrator  Orchestrator HTTP API + recovery worker, synchronous path over HTTP
//! --all           both, connected through the in-process broker
//! ```

use anyhow::Context;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use crate::cache::{BalanceCache, StoreBalanceSource, TimedCacheBackend};
use crate::config::AppConfig;
use crate::db::{self, Database};
use crate::ledger::{self, InMemoryLedgerStore, JournalEngine, LedgerStore, PaymentCreatedConsumer, PgLedgerStore};
use crate::payment::{
    self, HttpLedgerClient, InMemoryPaymentStore, LedgerClient, PaymentResultConsumer, PaymentStore,
    PgPaymentStore, RecoveryWorker, TransferOrchestrator, WorkerConfig,
};
use crate::relay::{InMemoryBroker, PAYMENT_COMPLETED, PAYMENT_CREATED, PAYMENT_FAILED, PaymentEventProducer};
use crate::resilience::{BreakerRegistry, BreakerSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ledger,
    Orchestrator,
    All,
}

pub struct Stores {
    pub ledger: Arc<dyn LedgerStore>,
    pub payments: Arc<dyn PaymentStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            ledger: Arc::new(InMemoryLedgerStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
        }
    }

    /// PostgreSQL when `postgres_url` is set, in-memory otherwise
    pub async fn open(config: &AppConfig) -> anyhow::Result<Self> {
        let Some(ref url) = config.postgres_url else {
            info!("No postgres_url configured, using in-memory stores");
            return Ok(Self::in_memory());
        };

        let db = Database::connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        db.health_check().await.context("PostgreSQL health check failed")?;
        db::init_schema(db.pool()).await?;
        Ok(Self {
            ledger: Arc::new(PgLedgerStore::new(db.pool().clone())),
            payments: Arc::new(PgPaymentStore::new(db.pool().clone())),
        })
    }
}

pub fn build_engine(config: &AppConfig, store: Arc<dyn LedgerStore>) -> JournalEngine {
    let engine = JournalEngine::new(store.clone()).with_max_attempts(config.ledger.max_post_attempts);
    if !config.cache.enabled {
        return engine;
    }
    let cache = BalanceCache::new(
        Arc::new(TimedCacheBackend::new(config.cache.ttl_secs)),
        Arc::new(StoreBalanceSource::new(store)),
    );
    engine.with_cache(Arc::new(cache))
}

pub fn build_orchestrator(
    config: &AppConfig,
    payments: Arc<dyn PaymentStore>,
    ledger: Arc<dyn LedgerClient>,
    producer: Option<PaymentEventProducer>,
) -> TransferOrchestrator {
    let breakers = Arc::new(BreakerRegistry::new(BreakerSettings::from(&config.circuit_breaker)));
    let orchestrator = TransferOrchestrator::new(payments, ledger, breakers)
        .with_precheck(Some(config.orchestrator.balance_precheck));
    match producer {
        Some(producer) => orchestrator.with_producer(producer),
        None => orchestrator,
    }
}

/// Subscribe both consumers to `broker` and return the producer the
/// orchestrator publishes `payment.created` with.
pub fn spawn_relay(
    broker: Arc<InMemoryBroker>,
    engine: Arc<JournalEngine>,
    payments: Arc<dyn PaymentStore>,
    publish_timeout: Duration,
) -> PaymentEventProducer {
    let producer = PaymentEventProducer::new(broker.clone(), publish_timeout);

    let created = broker.subscribe(PAYMENT_CREATED);
    let ledger_side = Arc::new(PaymentCreatedConsumer::new(engine, producer.clone()));
    tokio::spawn(async move { ledger_side.run(created).await });

    let (completed, failed) = (broker.subscribe(PAYMENT_COMPLETED), broker.subscribe(PAYMENT_FAILED));
    let orchestrator_side = PaymentResultConsumer::new(payments);
    tokio::spawn(async move { orchestrator_side.run(completed, failed).await });

    producer
}

pub fn spawn_recovery(config: &AppConfig, orchestrator: Arc<TransferOrchestrator>) {
    if !config.recovery.enabled {
        return;
    }
    let worker = RecoveryWorker::new(orchestrator, WorkerConfig::from(&config.recovery));
    tokio::spawn(async move { worker.run().await });
}

/// Bind and serve until the listener fails
pub async fn serve(name: &str, router: Router, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {} to {} (port in use?)", name, addr))?;
    info!(service = name, addr = %addr, "Listening");
    axum::serve(listener, router)
        .await
        .with_context(|| format!("{} server error", name))
}

pub async fn run(config: AppConfig, mode: Mode) -> anyhow::Result<()> {
    let stores = Stores::open(&config).await?;

    let ledger_client = || -> anyhow::Result<Arc<dyn LedgerClient>> {
        let client = HttpLedgerClient::new(
            &config.orchestrator.ledger_base_url,
            config.orchestrator.request_timeout(),
        )?;
        Ok(Arc::new(client))
    };

    match mode {
        Mode::Ledger => {
            let engine = Arc::new(build_engine(&config, stores.ledger));
            serve("ledger", ledger::api::router(engine), &config.ledger.host, config.ledger.port).await
        }
        Mode::Orchestrator => {
            let orchestrator = Arc::new(build_orchestrator(&config, stores.payments, ledger_client()?, None));
            spawn_recovery(&config, orchestrator.clone());
            serve(
                "orchestrator",
                payment::api::router(orchestrator),
                &config.orchestrator.host,
                config.orchestrator.port,
            )
            .await
        }
        Mode::All => {
            let engine = Arc::new(build_engine(&config, stores.ledger));
            let producer = config.broker.enabled.then(|| {
                spawn_relay(
                    Arc::new(InMemoryBroker::new()),
                    engine.clone(),
                    stores.payments.clone(),
                    Duration::from_millis(config.broker.publish_timeout_ms),
                )
            });
            let orchestrator = Arc::new(build_orchestrator(
                &config,
                stores.payments,
                ledger_client()?,
                producer,
            ));
            spawn_recovery(&config, orchestrator.clone());

            tokio::try_join!(
                serve("ledger", ledger::api::router(engine), &config.ledger.host, config.ledger.port),
                serve(
                    "orchestrator",
                    payment::api::router(orchestrator),
                    &config.orchestrator.host,
                    config.orchestrator.port,
                ),
            )?;
            Ok(())
        }
    }
}
