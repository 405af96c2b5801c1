//! Recovery Worker
//!
//! Background worker that re-settles payments stuck in PENDING, e.g. when a
//! `payment.created` event was lost or the result never came back. The
//! ledger posting is idempotent on the payment id, so re-settling a payment
//! that was in fact posted just reads back the existing entry. While the
//! ledger is unreachable, stale payments stay PENDING and are retried on
//! the next scan.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::PaymentError;
use super::orchestrator::TransferOrchestrator;
use crate::config::RecoveryConfig;

/// Configuration for the recovery worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for stale payments
    pub scan_interval: Duration,
    /// How long a payment must sit in PENDING to be considered stale
    pub stale_threshold: Duration,
    /// Maximum payments to process per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl From<&RecoveryConfig> for WorkerConfig {
    fn from(cfg: &RecoveryConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(cfg.scan_interval_secs),
            stale_threshold: Duration::from_secs(cfg.stale_after_secs),
            batch_size: cfg.batch_size,
        }
    }
}

pub struct RecoveryWorker {
    orchestrator: Arc<TransferOrchestrator>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(orchestrator: Arc<TransferOrchestrator>, config: WorkerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Run the recovery loop forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Recovery scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan; returns how many payments reached a terminal state
    pub async fn scan_and_recover(&self) -> Result<usize, PaymentError> {
        let stale = self
            .orchestrator
            .store()
            .find_stale_pending(self.config.stale_threshold, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            debug!("No stale payments found");
            return Ok(0);
        }

        info!(count = stale.len(), "Found stale payments to recover");

        let mut recovered = 0;
        for payment in stale {
            let payment_id = payment.id;
            match self.orchestrator.recover(payment).await {
                Ok(settled) => {
                    info!(payment_id = %payment_id, status = %settled.status, "Payment recovered");
                    recovered += 1;
                }
                Err(failure) => match failure.payment {
                    Some(ref p) if p.status.is_terminal() => {
                        info!(
                            payment_id = %payment_id,
                            status = %p.status,
                            code = failure.error.code(),
                            "Payment recovered"
                        );
                        recovered += 1;
                    }
                    _ if failure.error.is_outage() => warn!(
                        payment_id = %payment_id,
                        code = failure.error.code(),
                        "Ledger unavailable, retrying payment next scan"
                    ),
                    _ => error!(
                        payment_id = %payment_id,
                        error = %failure.error,
                        "Failed to recover payment"
                    ),
                },
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered payments this scan");
        }

        Ok(recovered)
    }
}
