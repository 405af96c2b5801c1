//! bank_ledger - Double-entry ledger and settlement core
//!
//! ```text
//!            POST /transfer
//!                  │
//!   ┌──────────────▼──────────────┐   payment.created   ┌──────────────────┐
//!   │     Transfer Orchestrator   │────────────────────▶│  Journal Engine  │
//!   │ (validate, pre-check, CAS)  │◀────────────────────│ (postings, void) │
//!   └──────────────┬──────────────┘  completed / failed └────────▲─────────┘
//!                  │ broker down                                 │
//!                  └────── circuit breaker ── POST /transactions ┘
//! ```
//!
//! Usage: `bank_ledger [--all | --ledger | --orchestrator] [--env dev]`

use bank_ledger::config::AppConfig;
use bank_ledger::services::{self, Mode};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_mode() -> Mode {
    if std::env::args().any(|a| a == "--ledger") {
        Mode::Ledger
    } else if std::env::args().any(|a| a == "--orchestrator") {
        Mode::Orchestrator
    } else {
        Mode::All
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mode = get_mode();
    let config = AppConfig::load(&env)?;
    let _log_guard = bank_ledger::logging::init_logging(&config);

    tracing::info!(env = %env, mode = ?mode, "Starting bank_ledger");

    services::run(config, mode).await
}
