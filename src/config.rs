use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// PostgreSQL connection URL. In-memory stores are used when absent.
    #[serde(default)]
    pub postgres_url: Option<String>,
}

/// Journal Engine service (accounts + postings)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    pub host: String,
    pub port: u16,
    /// Whole-operation attempts on optimistic version conflicts
    pub max_post_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            max_post_attempts: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrecheckPolicy {
    /// Lookup failures allow the transfer; the ledger remains authoritative
    FailOpen,
    /// Lookup failures reject the transfer
    FailClosed,
}

/// Transfer Orchestrator service
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrchestratorConfig {
    pub host: String,
    pub port: u16,
    /// Base URL of the Journal Engine (used by the synchronous path)
    pub ledger_base_url: String,
    pub request_timeout_ms: u64,
    pub balance_precheck: PrecheckPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ledger_base_url: "http://127.0.0.1:8081".to_string(),
            request_timeout_ms: 2_000,
            balance_precheck: PrecheckPolicy::FailOpen,
        }
    }
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrokerConfig {
    pub enabled: bool,
    pub publish_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            publish_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub timeout_secs: u64,
    pub half_open_max_calls: u32,
    /// Deadline for a single guarded call; expiry counts as a failure
    pub call_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout_secs: 30,
            half_open_max_calls: 3,
            call_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
        }
    }
}

/// Stale PENDING payment recovery
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    pub stale_after_secs: u64,
    pub batch_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 30,
            stale_after_secs: 60,
            batch_size: 100,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
