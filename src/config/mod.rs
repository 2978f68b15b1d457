use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// HTTP JSON-RPC endpoint - overridden by env RPC_URL
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// ERC-8004 identity registry address
    #[serde(default = "default_identity_registry")]
    pub identity_registry: String,
    /// ERC-8004 reputation registry address
    #[serde(default = "default_reputation_registry")]
    pub reputation_registry: String,
    /// Trust score oracle contract - overridden by env ORACLE_CONTRACT
    #[serde(default)]
    pub oracle_address: String,
    /// Upper bound on any single RPC round trip.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    /// Signing key for oracle writes - loaded from env ORACLE_PRIVATE_KEY only
    #[serde(skip)]
    pub private_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    /// First block to scan when no checkpoint exists yet.
    #[serde(default)]
    pub start_block: u64,
    /// Maximum number of blocks fetched per pass.
    #[serde(default = "default_max_range")]
    pub max_range: u64,
    /// Blocks within this distance of the head are never indexed.
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    /// How far the checkpoint is rewound when a stored block hash no longer matches.
    #[serde(default = "default_reorg_rewind")]
    pub reorg_rewind: u64,
    #[serde(default = "default_indexer_poll")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_half_life")]
    pub half_life_days: f64,
    #[serde(default = "default_scoring_interval")]
    pub interval_secs: u64,
    /// Maximum agents recomputed in parallel.
    #[serde(default = "default_scoring_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Enable on-chain publishing (false = score locally only).
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_oracle_interval")]
    pub interval_secs: u64,
    /// Minimum change on the 0-10000 scale before a push.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: u32,
    /// Push regardless of drift once the last push is this old.
    #[serde(default = "default_max_staleness")]
    pub max_staleness_secs: u64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Estimated-gas ceiling for one batched write.
    #[serde(default = "default_max_gas_per_tx")]
    pub max_gas_per_tx: u64,
    #[serde(default = "default_base_gas")]
    pub base_gas: u64,
    #[serde(default = "default_gas_per_agent")]
    pub gas_per_agent: u64,
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    /// Receipt polling interval while awaiting confirmations.
    #[serde(default = "default_receipt_poll")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_tx_retries")]
    pub max_tx_retries: u32,
    /// Fee bump per retry attempt, in percent.
    #[serde(default = "default_gas_price_bump_pct")]
    pub gas_price_bump_pct: u32,
    #[serde(default = "default_max_fee_multiplier")]
    pub max_fee_multiplier: u32,
    #[serde(default = "default_priority_fee_wei")]
    pub priority_fee_wei: u128,
    /// Retry budget for oracle RPC reads (receipts, nonces, gas price).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_rpc_url() -> String {
    "https://eth.llamarpc.com".to_string()
}
fn default_identity_registry() -> String {
    "0x8004A169FB4a3325136EB29fA0ceB6D2e539a432".to_string()
}
fn default_reputation_registry() -> String {
    "0x8004BAa17C55a88189AE136b182e5fdA19dE9b63".to_string()
}
fn default_rpc_timeout() -> u64 {
    20
}
fn default_max_range() -> u64 {
    1000
}
fn default_confirmation_depth() -> u64 {
    12
}
fn default_reorg_rewind() -> u64 {
    64
}
fn default_indexer_poll() -> u64 {
    12
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_half_life() -> f64 {
    90.0
}
fn default_scoring_interval() -> u64 {
    300
}
fn default_scoring_concurrency() -> usize {
    8
}
fn default_oracle_interval() -> u64 {
    6 * 3600
}
fn default_drift_threshold() -> u32 {
    100
}
fn default_max_staleness() -> u64 {
    86_400
}
fn default_max_batch_size() -> usize {
    50
}
fn default_max_gas_per_tx() -> u64 {
    2_000_000
}
fn default_base_gas() -> u64 {
    50_000
}
fn default_gas_per_agent() -> u64 {
    30_000
}
fn default_confirmation_timeout() -> u64 {
    300
}
fn default_receipt_poll() -> u64 {
    6
}
fn default_max_tx_retries() -> u32 {
    3
}
fn default_gas_price_bump_pct() -> u32 {
    20
}
fn default_max_fee_multiplier() -> u32 {
    2
}
fn default_priority_fee_wei() -> u128 {
    1_000_000_000
}
fn default_store_path() -> String {
    "data/trust_scores.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            identity_registry: default_identity_registry(),
            reputation_registry: default_reputation_registry(),
            oracle_address: String::new(),
            rpc_timeout_secs: default_rpc_timeout(),
            private_key: String::new(),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            max_range: default_max_range(),
            confirmation_depth: default_confirmation_depth(),
            reorg_rewind: default_reorg_rewind(),
            poll_interval_secs: default_indexer_poll(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            half_life_days: default_half_life(),
            interval_secs: default_scoring_interval(),
            concurrency: default_scoring_concurrency(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_oracle_interval(),
            drift_threshold: default_drift_threshold(),
            max_staleness_secs: default_max_staleness(),
            max_batch_size: default_max_batch_size(),
            max_gas_per_tx: default_max_gas_per_tx(),
            base_gas: default_base_gas(),
            gas_per_agent: default_gas_per_agent(),
            confirmation_depth: default_confirmation_depth(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            poll_interval_secs: default_receipt_poll(),
            max_tx_retries: default_max_tx_retries(),
            gas_price_bump_pct: default_gas_price_bump_pct(),
            max_fee_multiplier: default_max_fee_multiplier(),
            priority_fee_wei: default_priority_fee_wei(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl IndexerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl OracleConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load a default config with env-only overrides (no file needed).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config {
            chain: ChainConfig::default(),
            indexer: IndexerConfig::default(),
            scoring: ScoringConfig::default(),
            oracle: OracleConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Ok(addr) = std::env::var("IDENTITY_REGISTRY") {
            self.chain.identity_registry = addr;
        }
        if let Ok(addr) = std::env::var("REPUTATION_REGISTRY") {
            self.chain.reputation_registry = addr;
        }
        if let Ok(addr) = std::env::var("ORACLE_CONTRACT") {
            self.chain.oracle_address = addr;
        }
        if let Ok(path) = std::env::var("DATABASE_PATH") {
            self.store.path = path;
        }
        if let Some(block) = std::env::var("INDEXER_START_BLOCK")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.indexer.start_block = block;
        }
        // Never stored in the config file
        self.chain.private_key = std::env::var("ORACLE_PRIVATE_KEY").unwrap_or_default();
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scoring.half_life_days <= 0.0 || !self.scoring.half_life_days.is_finite() {
            return Err(ConfigError::Invalid {
                field: "scoring.half_life_days",
                reason: format!("must be a positive number, got {}", self.scoring.half_life_days),
            });
        }
        if self.indexer.max_range == 0 {
            return Err(ConfigError::Invalid {
                field: "indexer.max_range",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.oracle.max_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "oracle.max_batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Oracle publishing needs a contract address and a signing key.
    pub fn require_oracle_credentials(&self) -> Result<(), ConfigError> {
        if self.chain.oracle_address.is_empty() {
            return Err(ConfigError::MissingEnv("ORACLE_CONTRACT".to_string()));
        }
        if self.chain.private_key.is_empty() {
            return Err(ConfigError::MissingEnv("ORACLE_PRIVATE_KEY".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.indexer.confirmation_depth, 12);
        assert_eq!(config.indexer.max_range, 1000);
        assert_eq!(config.scoring.half_life_days, 90.0);
        assert_eq!(config.oracle.drift_threshold, 100);
        assert_eq!(config.oracle.max_tx_retries, 3);
        assert!(!config.oracle.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [indexer]
            confirmation_depth = 32
            [oracle]
            enabled = true
            max_batch_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.indexer.confirmation_depth, 32);
        assert_eq!(config.indexer.reorg_rewind, 64);
        assert!(config.oracle.enabled);
        assert_eq!(config.oracle.max_batch_size, 10);
        assert_eq!(config.oracle.base_gas, 50_000);
    }

    #[test]
    fn test_oracle_retries_independent_of_indexer() {
        let config: Config = toml::from_str(
            r#"
            [indexer]
            max_retries = 9
            backoff_base_ms = 2000
            [oracle]
            max_retries = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.indexer.max_retries, 9);
        assert_eq!(config.oracle.max_retries, 2);
        assert_eq!(config.oracle.backoff_base_ms, 500);
        assert_eq!(config.oracle.backoff_max_ms, 30_000);
    }

    #[test]
    fn test_rejects_non_positive_half_life() {
        let mut config: Config = toml::from_str("").unwrap();
        config.scoring.half_life_days = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "scoring.half_life_days", .. })
        ));
    }

    #[test]
    fn test_private_key_never_read_from_file() {
        let config: Config = toml::from_str(
            r#"
            [chain]
            private_key = "0xdeadbeef"
            "#,
        )
        .unwrap();
        assert!(config.chain.private_key.is_empty());
    }
}
