//! Event Source Adapter: registry logs and chain head over HTTP JSON-RPC.
//!
//! Every call is bounded by the configured RPC timeout so a stalled
//! endpoint stalls only the calling loop iteration. Errors are classified
//! into transient / non-transient for the caller's retry policy.

use crate::config::ChainConfig;
use crate::onchain::abi;
use crate::onchain::types::{BlockRef, ChainError, Source};

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::Address;
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use std::future::{Future, IntoFuture};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Read access to the registries' event logs.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Current chain head block number.
    async fn chain_head(&self) -> Result<u64, ChainError>;

    /// Logs for `source`'s topic set in the inclusive range `[from, to]`.
    async fn get_logs(&self, source: Source, from: u64, to: u64) -> Result<Vec<Log>, ChainError>;

    /// Hash and timestamp of block `number`.
    async fn block_ref(&self, number: u64) -> Result<BlockRef, ChainError>;
}

/// Run an RPC future under a timeout, mapping both failure kinds to `ChainError`.
pub(crate) async fn with_timeout<T, E, F>(timeout: Duration, what: &str, fut: F) -> Result<T, ChainError>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ChainError::classify(format!("{what}: {e}"))),
        Err(_) => Err(ChainError::Transient(format!(
            "{what}: timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// `EventSource` backed by an HTTP provider.
pub struct RpcEventSource {
    provider: RootProvider,
    identity_registry: Address,
    reputation_registry: Address,
    timeout: Duration,
}

impl RpcEventSource {
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        let url = config
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("rpc_url: {e}")))?;
        let identity_registry = Address::from_str(&config.identity_registry)
            .map_err(|e| ChainError::Config(format!("identity_registry: {e}")))?;
        let reputation_registry = Address::from_str(&config.reputation_registry)
            .map_err(|e| ChainError::Config(format!("reputation_registry: {e}")))?;

        Ok(Self {
            provider: RootProvider::new_http(url),
            identity_registry,
            reputation_registry,
            timeout: Duration::from_secs(config.rpc_timeout_secs),
        })
    }

    fn filter_for(&self, source: Source) -> Filter {
        match source {
            Source::IdentityRegistry => Filter::new()
                .address(self.identity_registry)
                .event_signature(abi::identity_topics()),
            Source::ReputationRegistry => Filter::new()
                .address(self.reputation_registry)
                .event_signature(abi::reputation_topics()),
        }
    }
}

#[async_trait]
impl EventSource for RpcEventSource {
    async fn chain_head(&self) -> Result<u64, ChainError> {
        with_timeout(self.timeout, "eth_blockNumber", self.provider.get_block_number()).await
    }

    async fn get_logs(&self, source: Source, from: u64, to: u64) -> Result<Vec<Log>, ChainError> {
        let filter = self.filter_for(source).from_block(from).to_block(to);
        let logs = with_timeout(self.timeout, "eth_getLogs", self.provider.get_logs(&filter)).await?;
        debug!(source = %source, from, to, logs = logs.len(), "fetched logs");
        Ok(logs)
    }

    async fn block_ref(&self, number: u64) -> Result<BlockRef, ChainError> {
        let block = with_timeout(
            self.timeout,
            "eth_getBlockByNumber",
            self.provider
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .into_future(),
        )
        .await?
        .ok_or_else(|| ChainError::Transient(format!("block {number} not available yet")))?;

        Ok(BlockRef {
            number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
        })
    }
}
