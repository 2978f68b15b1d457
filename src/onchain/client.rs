//! Oracle contract client: priced batch writes, receipts, and reads.

use crate::config::ChainConfig;
use crate::onchain::abi::ITrustScoreOracle;
use crate::onchain::source::with_timeout;
use crate::onchain::types::{ChainError, ScoreView, SubmitRequest, TxReceipt};

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::future::IntoFuture;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Write/read access to the trust score oracle.
#[async_trait]
pub trait OracleClient: Send + Sync {
    async fn chain_head(&self) -> Result<u64, ChainError>;

    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Next nonce for the signing account, counting pending transactions.
    async fn next_nonce(&self) -> Result<u64, ChainError>;

    /// Nonce of the next transaction to be mined. Lower than `next_nonce`
    /// while earlier writes are stuck in the mempool.
    async fn mined_nonce(&self) -> Result<u64, ChainError>;

    /// Broadcast one write. Returns the transaction hash.
    async fn submit(&self, request: &SubmitRequest) -> Result<B256, ChainError>;

    /// `None` while the transaction is unmined (or unknown to the node).
    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, ChainError>;

    async fn score_view(&self, agent_id: B256) -> Result<ScoreView, ChainError>;
}

/// `OracleClient` backed by an HTTP provider with a local signer.
pub struct RpcOracleClient {
    provider: DynProvider,
    oracle: ITrustScoreOracle::ITrustScoreOracleInstance<DynProvider>,
    sender: Address,
    timeout: Duration,
}

impl RpcOracleClient {
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        let url = config
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("rpc_url: {e}")))?;
        let oracle_address = Address::from_str(&config.oracle_address)
            .map_err(|e| ChainError::Config(format!("oracle_address: {e}")))?;
        let signer = PrivateKeySigner::from_str(&config.private_key)
            .map_err(|e| ChainError::Config(format!("private key: {e}")))?;
        let sender = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();
        let oracle = ITrustScoreOracle::new(oracle_address, provider.clone());

        info!(oracle = %oracle_address, sender = %sender, "oracle client ready");
        Ok(Self {
            provider,
            oracle,
            sender,
            timeout: Duration::from_secs(config.rpc_timeout_secs),
        })
    }
}

#[async_trait]
impl OracleClient for RpcOracleClient {
    async fn chain_head(&self) -> Result<u64, ChainError> {
        with_timeout(self.timeout, "eth_blockNumber", self.provider.get_block_number()).await
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        with_timeout(self.timeout, "eth_gasPrice", self.provider.get_gas_price()).await
    }

    async fn next_nonce(&self) -> Result<u64, ChainError> {
        with_timeout(
            self.timeout,
            "eth_getTransactionCount",
            self.provider.get_transaction_count(self.sender).pending().into_future(),
        )
        .await
    }

    async fn mined_nonce(&self) -> Result<u64, ChainError> {
        with_timeout(
            self.timeout,
            "eth_getTransactionCount",
            self.provider.get_transaction_count(self.sender).latest().into_future(),
        )
        .await
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<B256, ChainError> {
        let scores: Vec<U256> = request.scores.iter().map(|s| U256::from(*s)).collect();

        let pending = if request.agents.len() == 1 {
            let call = self
                .oracle
                .updateScore(request.agents[0], scores[0])
                .gas(request.gas_limit)
                .max_fee_per_gas(request.max_fee_per_gas)
                .max_priority_fee_per_gas(request.max_priority_fee_per_gas)
                .nonce(request.nonce);
            with_timeout(self.timeout, "updateScore", call.send()).await?
        } else {
            let call = self
                .oracle
                .updateScoreBatch(request.agents.clone(), scores)
                .gas(request.gas_limit)
                .max_fee_per_gas(request.max_fee_per_gas)
                .max_priority_fee_per_gas(request.max_priority_fee_per_gas)
                .nonce(request.nonce);
            with_timeout(self.timeout, "updateScoreBatch", call.send()).await?
        };

        let tx_hash = *pending.tx_hash();
        debug!(tx = %tx_hash, agents = request.agents.len(), nonce = request.nonce, "oracle write broadcast");
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, ChainError> {
        let receipt = with_timeout(
            self.timeout,
            "eth_getTransactionReceipt",
            self.provider.get_transaction_receipt(tx_hash),
        )
        .await?;

        Ok(receipt.and_then(|r| {
            r.block_number.map(|block_number| TxReceipt {
                block_number,
                success: r.status(),
            })
        }))
    }

    async fn score_view(&self, agent_id: B256) -> Result<ScoreView, ChainError> {
        let view = with_timeout(
            self.timeout,
            "getScoreView",
            self.oracle.getScoreView(agent_id).call().into_future(),
        )
        .await?;

        Ok(ScoreView {
            score: view.score.saturating_to::<u32>(),
            last_updated: view.lastUpdated.saturating_to::<u64>(),
            exists: view.exists,
        })
    }
}
