//! Chain-facing types: registry sources, decoded events, and adapter errors.

use crate::onchain::abi::{IIdentityRegistry, IReputationRegistry};
use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use thiserror::Error;

/// Errors surfaced by the chain adapters.
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    /// Timeout, rate limit, dropped connection, underpriced replacement.
    #[error("transient rpc failure: {0}")]
    Transient(String),
    #[error("transaction reverted: {0}")]
    Reverted(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("invalid chain configuration: {0}")]
    Config(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }

    /// Classify a raw RPC / transport error message.
    pub fn classify(err: impl std::fmt::Display) -> Self {
        let msg = err.to_string();
        let lower = msg.to_ascii_lowercase();
        let transient = lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("rate limit")
            || lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("connection")
            || lower.contains("503")
            || lower.contains("502")
            || lower.contains("underpriced")
            || lower.contains("nonce too low");
        if transient {
            ChainError::Transient(msg)
        } else if lower.contains("revert") {
            ChainError::Reverted(msg)
        } else {
            ChainError::Rpc(msg)
        }
    }
}

/// The two registries the indexer tracks, one checkpoint each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    IdentityRegistry,
    ReputationRegistry,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::IdentityRegistry, Source::ReputationRegistry];

    pub fn as_str(self) -> &'static str {
        match self {
            Source::IdentityRegistry => "identity_registry",
            Source::ReputationRegistry => "reputation_registry",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique position of a log on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub tx_hash: B256,
    pub log_index: u64,
}

/// Identity of a feedback entry across NewFeedback / FeedbackRevoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedbackId {
    pub agent_id: B256,
    pub client: Address,
    pub index: u64,
}

impl std::fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}-{:#x}-{}", self.agent_id, self.client, self.index)
    }
}

/// A registry log after topic dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    AgentRegistered {
        agent_id: B256,
        owner: Address,
        metadata_uri: Option<String>,
    },
    MetadataUpdated {
        agent_id: B256,
        metadata_uri: Option<String>,
    },
    NewFeedback {
        feedback_id: FeedbackId,
        category: Option<String>,
        raw_value: i128,
        value_decimals: u8,
        comment: Option<String>,
    },
    FeedbackRevoked {
        feedback_id: FeedbackId,
    },
    /// Topic0 not one we index. Logged and skipped.
    Unknown { topic0: Option<B256> },
}

impl RegistryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryEvent::AgentRegistered { .. } => "AgentRegistered",
            RegistryEvent::MetadataUpdated { .. } => "MetadataUpdated",
            RegistryEvent::NewFeedback { .. } => "NewFeedback",
            RegistryEvent::FeedbackRevoked { .. } => "FeedbackRevoked",
            RegistryEvent::Unknown { .. } => "Unknown",
        }
    }
}

/// A decoded log with its chain position.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLog {
    pub source: Source,
    pub key: EventKey,
    pub block_number: u64,
    pub block_hash: Option<B256>,
    pub event: RegistryEvent,
}

/// A log that could not be decoded. Recorded, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    pub tx_hash: Option<B256>,
    pub log_index: Option<u64>,
    pub block_number: Option<u64>,
    pub reason: String,
}

/// Hash and timestamp of a block, as seen by the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

/// Oracle's view of an agent (`getScoreView`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScoreView {
    pub score: u32,
    pub last_updated: u64,
    pub exists: bool,
}

/// A fully-priced oracle write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub agents: Vec<B256>,
    pub scores: Vec<u32>,
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Mined outcome of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub block_number: u64,
    pub success: bool,
}

/// Convert the registry's `uint256 agentId` into the 32-byte identifier.
pub fn agent_id_from_u256(value: U256) -> B256 {
    B256::from(value.to_be_bytes::<32>())
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Decode a raw log from `source` into a tagged event.
///
/// Logs without a position (tx hash, log index, block number) cannot be keyed
/// and are returned as failures, as are logs whose payload does not match the
/// ABI of their topic0.
pub fn decode_log(source: Source, log: &Log) -> Result<ChainLog, DecodeFailure> {
    let fail = |reason: String| DecodeFailure {
        tx_hash: log.transaction_hash,
        log_index: log.log_index,
        block_number: log.block_number,
        reason,
    };

    let (Some(tx_hash), Some(log_index), Some(block_number)) =
        (log.transaction_hash, log.log_index, log.block_number)
    else {
        return Err(fail("log has no chain position".to_string()));
    };

    let topic0 = log.topic0().copied();
    let event = match (source, topic0) {
        (Source::IdentityRegistry, Some(t)) if t == IIdentityRegistry::Registered::SIGNATURE_HASH => {
            let decoded = log
                .log_decode::<IIdentityRegistry::Registered>()
                .map_err(|e| fail(format!("Registered: {e}")))?;
            let ev = decoded.inner.data;
            RegistryEvent::AgentRegistered {
                agent_id: agent_id_from_u256(ev.agentId),
                owner: ev.owner,
                metadata_uri: non_empty(ev.agentURI),
            }
        }
        (Source::IdentityRegistry, Some(t)) if t == IIdentityRegistry::URIUpdated::SIGNATURE_HASH => {
            let decoded = log
                .log_decode::<IIdentityRegistry::URIUpdated>()
                .map_err(|e| fail(format!("URIUpdated: {e}")))?;
            let ev = decoded.inner.data;
            RegistryEvent::MetadataUpdated {
                agent_id: agent_id_from_u256(ev.agentId),
                metadata_uri: non_empty(ev.newURI),
            }
        }
        (Source::ReputationRegistry, Some(t))
            if t == IReputationRegistry::NewFeedback::SIGNATURE_HASH =>
        {
            let decoded = log
                .log_decode::<IReputationRegistry::NewFeedback>()
                .map_err(|e| fail(format!("NewFeedback: {e}")))?;
            let ev = decoded.inner.data;
            RegistryEvent::NewFeedback {
                feedback_id: FeedbackId {
                    agent_id: agent_id_from_u256(ev.agentId),
                    client: ev.clientAddress,
                    index: ev.feedbackIndex,
                },
                category: non_empty(ev.tag1),
                raw_value: ev.value,
                value_decimals: ev.valueDecimals,
                comment: non_empty(ev.feedbackURI),
            }
        }
        (Source::ReputationRegistry, Some(t))
            if t == IReputationRegistry::FeedbackRevoked::SIGNATURE_HASH =>
        {
            let decoded = log
                .log_decode::<IReputationRegistry::FeedbackRevoked>()
                .map_err(|e| fail(format!("FeedbackRevoked: {e}")))?;
            let ev = decoded.inner.data;
            RegistryEvent::FeedbackRevoked {
                feedback_id: FeedbackId {
                    agent_id: agent_id_from_u256(ev.agentId),
                    client: ev.clientAddress,
                    index: ev.feedbackIndex,
                },
            }
        }
        (_, topic0) => RegistryEvent::Unknown { topic0 },
    };

    Ok(ChainLog {
        source,
        key: EventKey { tx_hash, log_index },
        block_number,
        block_hash: log.block_hash,
        event,
    })
}
