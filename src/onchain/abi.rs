//! Contract ABI definitions for the ERC-8004 registries and the score oracle.
//!
//! Only the events and methods the pipeline touches are declared. Topic0
//! hashes come from the generated `SolEvent::SIGNATURE_HASH` constants and
//! are used to build `eth_getLogs` filters.

use alloy::primitives::B256;
use alloy::sol;
use alloy::sol_types::SolEvent;

// ─── Identity registry ───────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IIdentityRegistry {
        event Registered(uint256 indexed agentId, string agentURI, address indexed owner);
        event URIUpdated(uint256 indexed agentId, string newURI, address indexed updatedBy);
    }
}

// ─── Reputation registry ─────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IReputationRegistry {
        event NewFeedback(
            uint256 indexed agentId,
            address indexed clientAddress,
            uint64 feedbackIndex,
            int128 value,
            uint8 valueDecimals,
            string indexed indexedTag1,
            string tag1,
            string tag2,
            string endpoint,
            string feedbackURI,
            bytes32 feedbackHash
        );

        event FeedbackRevoked(
            uint256 indexed agentId,
            address indexed clientAddress,
            uint64 indexed feedbackIndex
        );
    }
}

// ─── Trust score oracle ──────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface ITrustScoreOracle {
        function updateScore(bytes32 agentId, uint256 score) external;
        function updateScoreBatch(bytes32[] calldata agentIds, uint256[] calldata newScores) external;
        function getScoreView(bytes32 agentId) external view returns (uint256 score, uint256 lastUpdated, bool exists);
    }
}

/// Topic0 hashes emitted by the identity registry that the indexer consumes.
pub fn identity_topics() -> Vec<B256> {
    vec![
        IIdentityRegistry::Registered::SIGNATURE_HASH,
        IIdentityRegistry::URIUpdated::SIGNATURE_HASH,
    ]
}

/// Topic0 hashes emitted by the reputation registry that the indexer consumes.
pub fn reputation_topics() -> Vec<B256> {
    vec![
        IReputationRegistry::NewFeedback::SIGNATURE_HASH,
        IReputationRegistry::FeedbackRevoked::SIGNATURE_HASH,
    ]
}
