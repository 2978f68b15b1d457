//! Row types persisted by the store.

use crate::onchain::EventKey;
use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered agent. Immutable after registration except `metadata_uri`.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: B256,
    pub owner: Address,
    pub metadata_uri: Option<String>,
    pub registered_block: u64,
    pub created_at: DateTime<Utc>,
}

/// A single feedback datum. Never deleted; `revoked` only moves false → true.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEvent {
    pub key: EventKey,
    /// `{agent}-{client}-{index}`, the id revocations refer to.
    pub feedback_id: String,
    pub subject: B256,
    pub author: Address,
    pub category: Option<String>,
    pub raw_value: i128,
    pub value_decimals: u8,
    pub comment: Option<String>,
    pub revoked: bool,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub score: f64,
    pub count: u64,
}

/// Output of one scoring pass for an agent. Overwritten on recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedScore {
    pub agent_id: B256,
    /// `None` when the agent has no non-revoked feedback.
    pub overall_score: Option<f64>,
    pub feedback_count: u64,
    pub positive_count: u64,
    pub negative_count: u64,
    /// Ordered by category name.
    pub categories: Vec<CategoryScore>,
    pub computed_at: DateTime<Utc>,
    pub as_of: DateTime<Utc>,
}

/// Confirmed on-chain state for an agent, plus the in-flight write if any.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleSyncState {
    pub agent_id: B256,
    /// 0-10000 scale. `None` until the first confirmed push.
    pub last_pushed_score: Option<u32>,
    pub last_pushed_at: Option<DateTime<Utc>>,
    pub pending_tx: Option<B256>,
    /// Consecutive failed pushes since the last confirmation.
    pub failed_attempts: u32,
}

/// Lifecycle state of one oracle write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Confirmed,
    Reverted,
    TimedOut,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Confirmed => "confirmed",
            SubmissionStatus::Reverted => "reverted",
            SubmissionStatus::TimedOut => "timed_out",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "reverted" => Some(Self::Reverted),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broadcast oracle write and the scores it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleSubmission {
    pub tx_hash: B256,
    pub agents: Vec<B256>,
    pub scores: Vec<u32>,
    pub nonce: u64,
    pub max_fee_per_gas: u128,
    pub attempt: u32,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A computed score joined with its sync state, input to candidate selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSyncRow {
    pub agent_id: B256,
    pub overall_score: Option<f64>,
    pub sync: Option<OracleSyncState>,
}

/// Result of committing one indexed block range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Agents created, metadata updates, feedback inserted, revocations applied.
    pub applied: usize,
    /// Events already present (re-delivery).
    pub duplicates: usize,
    pub revocations_buffered: usize,
    /// Buffered revocations that found their feedback during this commit.
    pub revocations_resolved: usize,
    pub failures_recorded: usize,
    pub unknown_skipped: usize,
}
