//! Pure decision logic for the oracle updater: which agents to push, how to
//! group them, and what to pay.

use crate::config::OracleConfig;
use crate::store::ScoreSyncRow;

use alloy::primitives::B256;
use chrono::{DateTime, Utc};

/// Largest value the oracle accepts.
pub const MAX_ONCHAIN_SCORE: u32 = 10_000;

/// Map a 0-100 score onto the oracle's 0-10000 scale.
pub fn scale_score(score: f64) -> u32 {
    if !score.is_finite() {
        return 0;
    }
    (score * 100.0).round().clamp(0.0, f64::from(MAX_ONCHAIN_SCORE)) as u32
}

/// An agent whose on-chain score should be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub agent_id: B256,
    pub score: u32,
    /// Failed pushes so far, drives the fee bump.
    pub attempt: u32,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Selection {
    pub candidates: Vec<Candidate>,
    /// Agents skipped because their pushes exhausted `max_tx_retries`.
    pub parked: Vec<B256>,
    /// Agents skipped because a write for them is still unresolved.
    pub in_flight: usize,
}

/// Apply the drift / staleness gate to every scored agent.
pub fn select_candidates(
    rows: &[ScoreSyncRow],
    now: DateTime<Utc>,
    config: &OracleConfig,
) -> Selection {
    let mut selection = Selection::default();
    for row in rows {
        let Some(overall) = row.overall_score else {
            continue;
        };
        let score = scale_score(overall);

        let Some(sync) = &row.sync else {
            selection.candidates.push(Candidate {
                agent_id: row.agent_id,
                score,
                attempt: 0,
            });
            continue;
        };
        if sync.pending_tx.is_some() {
            selection.in_flight += 1;
            continue;
        }
        if sync.failed_attempts >= config.max_tx_retries {
            selection.parked.push(row.agent_id);
            continue;
        }

        let drifted = match sync.last_pushed_score {
            Some(pushed) => score.abs_diff(pushed) >= config.drift_threshold,
            None => true,
        };
        let stale = match sync.last_pushed_at {
            Some(at) => (now - at).num_seconds() >= config.max_staleness_secs as i64,
            None => true,
        };
        if drifted || stale {
            selection.candidates.push(Candidate {
                agent_id: row.agent_id,
                score,
                attempt: sync.failed_attempts,
            });
        }
    }
    selection
}

/// Gas limit for a write carrying `agents` scores.
pub fn estimate_gas(agents: usize, config: &OracleConfig) -> u64 {
    config
        .base_gas
        .saturating_add(config.gas_per_agent.saturating_mul(agents as u64))
}

/// Largest batch that fits both `max_batch_size` and `max_gas_per_tx`. Never
/// below one, so an oversized single agent still gets its own write.
pub fn max_agents_per_tx(config: &OracleConfig) -> usize {
    let by_gas = if config.gas_per_agent == 0 {
        usize::MAX
    } else {
        (config.max_gas_per_tx.saturating_sub(config.base_gas) / config.gas_per_agent) as usize
    };
    config.max_batch_size.min(by_gas).max(1)
}

/// Group candidates into writes, preserving selection order.
pub fn build_batches(candidates: Vec<Candidate>, config: &OracleConfig) -> Vec<Vec<Candidate>> {
    let size = max_agents_per_tx(config);
    let mut batches = Vec::new();
    let mut iter = candidates.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}

/// `gas_price * max_fee_multiplier * (1 + bump)^attempt`, saturating.
pub fn max_fee_per_gas(gas_price: u128, attempt: u32, config: &OracleConfig) -> u128 {
    let mut fee = gas_price.saturating_mul(u128::from(config.max_fee_multiplier.max(1)));
    for _ in 0..attempt {
        fee = fee.saturating_mul(100 + u128::from(config.gas_price_bump_pct)) / 100;
    }
    fee
}
