//! Read-only projections for the API layer, plus a synchronous `refresh`.

use crate::scoring::{ScoringEngine, ScoringError};
use crate::store::{Agent, ComputedScore, FeedbackEvent, OracleSyncState, Store, StoreError};

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Hard cap on any page size requested by a caller.
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Page {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

/// Everything known about one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustProfile {
    pub agent: Option<Agent>,
    pub score: Option<ComputedScore>,
    pub oracle: Option<OracleSyncState>,
}

/// Compact score summary suitable for JSON responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub agent_id: String,
    pub overall_score: Option<f64>,
    pub feedback_count: u64,
    pub positive_count: u64,
    pub negative_count: u64,
    pub as_of: DateTime<Utc>,
}

impl From<&ComputedScore> for ScoreSummary {
    fn from(score: &ComputedScore) -> Self {
        Self {
            agent_id: format!("{:#x}", score.agent_id),
            overall_score: score.overall_score,
            feedback_count: score.feedback_count,
            positive_count: score.positive_count,
            negative_count: score.negative_count,
            as_of: score.as_of,
        }
    }
}

#[derive(Clone)]
pub struct TrustQuery {
    store: Store,
    engine: ScoringEngine,
}

impl TrustQuery {
    pub fn new(store: Store, engine: ScoringEngine) -> Self {
        Self { store, engine }
    }

    pub fn agent(&self, id: B256) -> Result<Option<Agent>, QueryError> {
        Ok(self.store.agent(id)?)
    }

    pub fn agents(&self, page: Page) -> Result<Vec<Agent>, QueryError> {
        Ok(self.store.list_agents(page.offset, page.limit)?)
    }

    /// Non-revoked feedback about `agent`, oldest first.
    pub fn feedback(&self, agent: B256, page: Page) -> Result<Vec<FeedbackEvent>, QueryError> {
        Ok(self.store.feedback_page(agent, page.offset, page.limit)?)
    }

    pub fn score(&self, agent: B256) -> Result<Option<ComputedScore>, QueryError> {
        Ok(self.store.score(agent)?)
    }

    pub fn profile(&self, agent: B256) -> Result<TrustProfile, QueryError> {
        Ok(TrustProfile {
            agent: self.store.agent(agent)?,
            score: self.store.score(agent)?,
            oracle: self.store.sync_state(agent)?,
        })
    }

    /// Recompute `agent`'s score now and return it.
    pub async fn refresh(&self, agent: B256) -> Result<ComputedScore, QueryError> {
        let now = Utc::now();
        self.refresh_at(agent, now, now).await
    }

    pub async fn refresh_at(
        &self,
        agent: B256,
        as_of: DateTime<Utc>,
        computed_at: DateTime<Utc>,
    ) -> Result<ComputedScore, QueryError> {
        let engine = self.engine.clone();
        let score = tokio::task::spawn_blocking(move || engine.recompute(agent, as_of, computed_at))
            .await
            .map_err(|e| ScoringError::Task(e.to_string()))?
            .map_err(ScoringError::from)?;
        info!(agent = %agent, score = ?score.overall_score, "score refreshed on demand");
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::metrics::PipelineMetrics;
    use crate::onchain::{ChainLog, EventKey, FeedbackId, RegistryEvent, Source};
    use crate::store::IndexBatch;
    use alloy::primitives::{address, Address};
    use std::sync::Arc;

    const OWNER: Address = address!("00000000000000000000000000000000000000a1");
    const CLIENT: Address = address!("00000000000000000000000000000000000000c1");

    fn log(block: u64, log_index: u64, event: RegistryEvent) -> ChainLog {
        ChainLog {
            source: Source::ReputationRegistry,
            key: EventKey {
                tx_hash: B256::repeat_byte(block as u8),
                log_index,
            },
            block_number: block,
            block_hash: None,
            event,
        }
    }

    fn feedback(index: u64, value: i128) -> RegistryEvent {
        RegistryEvent::NewFeedback {
            feedback_id: FeedbackId {
                agent_id: B256::repeat_byte(7),
                client: CLIENT,
                index,
            },
            category: None,
            raw_value: value,
            value_decimals: 0,
            comment: Some(format!("ipfs://fb-{index}")),
        }
    }

    fn seeded_at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    fn seeded() -> (Store, TrustQuery) {
        let store = Store::open_in_memory().unwrap();
        let mut logs = vec![log(
            1,
            0,
            RegistryEvent::AgentRegistered {
                agent_id: B256::repeat_byte(7),
                owner: OWNER,
                metadata_uri: Some("ipfs://agent".into()),
            },
        )];
        for i in 0..5 {
            logs.push(log(2, i, feedback(i, 10 * (i as i128 + 1))));
        }
        logs.push(log(
            3,
            0,
            RegistryEvent::FeedbackRevoked {
                feedback_id: FeedbackId {
                    agent_id: B256::repeat_byte(7),
                    client: CLIENT,
                    index: 4,
                },
            },
        ));
        let now = seeded_at().timestamp();
        store
            .apply_batch(&IndexBatch {
                sources: Source::ALL.to_vec(),
                range_end: 3,
                range_end_hash: None,
                logs,
                block_timestamps: [(1, now), (2, now), (3, now)].into_iter().collect(),
                failures: vec![],
            })
            .unwrap();
        let engine = ScoringEngine::new(
            store.clone(),
            ScoringConfig::default(),
            Arc::new(PipelineMetrics::new()),
        );
        let query = TrustQuery::new(store.clone(), engine);
        (store, query)
    }

    #[test]
    fn test_page_limits_are_clamped() {
        assert_eq!(Page::new(0, 0).limit, 1);
        assert_eq!(Page::new(0, 10_000).limit, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_feedback_pages_skip_revoked() {
        let (_store, query) = seeded();
        let agent = B256::repeat_byte(7);
        let first = query.feedback(agent, Page::new(0, 3)).unwrap();
        let second = query.feedback(agent, Page::new(3, 3)).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 1);
        assert!(first.iter().chain(&second).all(|f| !f.revoked));
        assert_eq!(first[0].comment.as_deref(), Some("ipfs://fb-0"));
    }

    #[tokio::test]
    async fn test_refresh_computes_and_persists() {
        let (store, query) = seeded();
        let agent = B256::repeat_byte(7);
        assert!(query.score(agent).unwrap().is_none());

        let score = query.refresh_at(agent, seeded_at(), seeded_at()).await.unwrap();
        // 10, 20, 30, 40 all fresh; the 50 was revoked.
        assert_eq!(score.overall_score, Some(25.0));
        assert_eq!(score.feedback_count, 4);
        assert_eq!(store.score(agent).unwrap().unwrap().overall_score, Some(25.0));

        let profile = query.profile(agent).unwrap();
        assert_eq!(profile.agent.unwrap().owner, OWNER);
        assert!(profile.oracle.is_none());
        let summary = ScoreSummary::from(profile.score.as_ref().unwrap());
        assert_eq!(summary.feedback_count, 4);
    }

    #[tokio::test]
    async fn test_refresh_unknown_agent_is_undefined() {
        let (_store, query) = seeded();
        let score = query.refresh(B256::repeat_byte(0x55)).await.unwrap();
        assert_eq!(score.overall_score, None);
        assert_eq!(query.agents(Page::default()).unwrap().len(), 1);
    }
}
