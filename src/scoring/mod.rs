//! Scoring Engine: deterministic, time-decayed aggregation of feedback.
//!
//! ```text
//! age_days     = max(0, as_of - timestamp) / 86400
//! weight       = 0.5 ^ (age_days / half_life_days)
//! contribution = raw_value / 10^value_decimals
//! overall      = clamp(Σ(contribution·weight) / Σweight, 0, 100)
//! ```
//!
//! `overall` is undefined when there is no non-revoked feedback. Category
//! scores apply the same formula per `category` (missing → "uncategorized").
//! Scores are a pure function of the persisted events, `as_of`, and the
//! caller-supplied `computed_at` stamp, so concurrent recomputation for
//! different agents needs no coordination and re-running for the same agent
//! just overwrites.

use crate::config::ScoringConfig;
use crate::metrics::{PipelineMetrics, Stage};
use crate::store::{CategoryScore, ComputedScore, FeedbackEvent, Store, StoreError};

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const UNCATEGORIZED: &str = "uncategorized";
const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("scoring task failed: {0}")]
    Task(String),
}

/// Decay weight for an event `age_days` old.
pub fn weight(age_days: f64, half_life_days: f64) -> f64 {
    0.5_f64.powf(age_days.max(0.0) / half_life_days)
}

/// `raw_value / 10^value_decimals`.
pub fn contribution(raw_value: i128, value_decimals: u8) -> f64 {
    raw_value as f64 / 10_f64.powi(i32::from(value_decimals))
}

fn age_days(event: &FeedbackEvent, as_of: DateTime<Utc>) -> f64 {
    let secs = (as_of - event.timestamp).num_seconds().max(0);
    secs as f64 / SECONDS_PER_DAY
}

#[derive(Default)]
struct Accumulator {
    weighted: f64,
    weights: f64,
    count: u64,
}

impl Accumulator {
    fn add(&mut self, contribution: f64, weight: f64) {
        self.weighted += contribution * weight;
        self.weights += weight;
        self.count += 1;
    }

    fn score(&self) -> Option<f64> {
        if self.weights > 0.0 {
            Some((self.weighted / self.weights).clamp(0.0, 100.0))
        } else {
            None
        }
    }
}

/// Score `events` as of `as_of`. Revoked events are ignored entirely.
pub fn compute_score(
    agent_id: B256,
    events: &[FeedbackEvent],
    as_of: DateTime<Utc>,
    half_life_days: f64,
    computed_at: DateTime<Utc>,
) -> ComputedScore {
    // Fixed summation order regardless of how the caller loaded the rows.
    let mut live: Vec<&FeedbackEvent> = events.iter().filter(|e| !e.revoked).collect();
    live.sort_by_key(|e| (e.block_number, e.key.log_index));

    let mut overall = Accumulator::default();
    let mut categories: BTreeMap<&str, Accumulator> = BTreeMap::new();
    let mut positive_count = 0u64;
    let mut negative_count = 0u64;

    for event in live {
        let c = contribution(event.raw_value, event.value_decimals);
        let w = weight(age_days(event, as_of), half_life_days);
        overall.add(c, w);
        categories
            .entry(event.category.as_deref().unwrap_or(UNCATEGORIZED))
            .or_default()
            .add(c, w);
        if c > 0.0 {
            positive_count += 1;
        } else if c < 0.0 {
            negative_count += 1;
        }
    }

    ComputedScore {
        agent_id,
        overall_score: overall.score(),
        feedback_count: overall.count,
        positive_count,
        negative_count,
        categories: categories
            .into_iter()
            .map(|(category, acc)| CategoryScore {
                category: category.to_string(),
                score: acc.score().unwrap_or(0.0),
                count: acc.count,
            })
            .collect(),
        computed_at,
        as_of,
    }
}

/// Outcome of one recompute-all pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecomputeSummary {
    pub agents: usize,
    pub scored: usize,
    pub unscored: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ScoringEngine {
    store: Store,
    config: ScoringConfig,
    metrics: Arc<PipelineMetrics>,
}

impl ScoringEngine {
    pub fn new(store: Store, config: ScoringConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// Recompute and persist the score for `agent_id`. Read and write happen
    /// in one store transaction. No clock is read here: the service loops
    /// pass `Utc::now()` for both timestamps.
    pub fn recompute(
        &self,
        agent_id: B256,
        as_of: DateTime<Utc>,
        computed_at: DateTime<Utc>,
    ) -> Result<ComputedScore, StoreError> {
        let half_life = self.config.half_life_days;
        let score = self.store.recompute_score(agent_id, |events| {
            compute_score(agent_id, events, as_of, half_life, computed_at)
        })?;
        PipelineMetrics::incr(&self.metrics.scores_computed, 1);
        debug!(
            agent = %agent_id,
            score = ?score.overall_score,
            feedback = score.feedback_count,
            "score recomputed"
        );
        Ok(score)
    }

    /// Recompute every agent that has feedback, `concurrency` at a time.
    pub async fn recompute_all(
        &self,
        as_of: DateTime<Utc>,
        computed_at: DateTime<Utc>,
    ) -> Result<RecomputeSummary, ScoringError> {
        let (_tx, rx) = watch::channel(false);
        self.recompute_until(as_of, computed_at, rx).await
    }

    /// Like `recompute_all`, but stops picking up new agents once `stop`
    /// flips. Recomputations already started run to completion.
    async fn recompute_until(
        &self,
        as_of: DateTime<Utc>,
        computed_at: DateTime<Utc>,
        stop: watch::Receiver<bool>,
    ) -> Result<RecomputeSummary, ScoringError> {
        let agents = self.store.blocking(|s| s.agents_with_feedback()).await?;
        let mut summary = RecomputeSummary::default();

        let results: Vec<(B256, Result<ComputedScore, ScoringError>)> = stream::iter(agents)
            .take_while(move |_| futures::future::ready(!*stop.borrow()))
            .map(|agent| {
                let engine = self.clone();
                async move {
                    let result = tokio::task::spawn_blocking(move || engine.recompute(agent, as_of, computed_at))
                        .await
                        .map_err(|e| ScoringError::Task(e.to_string()))
                        .and_then(|r| r.map_err(ScoringError::from));
                    (agent, result)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (agent, result) in results {
            summary.agents += 1;
            match result {
                Ok(score) if score.overall_score.is_some() => summary.scored += 1,
                Ok(_) => summary.unscored += 1,
                Err(e) => {
                    warn!(agent = %agent, error = %e, "score recompute failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Recompute all scores every `interval_secs` until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.interval_secs,
            half_life_days = self.config.half_life_days,
            concurrency = self.config.concurrency,
            "scoring engine started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let started = Instant::now();
            let now = Utc::now();
            let result = self.recompute_until(now, now, shutdown.clone()).await;
            self.metrics
                .record_pass(Stage::Scoring, started.elapsed(), result.is_ok());
            match result {
                Ok(summary) => info!(
                    agents = summary.agents,
                    scored = summary.scored,
                    unscored = summary.unscored,
                    failed = summary.failed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "scores recomputed"
                ),
                Err(e) => error!(error = %e, "scoring pass failed"),
            }

            if *shutdown.borrow() {
                break;
            }
        }
        info!("scoring engine stopped");
    }
}
