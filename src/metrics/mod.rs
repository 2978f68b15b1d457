//! Pipeline metrics tracking.
//!
//! Counts the work done by each stage of the pipeline and keeps a short
//! history of loop pass durations:
//! - Indexer: events applied, duplicates, decode failures, reorgs
//! - Scoring: scores computed
//! - Oracle: transactions submitted / confirmed / failed, agents parked
//!
//! Shared as `Arc<PipelineMetrics>` between the three loops; all updates
//! are lock-free except the pass history.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

use crate::store::BatchOutcome;

/// Maximum pass records kept.
const MAX_HISTORY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Indexer,
    Scoring,
    Oracle,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Indexer => "indexer",
            Stage::Scoring => "scoring",
            Stage::Oracle => "oracle",
        }
    }
}

/// A single completed loop pass.
#[derive(Debug, Clone)]
pub struct PassRecord {
    pub stage: Stage,
    pub duration: Duration,
    pub ok: bool,
    pub recorded_at: Instant,
}

/// Aggregate pass statistics over a time window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowMetrics {
    pub passes: usize,
    pub failures: usize,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub events_applied: AtomicU64,
    pub duplicates: AtomicU64,
    pub decode_failures: AtomicU64,
    pub revocations_buffered: AtomicU64,
    pub reorgs: AtomicU64,
    pub scores_computed: AtomicU64,
    pub txs_submitted: AtomicU64,
    pub txs_confirmed: AtomicU64,
    pub txs_failed: AtomicU64,
    pub agents_parked: AtomicU64,
    passes: Mutex<VecDeque<PassRecord>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, outcome: &BatchOutcome) {
        self.events_applied
            .fetch_add(outcome.applied as u64, Ordering::Relaxed);
        self.duplicates
            .fetch_add(outcome.duplicates as u64, Ordering::Relaxed);
        self.decode_failures
            .fetch_add(outcome.failures_recorded as u64, Ordering::Relaxed);
        self.revocations_buffered
            .fetch_add(outcome.revocations_buffered as u64, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Record one loop pass.
    pub fn record_pass(&self, stage: Stage, duration: Duration, ok: bool) {
        let Ok(mut passes) = self.passes.lock() else {
            return;
        };
        if passes.len() >= MAX_HISTORY {
            passes.pop_front();
        }
        passes.push_back(PassRecord {
            stage,
            duration,
            ok,
            recorded_at: Instant::now(),
        });
    }

    /// Pass statistics for `stage` over the last `window`.
    pub fn window_metrics(&self, stage: Stage, window: Duration) -> WindowMetrics {
        let Ok(passes) = self.passes.lock() else {
            return WindowMetrics::default();
        };
        let cutoff = Instant::now().checked_sub(window);
        let recent: Vec<&PassRecord> = passes
            .iter()
            .filter(|p| p.stage == stage)
            .filter(|p| cutoff.map_or(true, |c| p.recorded_at >= c))
            .collect();

        let count = recent.len();
        let avg_duration_ms = if count > 0 {
            recent
                .iter()
                .map(|p| p.duration.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / count as f64
        } else {
            0.0
        };

        WindowMetrics {
            passes: count,
            failures: recent.iter().filter(|p| !p.ok).count(),
            avg_duration_ms,
        }
    }

    /// Log a summary of metrics (called periodically).
    pub fn log_summary(&self) {
        info!(
            events_applied = Self::get(&self.events_applied),
            duplicates = Self::get(&self.duplicates),
            decode_failures = Self::get(&self.decode_failures),
            revocations_buffered = Self::get(&self.revocations_buffered),
            reorgs = Self::get(&self.reorgs),
            scores_computed = Self::get(&self.scores_computed),
            txs_submitted = Self::get(&self.txs_submitted),
            txs_confirmed = Self::get(&self.txs_confirmed),
            txs_failed = Self::get(&self.txs_failed),
            agents_parked = Self::get(&self.agents_parked),
            "pipeline totals"
        );

        for stage in [Stage::Indexer, Stage::Scoring, Stage::Oracle] {
            let m = self.window_metrics(stage, Duration::from_secs(3600));
            info!(
                stage = stage.as_str(),
                passes_1h = m.passes,
                failures_1h = m.failures,
                avg_pass = format!("{:.1}ms", m.avg_duration_ms),
                "pipeline passes (1h window)"
            );
        }
    }
}
