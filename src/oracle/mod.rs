//! Oracle Updater: pushes computed scores to the trust score oracle.
//!
//! One `sync_once` pass:
//! 1. Resolve every unresolved submission against chain state (receipt, then
//!    the oracle's current value). This is also the restart recovery path,
//!    so a write whose outcome is unknown is never resubmitted blind.
//! 2. Select candidates through the drift / staleness gate.
//! 3. Group them into writes bounded by batch size and gas, price each
//!    write, broadcast it, and persist it as pending.
//! 4. Poll until every pending write is resolved or the confirmation
//!    timeout passes. Unresolved writes stay pending for the next pass.
//!
//! `oracle_sync_state` only ever reflects confirmed writes; see
//! `Store::confirm_submission` / `Store::fail_submission`.

pub mod planner;

pub use planner::{
    build_batches, estimate_gas, max_fee_per_gas, scale_score, select_candidates, Candidate,
    Selection,
};

use crate::config::OracleConfig;
use crate::metrics::{PipelineMetrics, Stage};
use crate::onchain::{ChainError, OracleClient, SubmitRequest};
use crate::retry::{retry_transient, BackoffPolicy};
use crate::store::{OracleSubmission, Store, StoreError, SubmissionStatus};

use alloy::primitives::B256;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum OracleError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counts from resolving pending submissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub confirmed: usize,
    pub reverted: usize,
    pub timed_out: usize,
    pub still_pending: usize,
}

impl ResolveReport {
    fn absorb(&mut self, other: ResolveReport) {
        self.confirmed += other.confirmed;
        self.reverted += other.reverted;
        self.timed_out += other.timed_out;
        self.still_pending = other.still_pending;
    }
}

/// Result of one `sync_once` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleSyncReport {
    pub resolved: ResolveReport,
    pub candidates: usize,
    pub parked: usize,
    pub txs_submitted: usize,
    pub agents_submitted: usize,
}

enum Resolution {
    Confirmed,
    Reverted,
    TimedOut,
    Pending,
}

pub struct OracleUpdater<C: OracleClient> {
    client: Arc<C>,
    store: Store,
    config: OracleConfig,
    policy: BackoffPolicy,
    metrics: Arc<PipelineMetrics>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<C: OracleClient> OracleUpdater<C> {
    pub fn new(
        client: Arc<C>,
        store: Store,
        config: OracleConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let policy = BackoffPolicy::new(
            config.max_retries,
            config.backoff_base_ms,
            config.backoff_max_ms,
        );
        Self {
            client,
            store,
            config,
            policy,
            metrics,
            shutdown: None,
        }
    }

    fn stopping(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub async fn sync_once(&self) -> Result<OracleSyncReport, OracleError> {
        let mut report = OracleSyncReport::default();

        // Resolve first: nothing new is submitted while an earlier write
        // for the same agent might still land.
        report.resolved = self.resolve_pending().await?;

        let rows = self.store.blocking(|s| s.score_sync_rows()).await?;
        let selection = select_candidates(&rows, Utc::now(), &self.config);
        report.candidates = selection.candidates.len();
        report.parked = selection.parked.len();
        if !selection.parked.is_empty() {
            let agents: Vec<String> = selection.parked.iter().map(|a| format!("{a:#x}")).collect();
            error!(
                alert = true,
                parked = selection.parked.len(),
                agents = ?agents,
                max_tx_retries = self.config.max_tx_retries,
                "oracle pushes exhausted retries, agents parked until reset"
            );
        }
        self.metrics
            .agents_parked
            .store(selection.parked.len() as u64, std::sync::atomic::Ordering::Relaxed);

        if selection.candidates.is_empty() {
            debug!(in_flight = selection.in_flight, "no oracle candidates");
            return Ok(report);
        }

        let batches = build_batches(selection.candidates, &self.config);
        info!(
            candidates = report.candidates,
            batches = batches.len(),
            in_flight = selection.in_flight,
            "pushing scores to oracle"
        );

        let mut nonce = self.starting_nonce().await?;
        for batch in batches {
            if self.stopping() {
                break;
            }
            match self.submit_batch(&batch, nonce).await {
                Ok(()) => {
                    nonce += 1;
                    report.txs_submitted += 1;
                    report.agents_submitted += batch.len();
                }
                Err(OracleError::Chain(e)) if !e.is_transient() => {
                    let agents: Vec<B256> = batch.iter().map(|c| c.agent_id).collect();
                    warn!(agents = agents.len(), nonce, error = %e, "oracle write rejected");
                    self.store.blocking(move |s| s.note_failed_push(&agents)).await?;
                    PipelineMetrics::incr(&self.metrics.txs_failed, 1);
                }
                Err(e) => return Err(e),
            }
        }

        if report.txs_submitted > 0 {
            let resolved = self.await_confirmations().await?;
            report.resolved.absorb(resolved);
        }
        Ok(report)
    }

    /// Nonce for the first write of this pass. With nothing unresolved, the
    /// mined nonce is used so a stuck, timed-out write gets replaced rather
    /// than queued behind.
    async fn starting_nonce(&self) -> Result<u64, OracleError> {
        let client = Arc::clone(&self.client);
        let unresolved = self.store.blocking(|s| s.pending_submissions()).await?;
        let nonce = if unresolved.is_empty() {
            retry_transient(&self.policy, "mined_nonce", || client.mined_nonce()).await?
        } else {
            retry_transient(&self.policy, "next_nonce", || client.next_nonce()).await?
        };
        Ok(nonce)
    }

    async fn submit_batch(&self, batch: &[Candidate], nonce: u64) -> Result<(), OracleError> {
        let client = Arc::clone(&self.client);
        let gas_price = retry_transient(&self.policy, "gas_price", || client.gas_price()).await?;
        let attempt = batch.iter().map(|c| c.attempt).max().unwrap_or(0);
        let max_fee = max_fee_per_gas(gas_price, attempt, &self.config);

        let request = SubmitRequest {
            agents: batch.iter().map(|c| c.agent_id).collect(),
            scores: batch.iter().map(|c| c.score).collect(),
            nonce,
            gas_limit: estimate_gas(batch.len(), &self.config),
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: self.config.priority_fee_wei.min(max_fee),
        };

        // Not retried: a timed-out broadcast may still have reached the mempool.
        let tx_hash = client.submit(&request).await?;

        let submission = OracleSubmission {
            tx_hash,
            agents: request.agents.clone(),
            scores: request.scores.clone(),
            nonce,
            max_fee_per_gas: max_fee,
            attempt,
            status: SubmissionStatus::Pending,
            submitted_at: Utc::now(),
            resolved_at: None,
        };
        self.store
            .blocking(move |s| s.record_submission(&submission))
            .await?;
        PipelineMetrics::incr(&self.metrics.txs_submitted, 1);
        info!(
            tx = %tx_hash,
            agents = request.agents.len(),
            nonce,
            attempt,
            gas_limit = request.gas_limit,
            max_fee_per_gas = max_fee,
            "oracle write submitted"
        );
        Ok(())
    }

    async fn await_confirmations(&self) -> Result<ResolveReport, OracleError> {
        let deadline = tokio::time::Instant::now() + self.config.confirmation_timeout();
        let mut total = ResolveReport::default();
        loop {
            tokio::time::sleep(self.config.receipt_poll_interval()).await;
            let report = self.resolve_pending().await?;
            total.absorb(report);
            if report.still_pending == 0 || self.stopping() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                info!(
                    pending = report.still_pending,
                    "writes still unconfirmed, resuming next pass"
                );
                break;
            }
        }
        Ok(total)
    }

    /// Check every pending submission against the chain and record the
    /// outcome. Safe to call at any time, including right after a restart.
    pub async fn resolve_pending(&self) -> Result<ResolveReport, OracleError> {
        let pending = self.store.blocking(|s| s.pending_submissions()).await?;
        let mut report = ResolveReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        let client = Arc::clone(&self.client);
        let head = retry_transient(&self.policy, "chain_head", || client.chain_head()).await?;

        for submission in pending {
            let now = Utc::now();
            let tx_hash = submission.tx_hash;
            match self.resolve_one(&submission, head).await? {
                Resolution::Confirmed => {
                    self.store
                        .blocking(move |s| s.confirm_submission(tx_hash, now))
                        .await?;
                    PipelineMetrics::incr(&self.metrics.txs_confirmed, 1);
                    info!(tx = %submission.tx_hash, agents = submission.agents.len(), "oracle write confirmed");
                    report.confirmed += 1;
                }
                Resolution::Reverted => {
                    self.store
                        .blocking(move |s| s.fail_submission(tx_hash, SubmissionStatus::Reverted, now))
                        .await?;
                    PipelineMetrics::incr(&self.metrics.txs_failed, 1);
                    warn!(tx = %submission.tx_hash, attempt = submission.attempt, "oracle write reverted");
                    report.reverted += 1;
                }
                Resolution::TimedOut => {
                    self.store
                        .blocking(move |s| s.fail_submission(tx_hash, SubmissionStatus::TimedOut, now))
                        .await?;
                    PipelineMetrics::incr(&self.metrics.txs_failed, 1);
                    warn!(
                        tx = %submission.tx_hash,
                        nonce = submission.nonce,
                        "oracle write timed out, will replace"
                    );
                    report.timed_out += 1;
                }
                Resolution::Pending => report.still_pending += 1,
            }
        }
        Ok(report)
    }

    async fn resolve_one(&self, submission: &OracleSubmission, head: u64) -> Result<Resolution, OracleError> {
        let client = Arc::clone(&self.client);
        let tx_hash = submission.tx_hash;
        let receipt = retry_transient(&self.policy, "receipt", || client.receipt(tx_hash)).await?;

        if let Some(receipt) = receipt {
            if !receipt.success {
                return Ok(Resolution::Reverted);
            }
            let depth = head.saturating_sub(receipt.block_number) + 1;
            if depth >= self.config.confirmation_depth {
                return Ok(Resolution::Confirmed);
            }
            debug!(tx = %tx_hash, depth, needed = self.config.confirmation_depth, "awaiting confirmations");
            return Ok(Resolution::Pending);
        }

        // No receipt: the oracle may already hold the intended values
        // (mined by a replacement, or the node lost the receipt). Only a
        // write made at or after this broadcast counts.
        if self.onchain_matches(submission).await? {
            debug!(tx = %tx_hash, "on-chain values already match, treating as confirmed");
            return Ok(Resolution::Confirmed);
        }

        let age = Utc::now() - submission.submitted_at;
        if age.num_seconds() >= self.config.confirmation_timeout_secs as i64 {
            return Ok(Resolution::TimedOut);
        }
        Ok(Resolution::Pending)
    }

    /// Every agent in `submission` holds its intended score, written no
    /// earlier than the broadcast. An older identical value proves nothing.
    async fn onchain_matches(&self, submission: &OracleSubmission) -> Result<bool, OracleError> {
        let client = Arc::clone(&self.client);
        let broadcast_at = submission.submitted_at.timestamp().max(0) as u64;
        for (agent, score) in submission.agents.iter().zip(&submission.scores) {
            let agent = *agent;
            let view = retry_transient(&self.policy, "score_view", || client.score_view(agent)).await?;
            if !view.exists || view.score != *score || view.last_updated < broadcast_at {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Push scores every `interval_secs` until shutdown. A write that is
    /// broadcast is always recorded before the loop can exit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.shutdown = Some(shutdown.clone());
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.interval_secs,
            drift_threshold = self.config.drift_threshold,
            max_staleness_secs = self.config.max_staleness_secs,
            max_batch_size = self.config.max_batch_size,
            "oracle updater started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let started = Instant::now();
            let result = self.sync_once().await;
            self.metrics
                .record_pass(Stage::Oracle, started.elapsed(), result.is_ok());
            match result {
                Ok(report) => info!(
                    confirmed = report.resolved.confirmed,
                    reverted = report.resolved.reverted,
                    timed_out = report.resolved.timed_out,
                    pending = report.resolved.still_pending,
                    txs = report.txs_submitted,
                    agents = report.agents_submitted,
                    parked = report.parked,
                    "oracle sync pass complete"
                ),
                Err(OracleError::Chain(e)) if e.is_transient() => {
                    error!(alert = true, error = %e, "oracle sync retries exhausted")
                }
                Err(e) => error!(error = %e, "oracle sync pass failed"),
            }

            if *shutdown.borrow() {
                break;
            }
        }
        info!("oracle updater stopped");
    }
}
