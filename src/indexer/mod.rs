//! Chain Event Indexer.
//!
//! Polls both ERC-8004 registries over a shared block range, decodes the
//! logs, and commits the decoded events together with the checkpoint
//! advance in a single store transaction.
//!
//! Safety rules:
//! - Blocks within `confirmation_depth` of the head are never read.
//! - Before each pass the hash of the last committed block is compared with
//!   the chain. On mismatch the checkpoint is rewound by `reorg_rewind`
//!   blocks and the range is re-scanned; idempotent upserts make the replay
//!   harmless.
//! - Transient RPC failures retry with backoff. When the budget is spent
//!   the pass fails and the checkpoint stays where it was.

use crate::config::IndexerConfig;
use crate::metrics::{PipelineMetrics, Stage};
use crate::onchain::{decode_log, BlockRef, ChainError, ChainLog, EventSource, Source};
use crate::retry::{retry_transient, BackoffPolicy};
use crate::store::{BatchOutcome, IndexBatch, Store, StoreError};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("block {block} changed while the range was being read")]
    InconsistentView { block: u64 },
}

/// Where the indexer is within one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerPhase {
    Idle,
    Fetching,
    Decoding,
    Committing,
}

impl std::fmt::Display for IndexerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexerPhase::Idle => write!(f, "IDLE"),
            IndexerPhase::Fetching => write!(f, "FETCHING"),
            IndexerPhase::Decoding => write!(f, "DECODING"),
            IndexerPhase::Committing => write!(f, "COMMITTING"),
        }
    }
}

/// Result of one `sync_once` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Inclusive block range committed, `None` when there was nothing safe to read.
    pub range: Option<(u64, u64)>,
    pub outcome: BatchOutcome,
    /// Checkpoint rewound because a committed block's hash changed.
    pub reorg_detected: bool,
    /// The committed range reached the safe head.
    pub caught_up: bool,
}

impl SyncReport {
    pub fn applied(&self) -> usize {
        self.outcome.applied
    }
}

pub struct Indexer<S: EventSource> {
    source: Arc<S>,
    store: Store,
    config: IndexerConfig,
    policy: BackoffPolicy,
    metrics: Arc<PipelineMetrics>,
    phase: IndexerPhase,
}

impl<S: EventSource> Indexer<S> {
    pub fn new(
        source: Arc<S>,
        store: Store,
        config: IndexerConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let policy = BackoffPolicy::new(
            config.max_retries,
            config.backoff_base_ms,
            config.backoff_max_ms,
        );
        Self {
            source,
            store,
            config,
            policy,
            metrics,
            phase: IndexerPhase::Idle,
        }
    }

    pub fn phase(&self) -> IndexerPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: IndexerPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "indexer phase");
            self.phase = phase;
        }
    }

    /// Run one pass. Whatever happens, the indexer is back in `Idle` afterwards.
    pub async fn sync_once(&mut self) -> Result<SyncReport, IndexerError> {
        let result = self.run_pass().await;
        self.set_phase(IndexerPhase::Idle);
        result
    }

    async fn run_pass(&mut self) -> Result<SyncReport, IndexerError> {
        self.set_phase(IndexerPhase::Fetching);
        let mut report = SyncReport::default();

        report.reorg_detected = self.check_reorg().await?;

        let source = Arc::clone(&self.source);
        let head = retry_transient(&self.policy, "chain_head", || source.chain_head()).await?;
        let safe_head = head.saturating_sub(self.config.confirmation_depth);

        let from = self.next_block().await?;
        if from > safe_head {
            debug!(from, head, safe_head, "no confirmed blocks to index");
            report.caught_up = true;
            return Ok(report);
        }
        let to = safe_head.min(from.saturating_add(self.config.max_range.saturating_sub(1)));

        let mut raw = Vec::new();
        for src in Source::ALL {
            let logs = retry_transient(&self.policy, "get_logs", || {
                source.get_logs(src, from, to)
            })
            .await?;
            raw.push((src, logs));
        }

        self.set_phase(IndexerPhase::Decoding);
        let mut logs: Vec<ChainLog> = Vec::new();
        let mut failures = Vec::new();
        for (src, batch) in &raw {
            for log in batch {
                match decode_log(*src, log) {
                    Ok(decoded) => logs.push(decoded),
                    Err(failure) => {
                        warn!(
                            source = %src,
                            block = ?failure.block_number,
                            log_index = ?failure.log_index,
                            reason = %failure.reason,
                            "skipping undecodable log"
                        );
                        failures.push(failure);
                    }
                }
            }
        }
        logs.sort_by_key(|l| (l.block_number, l.key.log_index));

        // One header fetch per distinct block, plus the range end for reorg checks.
        let mut blocks: BTreeSet<u64> = logs.iter().map(|l| l.block_number).collect();
        blocks.insert(to);
        let mut refs: HashMap<u64, BlockRef> = HashMap::with_capacity(blocks.len());
        for number in blocks {
            let block = retry_transient(&self.policy, "block_ref", || source.block_ref(number)).await?;
            refs.insert(number, block);
        }
        for log in &logs {
            if let (Some(seen), Some(block)) = (log.block_hash, refs.get(&log.block_number)) {
                if seen != block.hash {
                    return Err(IndexerError::InconsistentView {
                        block: log.block_number,
                    });
                }
            }
        }

        let batch = IndexBatch {
            sources: Source::ALL.to_vec(),
            range_end: to,
            range_end_hash: refs.get(&to).map(|b| b.hash),
            block_timestamps: refs
                .values()
                .map(|b| (b.number, b.timestamp as i64))
                .collect(),
            logs,
            failures,
        };

        self.set_phase(IndexerPhase::Committing);
        let outcome = self.store.blocking(move |s| s.apply_batch(&batch)).await?;
        self.metrics.record_batch(&outcome);

        info!(
            from,
            to,
            applied = outcome.applied,
            duplicates = outcome.duplicates,
            buffered = outcome.revocations_buffered,
            resolved = outcome.revocations_resolved,
            failures = outcome.failures_recorded,
            "indexed block range"
        );

        report.range = Some((from, to));
        report.outcome = outcome;
        report.caught_up = to >= safe_head;
        Ok(report)
    }

    /// First block not yet covered by every source's checkpoint.
    async fn next_block(&self) -> Result<u64, StoreError> {
        let start_block = self.config.start_block;
        self.store
            .blocking(move |store| {
                let mut next = u64::MAX;
                for src in Source::ALL {
                    let candidate = match store.checkpoint(src)? {
                        Some(cp) => cp + 1,
                        None => start_block,
                    };
                    next = next.min(candidate);
                }
                Ok(next)
            })
            .await
    }

    /// Compare the last committed block hash per source with the chain and
    /// rewind on mismatch. Returns whether a rewind happened.
    async fn check_reorg(&mut self) -> Result<bool, IndexerError> {
        let mut rewound = false;
        for src in Source::ALL {
            let latest = self.store.blocking(move |s| s.latest_block_ref(src)).await?;
            let Some((number, stored)) = latest else {
                continue;
            };
            let source = Arc::clone(&self.source);
            let current = retry_transient(&self.policy, "block_ref", || source.block_ref(number)).await?;
            if current.hash == stored {
                continue;
            }

            let floor = self.config.start_block.saturating_sub(1);
            let target = number.saturating_sub(self.config.reorg_rewind).max(floor);
            error!(
                alert = true,
                source = %src,
                block = number,
                stored = %stored,
                chain = %current.hash,
                rewind_to = target,
                "deep reorg detected, rewinding checkpoint"
            );
            self.store
                .blocking(move |s| s.rewind_checkpoints(&Source::ALL, target))
                .await?;
            PipelineMetrics::incr(&self.metrics.reorgs, 1);
            rewound = true;
            break;
        }
        Ok(rewound)
    }

    /// Poll until shutdown. A pass in progress always finishes first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            poll_secs = self.config.poll_interval_secs,
            confirmation_depth = self.config.confirmation_depth,
            max_range = self.config.max_range,
            "indexer started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            // Drain the backlog range by range while catching up.
            loop {
                let started = Instant::now();
                let result = self.sync_once().await;
                self.metrics
                    .record_pass(Stage::Indexer, started.elapsed(), result.is_ok());
                match result {
                    Ok(report) if report.caught_up => break,
                    Ok(_) => {}
                    Err(IndexerError::Chain(e)) if e.is_transient() => {
                        error!(alert = true, error = %e, "indexer retries exhausted, checkpoint unchanged");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "indexer pass failed, checkpoint unchanged");
                        break;
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }
        info!("indexer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::types::fixtures::*;
    use alloy::primitives::{address, Address, B256, LogData};
    use alloy::rpc::types::Log;
    use alloy::sol_types::SolEvent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    const OWNER: Address = address!("00000000000000000000000000000000000000a1");
    const CLIENT: Address = address!("00000000000000000000000000000000000000c1");

    #[derive(Default)]
    struct FakeChain {
        head: Mutex<u64>,
        logs: Mutex<Vec<(Source, Log)>>,
        hash_overrides: Mutex<HashMap<u64, B256>>,
        /// Number of upcoming `get_logs` calls that fail transiently.
        failing_calls: AtomicU32,
        get_logs_calls: AtomicU32,
    }

    impl FakeChain {
        fn with_head(head: u64) -> Arc<Self> {
            let chain = Self::default();
            *chain.head.lock().unwrap() = head;
            Arc::new(chain)
        }

        fn push(&self, source: Source, data: LogData, block: u64, tx: u8, log_index: u64) {
            self.logs
                .lock()
                .unwrap()
                .push((source, raw_log(data, block, tx, log_index)));
        }

        fn set_head(&self, head: u64) {
            *self.head.lock().unwrap() = head;
        }

        fn hash_of(&self, block: u64) -> B256 {
            self.hash_overrides
                .lock()
                .unwrap()
                .get(&block)
                .copied()
                .unwrap_or_else(|| block_hash(block))
        }
    }

    #[async_trait]
    impl EventSource for FakeChain {
        async fn chain_head(&self) -> Result<u64, ChainError> {
            Ok(*self.head.lock().unwrap())
        }

        async fn get_logs(&self, source: Source, from: u64, to: u64) -> Result<Vec<Log>, ChainError> {
            self.get_logs_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failing_calls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ChainError::Transient("429 Too Many Requests".into()));
            }
            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|(s, l)| {
                    *s == source && l.block_number.is_some_and(|b| b >= from && b <= to)
                })
                .map(|(_, l)| l.clone())
                .collect())
        }

        async fn block_ref(&self, number: u64) -> Result<BlockRef, ChainError> {
            Ok(BlockRef {
                number,
                hash: self.hash_of(number),
                timestamp: 1_700_000_000 + number * 12,
            })
        }
    }

    fn config() -> IndexerConfig {
        IndexerConfig {
            start_block: 0,
            max_range: 1_000,
            confirmation_depth: 12,
            reorg_rewind: 64,
            poll_interval_secs: 1,
            max_retries: 2,
            backoff_base_ms: 10,
            backoff_max_ms: 100,
        }
    }

    fn indexer(chain: &Arc<FakeChain>, store: &Store, config: IndexerConfig) -> Indexer<FakeChain> {
        Indexer::new(
            Arc::clone(chain),
            store.clone(),
            config,
            Arc::new(PipelineMetrics::new()),
        )
    }

    fn agent_b256(n: u64) -> B256 {
        crate::onchain::types::agent_id_from_u256(agent(n))
    }

    #[tokio::test]
    async fn test_sync_commits_events_and_checkpoint() {
        let chain = FakeChain::with_head(120);
        chain.push(Source::IdentityRegistry, registered(1, OWNER, "ipfs://agent-1"), 10, 1, 0);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 0, 80, 0, "quality"), 20, 2, 3);

        let store = Store::open_in_memory().unwrap();
        let mut idx = indexer(&chain, &store, config());
        let report = idx.sync_once().await.unwrap();

        assert_eq!(report.range, Some((0, 108)));
        assert_eq!(report.applied(), 2);
        assert!(report.caught_up);
        assert_eq!(idx.phase(), IndexerPhase::Idle);
        assert_eq!(store.checkpoint(Source::IdentityRegistry).unwrap(), Some(108));
        assert_eq!(store.checkpoint(Source::ReputationRegistry).unwrap(), Some(108));

        let agent = store.agent(agent_b256(1)).unwrap().unwrap();
        assert_eq!(agent.owner, OWNER);
        assert_eq!(agent.metadata_uri.as_deref(), Some("ipfs://agent-1"));
        assert_eq!(agent.created_at.timestamp(), 1_700_000_000 + 10 * 12);

        let feedback = store.feedback_page(agent_b256(1), 0, 10).unwrap();
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].category.as_deref(), Some("quality"));
        assert_eq!(feedback[0].timestamp.timestamp(), 1_700_000_000 + 20 * 12);
    }

    #[tokio::test]
    async fn test_blocks_within_confirmation_depth_wait() {
        let chain = FakeChain::with_head(120);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 0, 80, 0, ""), 115, 1, 0);

        let store = Store::open_in_memory().unwrap();
        let mut idx = indexer(&chain, &store, config());
        idx.sync_once().await.unwrap();
        assert_eq!(store.feedback_count().unwrap(), 0);

        chain.set_head(127);
        let report = idx.sync_once().await.unwrap();
        assert_eq!(report.range, Some((109, 115)));
        assert_eq!(store.feedback_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_do_when_head_is_shallow() {
        let chain = FakeChain::with_head(5);
        let store = Store::open_in_memory().unwrap();
        let mut idx = indexer(&chain, &store, config());
        let report = idx.sync_once().await.unwrap();
        assert_eq!(report.range, None);
        assert!(report.caught_up);
        assert_eq!(store.checkpoint(Source::IdentityRegistry).unwrap(), None);
    }

    #[tokio::test]
    async fn test_range_is_capped_by_max_range() {
        let chain = FakeChain::with_head(500);
        let store = Store::open_in_memory().unwrap();
        let mut cfg = config();
        cfg.max_range = 50;
        cfg.start_block = 100;
        let mut idx = indexer(&chain, &store, cfg);

        let first = idx.sync_once().await.unwrap();
        assert_eq!(first.range, Some((100, 149)));
        assert!(!first.caught_up);
        let second = idx.sync_once().await.unwrap();
        assert_eq!(second.range, Some((150, 199)));
    }

    #[tokio::test]
    async fn test_rescan_is_idempotent() {
        let chain = FakeChain::with_head(120);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 0, 80, 0, ""), 20, 1, 0);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 1, -20, 0, ""), 21, 2, 0);

        let store = Store::open_in_memory().unwrap();
        let mut idx = indexer(&chain, &store, config());
        idx.sync_once().await.unwrap();
        store.rewind_checkpoints(&Source::ALL, 0).unwrap();

        let report = idx.sync_once().await.unwrap();
        assert_eq!(report.applied(), 0);
        assert_eq!(report.outcome.duplicates, 2);
        assert_eq!(store.feedback_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_revocation_in_same_block_applies_in_log_order() {
        let chain = FakeChain::with_head(120);
        // Revocation returned first by the node but positioned after the feedback.
        chain.push(Source::ReputationRegistry, revoked(1, CLIENT, 0), 30, 9, 7);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 0, 80, 0, ""), 30, 9, 2);

        let store = Store::open_in_memory().unwrap();
        let mut idx = indexer(&chain, &store, config());
        let report = idx.sync_once().await.unwrap();
        assert_eq!(report.outcome.revocations_buffered, 0);
        assert!(store.all_feedback(agent_b256(1)).unwrap()[0].revoked);
    }

    #[tokio::test]
    async fn test_revocation_seen_before_feedback_is_buffered() {
        let chain = FakeChain::with_head(200);
        chain.push(Source::ReputationRegistry, revoked(1, CLIENT, 4), 20, 1, 0);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 4, 80, 0, ""), 70, 2, 0);

        let store = Store::open_in_memory().unwrap();
        let mut cfg = config();
        cfg.max_range = 50;
        let mut idx = indexer(&chain, &store, cfg);

        let first = idx.sync_once().await.unwrap();
        assert_eq!(first.outcome.revocations_buffered, 1);
        assert_eq!(store.pending_revocation_count().unwrap(), 1);

        let second = idx.sync_once().await.unwrap();
        assert_eq!(second.outcome.revocations_resolved, 1);
        assert_eq!(store.pending_revocation_count().unwrap(), 0);
        assert!(store.feedback_page(agent_b256(1), 0, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_log_does_not_abort_batch() {
        let chain = FakeChain::with_head(120);
        chain.push(
            Source::ReputationRegistry,
            garbage(crate::onchain::abi::IReputationRegistry::NewFeedback::SIGNATURE_HASH),
            15,
            1,
            0,
        );
        chain.push(Source::ReputationRegistry, garbage(B256::repeat_byte(0x42)), 15, 1, 1);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 0, 80, 0, ""), 16, 2, 0);

        let store = Store::open_in_memory().unwrap();
        let mut idx = indexer(&chain, &store, config());
        let report = idx.sync_once().await.unwrap();

        assert_eq!(report.applied(), 1);
        assert_eq!(report.outcome.failures_recorded, 1);
        assert_eq!(report.outcome.unknown_skipped, 1);
        assert_eq!(store.decode_failure_count().unwrap(), 1);
        assert_eq!(store.checkpoint(Source::ReputationRegistry).unwrap(), Some(108));
    }

    #[tokio::test]
    async fn test_metadata_update_changes_uri() {
        let chain = FakeChain::with_head(120);
        chain.push(Source::IdentityRegistry, registered(3, OWNER, "ipfs://v1"), 10, 1, 0);
        chain.push(Source::IdentityRegistry, uri_updated(3, "ipfs://v2"), 11, 2, 0);
        chain.push(Source::IdentityRegistry, uri_updated(99, "ipfs://ghost"), 12, 3, 0);

        let store = Store::open_in_memory().unwrap();
        let mut idx = indexer(&chain, &store, config());
        let report = idx.sync_once().await.unwrap();

        assert_eq!(report.applied(), 2);
        assert_eq!(report.outcome.failures_recorded, 1);
        let agent = store.agent(agent_b256(3)).unwrap().unwrap();
        assert_eq!(agent.metadata_uri.as_deref(), Some("ipfs://v2"));
        assert!(store.agent(agent_b256(99)).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let chain = FakeChain::with_head(120);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 0, 80, 0, ""), 20, 1, 0);
        chain.failing_calls.store(2, Ordering::SeqCst);

        let store = Store::open_in_memory().unwrap();
        let mut idx = indexer(&chain, &store, config());
        let report = idx.sync_once().await.unwrap();
        assert_eq!(report.applied(), 1);
        assert_eq!(chain.get_logs_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_leave_checkpoint_unchanged() {
        let chain = FakeChain::with_head(120);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 0, 80, 0, ""), 20, 1, 0);
        chain.failing_calls.store(100, Ordering::SeqCst);

        let store = Store::open_in_memory().unwrap();
        let mut idx = indexer(&chain, &store, config());
        let err = idx.sync_once().await.unwrap_err();

        assert!(matches!(err, IndexerError::Chain(ref e) if e.is_transient()));
        assert_eq!(idx.phase(), IndexerPhase::Idle);
        assert_eq!(store.checkpoint(Source::ReputationRegistry).unwrap(), None);
        assert_eq!(store.feedback_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_checkpoint_unchanged() {
        let chain = FakeChain::with_head(120);
        chain.push(Source::IdentityRegistry, registered(1, OWNER, ""), 10, 1, 0);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 0, 80, 0, ""), 20, 2, 0);

        let store = Store::open_in_memory().unwrap();
        store
            .execute_raw(
                "CREATE TRIGGER fail_feedback BEFORE INSERT ON feedback_events
                 BEGIN SELECT RAISE(ABORT, 'simulated disk failure'); END;",
            )
            .unwrap();

        let mut idx = indexer(&chain, &store, config());
        let err = idx.sync_once().await.unwrap_err();
        assert!(matches!(err, IndexerError::Store(_)));
        assert_eq!(store.checkpoint(Source::IdentityRegistry).unwrap(), None);
        assert!(store.agent(agent_b256(1)).unwrap().is_none());

        store.execute_raw("DROP TRIGGER fail_feedback;").unwrap();
        let report = idx.sync_once().await.unwrap();
        assert_eq!(report.applied(), 2);
        assert_eq!(store.checkpoint(Source::IdentityRegistry).unwrap(), Some(108));
    }

    #[tokio::test]
    async fn test_deep_reorg_rewinds_and_rescans() {
        let chain = FakeChain::with_head(120);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 0, 80, 0, ""), 50, 1, 0);

        let store = Store::open_in_memory().unwrap();
        let mut idx = indexer(&chain, &store, config());
        idx.sync_once().await.unwrap();
        assert_eq!(
            store.latest_block_ref(Source::IdentityRegistry).unwrap(),
            Some((108, block_hash(108)))
        );

        // Block 108 is replaced on the canonical chain.
        let new_hash = B256::repeat_byte(0x99);
        chain.hash_overrides.lock().unwrap().insert(108, new_hash);

        let report = idx.sync_once().await.unwrap();
        assert!(report.reorg_detected);
        assert_eq!(report.range, Some((45, 108)));
        assert_eq!(
            store.latest_block_ref(Source::IdentityRegistry).unwrap(),
            Some((108, new_hash))
        );
        // The replayed feedback is reconciled by its event key.
        assert_eq!(report.outcome.duplicates, 1);
        assert_eq!(store.feedback_count().unwrap(), 1);
        assert_eq!(PipelineMetrics::get(&idx.metrics.reorgs), 1);
    }

    #[tokio::test]
    async fn test_block_hash_change_mid_read_aborts_pass() {
        let chain = FakeChain::with_head(120);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 0, 80, 0, ""), 50, 1, 0);
        chain.hash_overrides.lock().unwrap().insert(50, B256::repeat_byte(0x01));

        let store = Store::open_in_memory().unwrap();
        let mut idx = indexer(&chain, &store, config());
        let err = idx.sync_once().await.unwrap_err();
        assert!(matches!(err, IndexerError::InconsistentView { block: 50 }));
        assert_eq!(store.checkpoint(Source::ReputationRegistry).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let chain = FakeChain::with_head(120);
        chain.push(Source::ReputationRegistry, new_feedback(1, CLIENT, 0, 80, 0, ""), 20, 1, 0);
        let store = Store::open_in_memory().unwrap();
        let idx = indexer(&chain, &store, config());

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(idx.run(rx));
        tokio::time::sleep(std::time::Duration::from_millis(1_500)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.checkpoint(Source::ReputationRegistry).unwrap(), Some(108));
    }
}
