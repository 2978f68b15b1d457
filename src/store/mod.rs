//! SQLite-backed persistent store shared by the indexer, scoring engine,
//! and oracle updater.
//!
//! Data model:
//!   agents               id → Agent
//!   feedback_events      (tx_hash, log_index) → FeedbackEvent, feedback_id UNIQUE
//!   pending_revocations  feedback_id → revocation seen before its feedback
//!   checkpoints          source → last_confirmed_block
//!   block_refs           (source, block) → hash of the last block of a committed range
//!   decode_failures      append-only ledger of undecodable logs
//!   computed_scores      agent_id → ComputedScore
//!   oracle_sync_state    agent_id → OracleSyncState
//!   oracle_submissions   tx_hash → OracleSubmission
//!
//! Every multi-row mutation runs inside one SQLite transaction, so readers
//! never observe half of a batch.

pub mod models;

pub use models::{
    Agent, BatchOutcome, CategoryScore, ComputedScore, FeedbackEvent, OracleSubmission,
    OracleSyncState, ScoreSyncRow, SubmissionStatus,
};

use crate::onchain::{ChainLog, DecodeFailure, EventKey, RegistryEvent, Source};
use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to create store directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid row data: {0}")]
    InvalidRow(String),
    #[error("agent {0} already has a pending oracle transaction")]
    PendingConflict(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Everything one indexer pass commits atomically.
#[derive(Debug, Clone, Default)]
pub struct IndexBatch {
    /// Sources whose checkpoint advances to `range_end`.
    pub sources: Vec<Source>,
    pub range_end: u64,
    /// Hash of block `range_end`, kept for reorg detection.
    pub range_end_hash: Option<B256>,
    /// Decoded logs, already sorted by (block_number, log_index).
    pub logs: Vec<ChainLog>,
    /// block number → unix timestamp for every block in `logs`.
    pub block_timestamps: HashMap<u64, i64>,
    pub failures: Vec<DecodeFailure>,
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(5_000))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Run `op` against this store on tokio's blocking pool.
    pub async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store)).await?
    }

    fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        op(&mut guard)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS agents (
                    id TEXT PRIMARY KEY NOT NULL,
                    owner TEXT NOT NULL,
                    metadata_uri TEXT,
                    registered_block INTEGER NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_agents_owner ON agents(owner);

                CREATE TABLE IF NOT EXISTS feedback_events (
                    tx_hash TEXT NOT NULL,
                    log_index INTEGER NOT NULL,
                    feedback_id TEXT NOT NULL UNIQUE,
                    subject TEXT NOT NULL,
                    author TEXT NOT NULL,
                    category TEXT,
                    raw_value TEXT NOT NULL,
                    value_decimals INTEGER NOT NULL,
                    comment TEXT,
                    revoked INTEGER NOT NULL DEFAULT 0,
                    timestamp INTEGER NOT NULL,
                    block_number INTEGER NOT NULL,
                    PRIMARY KEY (tx_hash, log_index)
                );
                CREATE INDEX IF NOT EXISTS idx_feedback_subject_revoked
                    ON feedback_events(subject, revoked);

                CREATE TABLE IF NOT EXISTS pending_revocations (
                    feedback_id TEXT PRIMARY KEY NOT NULL,
                    tx_hash TEXT NOT NULL,
                    log_index INTEGER NOT NULL,
                    block_number INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS checkpoints (
                    source TEXT PRIMARY KEY NOT NULL,
                    last_confirmed_block INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS block_refs (
                    source TEXT NOT NULL,
                    block_number INTEGER NOT NULL,
                    block_hash TEXT NOT NULL,
                    PRIMARY KEY (source, block_number)
                );

                CREATE TABLE IF NOT EXISTS decode_failures (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tx_hash TEXT,
                    log_index INTEGER,
                    block_number INTEGER,
                    reason TEXT NOT NULL,
                    recorded_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS computed_scores (
                    agent_id TEXT PRIMARY KEY NOT NULL,
                    overall_score REAL,
                    feedback_count INTEGER NOT NULL,
                    positive_count INTEGER NOT NULL,
                    negative_count INTEGER NOT NULL,
                    categories TEXT NOT NULL,
                    computed_at INTEGER NOT NULL,
                    as_of INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS oracle_sync_state (
                    agent_id TEXT PRIMARY KEY NOT NULL,
                    last_pushed_score INTEGER,
                    last_pushed_at INTEGER,
                    pending_tx TEXT,
                    failed_attempts INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_sync_pending ON oracle_sync_state(pending_tx);

                CREATE TABLE IF NOT EXISTS oracle_submissions (
                    tx_hash TEXT PRIMARY KEY NOT NULL,
                    agents TEXT NOT NULL,
                    scores TEXT NOT NULL,
                    nonce INTEGER NOT NULL,
                    max_fee_per_gas TEXT NOT NULL,
                    attempt INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    submitted_at INTEGER NOT NULL,
                    resolved_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_submissions_status ON oracle_submissions(status);
                "#,
            )?;
            Ok(())
        })
    }

    // ─── Indexer ─────────────────────────────────────────────────────────────

    pub fn checkpoint(&self, source: Source) -> Result<Option<u64>, StoreError> {
        self.with_conn(|conn| {
            let block: Option<i64> = conn
                .query_row(
                    "SELECT last_confirmed_block FROM checkpoints WHERE source = ?1",
                    params![source.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(block.map(|b| b as u64))
        })
    }

    /// Most recent stored block hash reference for `source`.
    pub fn latest_block_ref(&self, source: Source) -> Result<Option<(u64, B256)>, StoreError> {
        self.with_conn(|conn| {
            let row: Option<(i64, String)> = conn
                .query_row(
                    "SELECT block_number, block_hash FROM block_refs WHERE source = ?1
                     ORDER BY block_number DESC LIMIT 1",
                    params![source.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            row.map(|(n, h)| parse_b256(&h).map(|hash| (n as u64, hash)))
                .transpose()
        })
    }

    /// Commit one indexed block range: upserts, revocations, the decode
    /// failure ledger, and the checkpoint advance, in a single transaction.
    pub fn apply_batch(&self, batch: &IndexBatch) -> Result<BatchOutcome, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut outcome = BatchOutcome::default();
            let now = Utc::now().timestamp();

            for log in &batch.logs {
                let ts = batch
                    .block_timestamps
                    .get(&log.block_number)
                    .copied()
                    .ok_or_else(|| {
                        StoreError::InvalidRow(format!("no timestamp for block {}", log.block_number))
                    })?;
                apply_log(&tx, log, ts, now, &mut outcome)?;
            }

            outcome.revocations_resolved = resolve_pending_revocations(&tx)?;
            outcome.applied += outcome.revocations_resolved;

            for failure in &batch.failures {
                tx.execute(
                    "INSERT INTO decode_failures (tx_hash, log_index, block_number, reason, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        failure.tx_hash.map(|h| format!("{h:#x}")),
                        failure.log_index.map(|i| i as i64),
                        failure.block_number.map(|b| b as i64),
                        failure.reason,
                        now,
                    ],
                )?;
                outcome.failures_recorded += 1;
            }

            for source in &batch.sources {
                tx.execute(
                    "INSERT INTO checkpoints (source, last_confirmed_block) VALUES (?1, ?2)
                     ON CONFLICT(source) DO UPDATE SET last_confirmed_block =
                        MAX(last_confirmed_block, excluded.last_confirmed_block)",
                    params![source.as_str(), batch.range_end as i64],
                )?;
                if let Some(hash) = batch.range_end_hash {
                    tx.execute(
                        "INSERT OR REPLACE INTO block_refs (source, block_number, block_hash)
                         VALUES (?1, ?2, ?3)",
                        params![source.as_str(), batch.range_end as i64, format!("{hash:#x}")],
                    )?;
                }
            }

            tx.commit()?;
            Ok(outcome)
        })
    }

    /// Move the checkpoint of `sources` back to `to_block` and forget block
    /// references above it. Used after a deep reorg.
    pub fn rewind_checkpoints(&self, sources: &[Source], to_block: u64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for source in sources {
                tx.execute(
                    "UPDATE checkpoints SET last_confirmed_block = ?2
                     WHERE source = ?1 AND last_confirmed_block > ?2",
                    params![source.as_str(), to_block as i64],
                )?;
                tx.execute(
                    "DELETE FROM block_refs WHERE source = ?1 AND block_number > ?2",
                    params![source.as_str(), to_block as i64],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn pending_revocation_count(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM pending_revocations", [], |r| r.get(0))?;
            Ok(n as u64)
        })
    }

    pub fn decode_failure_count(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM decode_failures", [], |r| r.get(0))?;
            Ok(n as u64)
        })
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub fn agent(&self, id: B256) -> Result<Option<Agent>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, owner, metadata_uri, registered_block, created_at FROM agents WHERE id = ?1",
                params![format!("{id:#x}")],
                |row| Ok(row_to_agent(row)),
            )
            .optional()?
            .transpose()
        })
    }

    /// Agents ordered by registration block, then id.
    pub fn list_agents(&self, offset: u64, limit: u64) -> Result<Vec<Agent>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner, metadata_uri, registered_block, created_at FROM agents
                 ORDER BY registered_block, id LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], |row| Ok(row_to_agent(row)))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    pub fn agent_count(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM agents", [], |r| r.get(0))?;
            Ok(n as u64)
        })
    }

    /// Non-revoked feedback about `agent`, in chain order.
    pub fn feedback_page(
        &self,
        agent: B256,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<FeedbackEvent>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{FEEDBACK_COLUMNS} WHERE subject = ?1 AND revoked = 0
                 ORDER BY block_number, log_index LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(
                params![format!("{agent:#x}"), limit as i64, offset as i64],
                |row| Ok(row_to_feedback(row)),
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    /// Every feedback row about `agent`, revoked included.
    pub fn all_feedback(&self, agent: B256) -> Result<Vec<FeedbackEvent>, StoreError> {
        self.with_conn(|conn| load_feedback(conn, agent, true))
    }

    pub fn feedback_count(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM feedback_events", [], |r| r.get(0))?;
            Ok(n as u64)
        })
    }

    /// Agents that are the subject of at least one feedback row.
    pub fn agents_with_feedback(&self) -> Result<Vec<B256>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT subject FROM feedback_events ORDER BY subject")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(parse_b256(&row?)?);
            }
            Ok(out)
        })
    }

    // ─── Scores ──────────────────────────────────────────────────────────────

    /// Read the agent's non-revoked feedback, compute, and overwrite the
    /// stored score, all in one transaction.
    pub fn recompute_score<F>(&self, agent: B256, compute: F) -> Result<ComputedScore, StoreError>
    where
        F: FnOnce(&[FeedbackEvent]) -> ComputedScore,
    {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let events = load_feedback(&tx, agent, false)?;
            let score = compute(&events);
            write_score(&tx, &score)?;
            tx.commit()?;
            Ok(score)
        })
    }

    pub fn save_score(&self, score: &ComputedScore) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            write_score(&tx, score)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn score(&self, agent: B256) -> Result<Option<ComputedScore>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT agent_id, overall_score, feedback_count, positive_count, negative_count,
                        categories, computed_at, as_of
                 FROM computed_scores WHERE agent_id = ?1",
                params![format!("{agent:#x}")],
                |row| Ok(row_to_score(row)),
            )
            .optional()?
            .transpose()
        })
    }

    // ─── Oracle sync ─────────────────────────────────────────────────────────

    /// Every computed score with its sync state (if any).
    pub fn score_sync_rows(&self) -> Result<Vec<ScoreSyncRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.agent_id, c.overall_score, s.agent_id, s.last_pushed_score,
                        s.last_pushed_at, s.pending_tx, s.failed_attempts
                 FROM computed_scores c
                 LEFT JOIN oracle_sync_state s ON s.agent_id = c.agent_id
                 ORDER BY c.agent_id",
            )?;
            let rows = stmt.query_map([], |row| {
                let agent_id: String = row.get(0)?;
                let overall_score: Option<f64> = row.get(1)?;
                let sync_id: Option<String> = row.get(2)?;
                let last_pushed_score: Option<i64> = row.get(3)?;
                let last_pushed_at: Option<i64> = row.get(4)?;
                let pending_tx: Option<String> = row.get(5)?;
                let failed_attempts: Option<i64> = row.get(6)?;
                Ok((
                    agent_id,
                    overall_score,
                    sync_id,
                    last_pushed_score,
                    last_pushed_at,
                    pending_tx,
                    failed_attempts,
                ))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (agent_id, overall_score, sync_id, pushed, pushed_at, pending, failed) = row?;
                let agent_id = parse_b256(&agent_id)?;
                let sync = match sync_id {
                    Some(_) => Some(OracleSyncState {
                        agent_id,
                        last_pushed_score: pushed.map(|s| s as u32),
                        last_pushed_at: pushed_at.map(ts_to_datetime).transpose()?,
                        pending_tx: pending.as_deref().map(parse_b256).transpose()?,
                        failed_attempts: failed.unwrap_or(0) as u32,
                    }),
                    None => None,
                };
                out.push(ScoreSyncRow {
                    agent_id,
                    overall_score,
                    sync,
                });
            }
            Ok(out)
        })
    }

    pub fn sync_state(&self, agent: B256) -> Result<Option<OracleSyncState>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT agent_id, last_pushed_score, last_pushed_at, pending_tx, failed_attempts
                 FROM oracle_sync_state WHERE agent_id = ?1",
                params![format!("{agent:#x}")],
                |row| Ok(row_to_sync_state(row)),
            )
            .optional()?
            .transpose()
        })
    }

    /// Record a broadcast write and mark every agent in it as pending, in one
    /// transaction. Fails without writing anything if any agent already has
    /// a pending transaction.
    pub fn record_submission(&self, submission: &OracleSubmission) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for agent in &submission.agents {
                let pending: Option<Option<String>> = tx
                    .query_row(
                        "SELECT pending_tx FROM oracle_sync_state WHERE agent_id = ?1",
                        params![format!("{agent:#x}")],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(Some(_)) = pending {
                    return Err(StoreError::PendingConflict(format!("{agent:#x}")));
                }
            }

            let agents: Vec<String> = submission.agents.iter().map(|a| format!("{a:#x}")).collect();
            let tx_hash = format!("{:#x}", submission.tx_hash);
            tx.execute(
                "INSERT INTO oracle_submissions
                    (tx_hash, agents, scores, nonce, max_fee_per_gas, attempt, status, submitted_at, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
                params![
                    tx_hash,
                    serde_json::to_string(&agents)?,
                    serde_json::to_string(&submission.scores)?,
                    submission.nonce as i64,
                    submission.max_fee_per_gas.to_string(),
                    submission.attempt as i64,
                    SubmissionStatus::Pending.as_str(),
                    submission.submitted_at.timestamp(),
                ],
            )?;

            for agent in &agents {
                tx.execute(
                    "INSERT INTO oracle_sync_state (agent_id, pending_tx, failed_attempts)
                     VALUES (?1, ?2, 0)
                     ON CONFLICT(agent_id) DO UPDATE SET pending_tx = excluded.pending_tx",
                    params![agent, tx_hash],
                )?;
            }

            tx.commit()?;
            debug!(tx = %tx_hash, agents = agents.len(), "oracle submission recorded");
            Ok(())
        })
    }

    pub fn pending_submissions(&self) -> Result<Vec<OracleSubmission>, StoreError> {
        self.submissions_with_status(SubmissionStatus::Pending)
    }

    pub fn submissions_with_status(
        &self,
        status: SubmissionStatus,
    ) -> Result<Vec<OracleSubmission>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tx_hash, agents, scores, nonce, max_fee_per_gas, attempt, status,
                        submitted_at, resolved_at
                 FROM oracle_submissions WHERE status = ?1 ORDER BY submitted_at, nonce",
            )?;
            let rows = stmt.query_map(params![status.as_str()], |row| Ok(row_to_submission(row)))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    pub fn submission(&self, tx_hash: B256) -> Result<Option<OracleSubmission>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT tx_hash, agents, scores, nonce, max_fee_per_gas, attempt, status,
                        submitted_at, resolved_at
                 FROM oracle_submissions WHERE tx_hash = ?1",
                params![format!("{tx_hash:#x}")],
                |row| Ok(row_to_submission(row)),
            )
            .optional()?
            .transpose()
        })
    }

    /// Mark a submission confirmed and promote its scores to `last_pushed_*`.
    pub fn confirm_submission(&self, tx_hash: B256, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let Some(submission) = load_pending_submission(&tx, tx_hash)? else {
                return Ok(());
            };
            let hash = format!("{tx_hash:#x}");
            tx.execute(
                "UPDATE oracle_submissions SET status = ?2, resolved_at = ?3 WHERE tx_hash = ?1",
                params![hash, SubmissionStatus::Confirmed.as_str(), at.timestamp()],
            )?;
            for (agent, score) in submission.agents.iter().zip(&submission.scores) {
                tx.execute(
                    "UPDATE oracle_sync_state
                     SET last_pushed_score = ?2, last_pushed_at = ?3, pending_tx = NULL, failed_attempts = 0
                     WHERE agent_id = ?1 AND pending_tx = ?4",
                    params![format!("{agent:#x}"), *score as i64, at.timestamp(), hash],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Close a submission as reverted / timed out: clear `pending_tx` and
    /// count the failure against every agent in it.
    pub fn fail_submission(
        &self,
        tx_hash: B256,
        status: SubmissionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let Some(submission) = load_pending_submission(&tx, tx_hash)? else {
                return Ok(());
            };
            let hash = format!("{tx_hash:#x}");
            tx.execute(
                "UPDATE oracle_submissions SET status = ?2, resolved_at = ?3 WHERE tx_hash = ?1",
                params![hash, status.as_str(), at.timestamp()],
            )?;
            for agent in &submission.agents {
                tx.execute(
                    "UPDATE oracle_sync_state
                     SET pending_tx = NULL, failed_attempts = failed_attempts + 1
                     WHERE agent_id = ?1 AND pending_tx = ?2",
                    params![format!("{agent:#x}"), hash],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Count a push that failed before broadcast (e.g. rejected by the node).
    pub fn note_failed_push(&self, agents: &[B256]) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for agent in agents {
                tx.execute(
                    "INSERT INTO oracle_sync_state (agent_id, failed_attempts) VALUES (?1, 1)
                     ON CONFLICT(agent_id) DO UPDATE SET failed_attempts = failed_attempts + 1",
                    params![format!("{agent:#x}")],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Unpark an agent whose pushes exhausted the retry budget.
    pub fn reset_oracle_retries(&self, agent: B256) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE oracle_sync_state SET failed_attempts = 0 WHERE agent_id = ?1",
                params![format!("{agent:#x}")],
            )?;
            if changed == 0 {
                warn!(agent = %agent, "retry reset for agent without sync state");
            }
            Ok(())
        })
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(sql)?;
            Ok(())
        })
    }
}

// ─── Transaction helpers ─────────────────────────────────────────────────────

const FEEDBACK_COLUMNS: &str = "SELECT tx_hash, log_index, feedback_id, subject, author, category,
        raw_value, value_decimals, comment, revoked, timestamp, block_number
     FROM feedback_events";

fn apply_log(
    tx: &Transaction<'_>,
    log: &ChainLog,
    block_ts: i64,
    now: i64,
    outcome: &mut BatchOutcome,
) -> Result<(), StoreError> {
    match &log.event {
        RegistryEvent::AgentRegistered {
            agent_id,
            owner,
            metadata_uri,
        } => {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO agents (id, owner, metadata_uri, registered_block, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    format!("{agent_id:#x}"),
                    format!("{owner:#x}"),
                    metadata_uri,
                    log.block_number as i64,
                    block_ts,
                ],
            )?;
            if inserted == 1 {
                outcome.applied += 1;
                debug!(agent = %agent_id, owner = %owner, block = log.block_number, "agent registered");
            } else {
                outcome.duplicates += 1;
            }
        }
        RegistryEvent::MetadataUpdated {
            agent_id,
            metadata_uri,
        } => {
            let updated = tx.execute(
                "UPDATE agents SET metadata_uri = ?2 WHERE id = ?1",
                params![format!("{agent_id:#x}"), metadata_uri],
            )?;
            if updated == 1 {
                outcome.applied += 1;
            } else {
                warn!(agent = %agent_id, block = log.block_number, "metadata update for unknown agent");
                tx.execute(
                    "INSERT INTO decode_failures (tx_hash, log_index, block_number, reason, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        format!("{:#x}", log.key.tx_hash),
                        log.key.log_index as i64,
                        log.block_number as i64,
                        format!("metadata update for unknown agent {agent_id:#x}"),
                        now,
                    ],
                )?;
                outcome.failures_recorded += 1;
            }
        }
        RegistryEvent::NewFeedback {
            feedback_id,
            category,
            raw_value,
            value_decimals,
            comment,
        } => {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO feedback_events
                    (tx_hash, log_index, feedback_id, subject, author, category, raw_value,
                     value_decimals, comment, revoked, timestamp, block_number)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11)",
                params![
                    format!("{:#x}", log.key.tx_hash),
                    log.key.log_index as i64,
                    feedback_id.to_string(),
                    format!("{:#x}", feedback_id.agent_id),
                    format!("{:#x}", feedback_id.client),
                    category,
                    raw_value.to_string(),
                    *value_decimals as i64,
                    comment,
                    block_ts,
                    log.block_number as i64,
                ],
            )?;
            if inserted == 1 {
                outcome.applied += 1;
            } else {
                outcome.duplicates += 1;
            }
        }
        RegistryEvent::FeedbackRevoked { feedback_id } => {
            let id = feedback_id.to_string();
            let flipped = tx.execute(
                "UPDATE feedback_events SET revoked = 1 WHERE feedback_id = ?1 AND revoked = 0",
                params![id],
            )?;
            if flipped == 1 {
                outcome.applied += 1;
                return Ok(());
            }
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM feedback_events WHERE feedback_id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            if exists {
                outcome.duplicates += 1;
            } else {
                let buffered = tx.execute(
                    "INSERT OR IGNORE INTO pending_revocations (feedback_id, tx_hash, log_index, block_number)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        id,
                        format!("{:#x}", log.key.tx_hash),
                        log.key.log_index as i64,
                        log.block_number as i64,
                    ],
                )?;
                if buffered == 1 {
                    outcome.revocations_buffered += 1;
                    debug!(feedback = %id, "revocation buffered until its feedback arrives");
                } else {
                    outcome.duplicates += 1;
                }
            }
        }
        RegistryEvent::Unknown { topic0 } => {
            debug!(topic = ?topic0, block = log.block_number, "skipping unknown registry event");
            outcome.unknown_skipped += 1;
        }
    }
    Ok(())
}

/// Apply buffered revocations whose feedback now exists. Returns how many.
fn resolve_pending_revocations(tx: &Transaction<'_>) -> Result<usize, StoreError> {
    tx.execute(
        "UPDATE feedback_events SET revoked = 1
         WHERE revoked = 0 AND feedback_id IN (SELECT feedback_id FROM pending_revocations)",
        [],
    )?;
    let resolved = tx.execute(
        "DELETE FROM pending_revocations
         WHERE feedback_id IN (SELECT feedback_id FROM feedback_events)",
        [],
    )?;
    Ok(resolved)
}

fn load_feedback(
    conn: &Connection,
    agent: B256,
    include_revoked: bool,
) -> Result<Vec<FeedbackEvent>, StoreError> {
    let sql = if include_revoked {
        format!("{FEEDBACK_COLUMNS} WHERE subject = ?1 ORDER BY block_number, log_index")
    } else {
        format!("{FEEDBACK_COLUMNS} WHERE subject = ?1 AND revoked = 0 ORDER BY block_number, log_index")
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![format!("{agent:#x}")], |row| Ok(row_to_feedback(row)))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

fn write_score(tx: &Transaction<'_>, score: &ComputedScore) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR REPLACE INTO computed_scores
            (agent_id, overall_score, feedback_count, positive_count, negative_count,
             categories, computed_at, as_of)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            format!("{:#x}", score.agent_id),
            score.overall_score,
            score.feedback_count as i64,
            score.positive_count as i64,
            score.negative_count as i64,
            serde_json::to_string(&score.categories)?,
            score.computed_at.timestamp(),
            score.as_of.timestamp(),
        ],
    )?;
    Ok(())
}

fn load_pending_submission(
    tx: &Transaction<'_>,
    tx_hash: B256,
) -> Result<Option<OracleSubmission>, StoreError> {
    let submission = tx
        .query_row(
            "SELECT tx_hash, agents, scores, nonce, max_fee_per_gas, attempt, status,
                    submitted_at, resolved_at
             FROM oracle_submissions WHERE tx_hash = ?1",
            params![format!("{tx_hash:#x}")],
            |row| Ok(row_to_submission(row)),
        )
        .optional()?
        .transpose()?;
    match submission {
        Some(s) if s.status == SubmissionStatus::Pending => Ok(Some(s)),
        Some(s) => {
            debug!(tx = %tx_hash, status = %s.status, "submission already resolved");
            Ok(None)
        }
        None => {
            warn!(tx = %tx_hash, "unknown oracle submission");
            Ok(None)
        }
    }
}

// ─── Row decoding ────────────────────────────────────────────────────────────

fn parse_b256(s: &str) -> Result<B256, StoreError> {
    B256::from_str(s).map_err(|e| StoreError::InvalidRow(format!("bad bytes32 '{s}': {e}")))
}

fn parse_address(s: &str) -> Result<Address, StoreError> {
    Address::from_str(s).map_err(|e| StoreError::InvalidRow(format!("bad address '{s}': {e}")))
}

fn ts_to_datetime(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::InvalidRow(format!("timestamp out of range: {secs}")))
}

fn row_to_agent(row: &Row<'_>) -> Result<Agent, StoreError> {
    let id: String = row.get(0)?;
    let owner: String = row.get(1)?;
    let registered_block: i64 = row.get(3)?;
    Ok(Agent {
        id: parse_b256(&id)?,
        owner: parse_address(&owner)?,
        metadata_uri: row.get(2)?,
        registered_block: registered_block as u64,
        created_at: ts_to_datetime(row.get(4)?)?,
    })
}

fn row_to_feedback(row: &Row<'_>) -> Result<FeedbackEvent, StoreError> {
    let tx_hash: String = row.get(0)?;
    let log_index: i64 = row.get(1)?;
    let subject: String = row.get(3)?;
    let author: String = row.get(4)?;
    let raw_value: String = row.get(6)?;
    let value_decimals: i64 = row.get(7)?;
    let block_number: i64 = row.get(11)?;
    Ok(FeedbackEvent {
        key: EventKey {
            tx_hash: parse_b256(&tx_hash)?,
            log_index: log_index as u64,
        },
        feedback_id: row.get(2)?,
        subject: parse_b256(&subject)?,
        author: parse_address(&author)?,
        category: row.get(5)?,
        raw_value: raw_value
            .parse()
            .map_err(|e| StoreError::InvalidRow(format!("bad raw_value '{raw_value}': {e}")))?,
        value_decimals: u8::try_from(value_decimals)
            .map_err(|_| StoreError::InvalidRow(format!("bad value_decimals {value_decimals}")))?,
        comment: row.get(8)?,
        revoked: row.get(9)?,
        timestamp: ts_to_datetime(row.get(10)?)?,
        block_number: block_number as u64,
    })
}

fn row_to_score(row: &Row<'_>) -> Result<ComputedScore, StoreError> {
    let agent_id: String = row.get(0)?;
    let categories: String = row.get(5)?;
    let feedback_count: i64 = row.get(2)?;
    let positive_count: i64 = row.get(3)?;
    let negative_count: i64 = row.get(4)?;
    Ok(ComputedScore {
        agent_id: parse_b256(&agent_id)?,
        overall_score: row.get(1)?,
        feedback_count: feedback_count as u64,
        positive_count: positive_count as u64,
        negative_count: negative_count as u64,
        categories: serde_json::from_str(&categories)?,
        computed_at: ts_to_datetime(row.get(6)?)?,
        as_of: ts_to_datetime(row.get(7)?)?,
    })
}

fn row_to_sync_state(row: &Row<'_>) -> Result<OracleSyncState, StoreError> {
    let agent_id: String = row.get(0)?;
    let last_pushed_score: Option<i64> = row.get(1)?;
    let last_pushed_at: Option<i64> = row.get(2)?;
    let pending_tx: Option<String> = row.get(3)?;
    let failed_attempts: i64 = row.get(4)?;
    Ok(OracleSyncState {
        agent_id: parse_b256(&agent_id)?,
        last_pushed_score: last_pushed_score.map(|s| s as u32),
        last_pushed_at: last_pushed_at.map(ts_to_datetime).transpose()?,
        pending_tx: pending_tx.as_deref().map(parse_b256).transpose()?,
        failed_attempts: failed_attempts as u32,
    })
}

fn row_to_submission(row: &Row<'_>) -> Result<OracleSubmission, StoreError> {
    let tx_hash: String = row.get(0)?;
    let agents: String = row.get(1)?;
    let scores: String = row.get(2)?;
    let nonce: i64 = row.get(3)?;
    let max_fee: String = row.get(4)?;
    let attempt: i64 = row.get(5)?;
    let status: String = row.get(6)?;
    let resolved_at: Option<i64> = row.get(8)?;

    let agents: Vec<String> = serde_json::from_str(&agents)?;
    Ok(OracleSubmission {
        tx_hash: parse_b256(&tx_hash)?,
        agents: agents
            .iter()
            .map(|a| parse_b256(a))
            .collect::<Result<Vec<_>, _>>()?,
        scores: serde_json::from_str(&scores)?,
        nonce: nonce as u64,
        max_fee_per_gas: max_fee
            .parse()
            .map_err(|e| StoreError::InvalidRow(format!("bad max_fee_per_gas '{max_fee}': {e}")))?,
        attempt: attempt as u32,
        status: SubmissionStatus::from_db(&status)
            .ok_or_else(|| StoreError::InvalidRow(format!("bad submission status '{status}'")))?,
        submitted_at: ts_to_datetime(row.get(7)?)?,
        resolved_at: resolved_at.map(ts_to_datetime).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::FeedbackId;
    use alloy::primitives::address;

    const CLIENT: Address = address!("00000000000000000000000000000000000000c1");

    fn agent_id(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    fn feedback_log(agent: u8, index: u64, value: i128, block: u64, log_index: u64) -> ChainLog {
        ChainLog {
            source: Source::ReputationRegistry,
            key: EventKey {
                tx_hash: B256::repeat_byte(block as u8),
                log_index,
            },
            block_number: block,
            block_hash: None,
            event: RegistryEvent::NewFeedback {
                feedback_id: FeedbackId {
                    agent_id: agent_id(agent),
                    client: CLIENT,
                    index,
                },
                category: None,
                raw_value: value,
                value_decimals: 0,
                comment: None,
            },
        }
    }

    fn revoke_log(agent: u8, index: u64, block: u64, log_index: u64) -> ChainLog {
        ChainLog {
            source: Source::ReputationRegistry,
            key: EventKey {
                tx_hash: B256::repeat_byte(block as u8),
                log_index,
            },
            block_number: block,
            block_hash: None,
            event: RegistryEvent::FeedbackRevoked {
                feedback_id: FeedbackId {
                    agent_id: agent_id(agent),
                    client: CLIENT,
                    index,
                },
            },
        }
    }

    fn batch(range_end: u64, logs: Vec<ChainLog>) -> IndexBatch {
        let block_timestamps = logs
            .iter()
            .map(|l| (l.block_number, 1_700_000_000 + l.block_number as i64))
            .collect();
        IndexBatch {
            sources: Source::ALL.to_vec(),
            range_end,
            range_end_hash: Some(B256::repeat_byte(0xee)),
            logs,
            block_timestamps,
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_batch_commits_events_and_checkpoint_together() {
        let store = Store::open_in_memory().unwrap();
        let outcome = store
            .apply_batch(&batch(10, vec![feedback_log(1, 0, 50, 5, 0)]))
            .unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(store.checkpoint(Source::ReputationRegistry).unwrap(), Some(10));
        assert_eq!(store.checkpoint(Source::IdentityRegistry).unwrap(), Some(10));
        assert_eq!(
            store.latest_block_ref(Source::IdentityRegistry).unwrap(),
            Some((10, B256::repeat_byte(0xee)))
        );
    }

    #[test]
    fn test_redelivery_is_a_noop() {
        let store = Store::open_in_memory().unwrap();
        let b = batch(10, vec![feedback_log(1, 0, 50, 5, 0)]);
        store.apply_batch(&b).unwrap();
        let again = store.apply_batch(&b).unwrap();
        assert_eq!(again.applied, 0);
        assert_eq!(again.duplicates, 1);
        assert_eq!(store.feedback_count().unwrap(), 1);
    }

    #[test]
    fn test_revocation_before_feedback_is_buffered_then_applied() {
        let store = Store::open_in_memory().unwrap();
        let first = store.apply_batch(&batch(5, vec![revoke_log(1, 0, 4, 0)])).unwrap();
        assert_eq!(first.revocations_buffered, 1);
        assert_eq!(store.pending_revocation_count().unwrap(), 1);

        let second = store
            .apply_batch(&batch(10, vec![feedback_log(1, 0, 50, 8, 0)]))
            .unwrap();
        assert_eq!(second.revocations_resolved, 1);
        assert_eq!(store.pending_revocation_count().unwrap(), 0);
        let all = store.all_feedback(agent_id(1)).unwrap();
        assert!(all[0].revoked);
        assert!(store.feedback_page(agent_id(1), 0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_revoked_flag_never_reverts() {
        let store = Store::open_in_memory().unwrap();
        store
            .apply_batch(&batch(
                10,
                vec![feedback_log(1, 0, 50, 5, 0), revoke_log(1, 0, 6, 0)],
            ))
            .unwrap();
        // Replaying the original feedback must not clear the flag.
        store
            .apply_batch(&batch(10, vec![feedback_log(1, 0, 50, 5, 0)]))
            .unwrap();
        assert!(store.all_feedback(agent_id(1)).unwrap()[0].revoked);
    }

    #[test]
    fn test_failed_commit_leaves_checkpoint_untouched() {
        let store = Store::open_in_memory().unwrap();
        store.apply_batch(&batch(10, vec![])).unwrap();
        store
            .execute_raw(
                "CREATE TRIGGER reject_feedback BEFORE INSERT ON feedback_events
                 WHEN NEW.raw_value = '666'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let result = store.apply_batch(&batch(
            20,
            vec![feedback_log(1, 0, 10, 12, 0), feedback_log(1, 1, 666, 15, 0)],
        ));
        assert!(result.is_err());
        assert_eq!(store.checkpoint(Source::ReputationRegistry).unwrap(), Some(10));
        assert_eq!(store.feedback_count().unwrap(), 0);
    }

    #[test]
    fn test_rewind_drops_newer_block_refs() {
        let store = Store::open_in_memory().unwrap();
        store.apply_batch(&batch(10, vec![])).unwrap();
        store.apply_batch(&batch(20, vec![])).unwrap();
        store.rewind_checkpoints(&Source::ALL, 12).unwrap();
        assert_eq!(store.checkpoint(Source::IdentityRegistry).unwrap(), Some(12));
        assert_eq!(
            store.latest_block_ref(Source::IdentityRegistry).unwrap().map(|r| r.0),
            Some(10)
        );
    }

    #[test]
    fn test_checkpoint_never_moves_backwards_on_apply() {
        let store = Store::open_in_memory().unwrap();
        store.apply_batch(&batch(20, vec![])).unwrap();
        store.apply_batch(&batch(15, vec![])).unwrap();
        assert_eq!(store.checkpoint(Source::IdentityRegistry).unwrap(), Some(20));
    }

    fn submission(tx: u8, agents: Vec<B256>, scores: Vec<u32>) -> OracleSubmission {
        OracleSubmission {
            tx_hash: B256::repeat_byte(tx),
            agents,
            scores,
            nonce: 7,
            max_fee_per_gas: 40_000_000_000,
            attempt: 0,
            status: SubmissionStatus::Pending,
            submitted_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            resolved_at: None,
        }
    }

    #[test]
    fn test_second_pending_submission_for_agent_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_submission(&submission(0xa1, vec![agent_id(1)], vec![5_000]))
            .unwrap();
        let err = store
            .record_submission(&submission(0xa2, vec![agent_id(2), agent_id(1)], vec![1, 2]))
            .unwrap_err();
        assert!(matches!(err, StoreError::PendingConflict(_)));
        // Nothing from the rejected submission was written.
        assert!(store.sync_state(agent_id(2)).unwrap().is_none());
        assert!(store.submission(B256::repeat_byte(0xa2)).unwrap().is_none());
    }

    #[test]
    fn test_confirm_promotes_scores_and_clears_pending() {
        let store = Store::open_in_memory().unwrap();
        let sub = submission(0xa1, vec![agent_id(1), agent_id(2)], vec![5_000, 7_500]);
        store.record_submission(&sub).unwrap();
        assert_eq!(
            store.sync_state(agent_id(1)).unwrap().unwrap().pending_tx,
            Some(sub.tx_hash)
        );

        let at = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        store.confirm_submission(sub.tx_hash, at).unwrap();
        let state = store.sync_state(agent_id(2)).unwrap().unwrap();
        assert_eq!(state.last_pushed_score, Some(7_500));
        assert_eq!(state.last_pushed_at, Some(at));
        assert_eq!(state.pending_tx, None);
        assert!(store.pending_submissions().unwrap().is_empty());
    }

    #[test]
    fn test_fail_counts_attempt_and_keeps_last_pushed() {
        let store = Store::open_in_memory().unwrap();
        let at = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let first = submission(0xa1, vec![agent_id(1)], vec![5_000]);
        store.record_submission(&first).unwrap();
        store.confirm_submission(first.tx_hash, at).unwrap();

        let second = submission(0xa2, vec![agent_id(1)], vec![9_000]);
        store.record_submission(&second).unwrap();
        store
            .fail_submission(second.tx_hash, SubmissionStatus::Reverted, at)
            .unwrap();

        let state = store.sync_state(agent_id(1)).unwrap().unwrap();
        assert_eq!(state.last_pushed_score, Some(5_000));
        assert_eq!(state.pending_tx, None);
        assert_eq!(state.failed_attempts, 1);
        assert_eq!(
            store.submission(second.tx_hash).unwrap().unwrap().status,
            SubmissionStatus::Reverted
        );

        store.reset_oracle_retries(agent_id(1)).unwrap();
        assert_eq!(store.sync_state(agent_id(1)).unwrap().unwrap().failed_attempts, 0);
    }

    #[test]
    fn test_score_round_trips_with_undefined_overall() {
        let store = Store::open_in_memory().unwrap();
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let score = ComputedScore {
            agent_id: agent_id(3),
            overall_score: None,
            feedback_count: 0,
            positive_count: 0,
            negative_count: 0,
            categories: vec![],
            computed_at: at,
            as_of: at,
        };
        store.save_score(&score).unwrap();
        assert_eq!(store.score(agent_id(3)).unwrap(), Some(score));
        let rows = store.score_sync_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].overall_score, None);
        assert!(rows[0].sync.is_none());
    }

    #[test]
    fn test_open_on_disk_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("trust.db");
        let store = Store::open(&path).unwrap();
        store.apply_batch(&batch(3, vec![])).unwrap();
        drop(store);
        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.checkpoint(Source::IdentityRegistry).unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_blocking_commits_off_the_runtime() {
        let store = Store::open_in_memory().unwrap();
        let b = batch(7, vec![feedback_log(1, 0, 50, 5, 0)]);
        let outcome = store.blocking(move |s| s.apply_batch(&b)).await.unwrap();
        assert_eq!(outcome.applied, 1);
        let checkpoint = store
            .blocking(|s| s.checkpoint(Source::ReputationRegistry))
            .await
            .unwrap();
        assert_eq!(checkpoint, Some(7));
    }

    #[tokio::test]
    async fn test_blocking_surfaces_store_errors() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .blocking(|s| s.execute_raw("SELECT * FROM no_such_table"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }
}
