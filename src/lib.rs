//! Trust score pipeline for ERC-8004 agents.
//!
//! Three independent loops share one SQLite store:
//! - `indexer`: registry logs → agents / feedback, checkpointed
//! - `scoring`: feedback → time-decayed scores
//! - `oracle`: scores → on-chain oracle, confirmed writes only
//!
//! Re-exported so the service binary and one-shot tools share the same code.

pub mod config;
pub mod indexer;
pub mod metrics;
pub mod onchain;
pub mod oracle;
pub mod query;
pub mod retry;
pub mod scoring;
pub mod store;
