//! Chain access for the ERC-8004 registries and the trust score oracle.
//!
//! Architecture:
//! - `abi`: `sol!` bindings for the registry events and oracle methods
//! - `types`: tagged decode of raw logs into `RegistryEvent`s, plus the
//!   shared error type `ChainError`
//! - `source`: the Event Source Adapter (`EventSource`), read-only log access
//! - `client`: the `OracleClient` used by the Oracle Updater for priced writes
//!
//! Both adapters are traits so the indexer and updater can be driven by
//! in-memory fakes in tests.

pub mod abi;
pub mod client;
pub mod source;
pub mod types;

pub use client::{OracleClient, RpcOracleClient};
pub use source::{EventSource, RpcEventSource};
pub use types::{
    decode_log, BlockRef, ChainError, ChainLog, DecodeFailure, EventKey, FeedbackId,
    RegistryEvent, ScoreView, Source, SubmitRequest, TxReceipt,
};
