//! trust-oracle: ERC-8004 trust score service.
//!
//! Runs the indexer, scoring engine, and (when enabled) the oracle updater
//! as independent loops over a shared SQLite store until Ctrl-C.

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use trust_oracle::config::Config;
use trust_oracle::indexer::Indexer;
use trust_oracle::metrics::PipelineMetrics;
use trust_oracle::onchain::{RpcEventSource, RpcOracleClient};
use trust_oracle::oracle::OracleUpdater;
use trust_oracle::scoring::ScoringEngine;
use trust_oracle::store::Store;

const DEFAULT_CONFIG_PATH: &str = "trust-oracle.toml";
const METRICS_SUMMARY_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config_path =
        std::env::var("TRUST_ORACLE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let (config, from_file) = if Path::new(&config_path).exists() {
        (Config::load(Path::new(&config_path))?, true)
    } else {
        (Config::from_env()?, false)
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    if from_file {
        info!(path = %config_path, "loaded config file");
    } else {
        info!(path = %config_path, "no config file found, using env-only config");
    }

    let store = Store::open(&config.store.path)
        .with_context(|| format!("opening store at {}", config.store.path))?;
    let metrics = Arc::new(PipelineMetrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    // ─── Indexer ────────────────────────────────────────────────────────
    let source = Arc::new(RpcEventSource::new(&config.chain)?);
    let indexer = Indexer::new(
        source,
        store.clone(),
        config.indexer.clone(),
        Arc::clone(&metrics),
    );
    tasks.push(("indexer", tokio::spawn(indexer.run(shutdown_rx.clone()))));

    // ─── Scoring ────────────────────────────────────────────────────────
    let engine = ScoringEngine::new(store.clone(), config.scoring.clone(), Arc::clone(&metrics));
    tasks.push(("scoring", tokio::spawn(engine.run(shutdown_rx.clone()))));

    // ─── Oracle ─────────────────────────────────────────────────────────
    if config.oracle.enabled {
        config.require_oracle_credentials()?;
        let client = Arc::new(RpcOracleClient::new(&config.chain)?);
        let updater = OracleUpdater::new(
            client,
            store.clone(),
            config.oracle.clone(),
            Arc::clone(&metrics),
        );
        tasks.push(("oracle", tokio::spawn(updater.run(shutdown_rx.clone()))));
    } else {
        warn!("oracle updater disabled (oracle.enabled = false)");
    }

    info!(
        store = %config.store.path,
        rpc = %config.chain.rpc_url,
        oracle = config.oracle.enabled,
        "trust-oracle running"
    );

    let mut summary = tokio::time::interval(METRICS_SUMMARY_INTERVAL);
    summary.tick().await;
    loop {
        tokio::select! {
            _ = summary.tick() => metrics.log_summary(),
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down...");
                break;
            }
        }
    }

    // Loops finish their current unit of work before exiting.
    let _ = shutdown_tx.send(true);
    for (name, handle) in tasks {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "task ended abnormally");
        }
    }
    metrics.log_summary();
    info!("shutdown complete");
    Ok(())
}
