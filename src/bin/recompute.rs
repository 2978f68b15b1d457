//! Recompute stored trust scores outside the service loop.
//!
//! Usage:
//!   cargo run --bin recompute                          # every agent, as of now
//!   cargo run --bin recompute -- --agent 0x<id>        # one agent
//!   cargo run --bin recompute -- --as-of 1750000000    # fixed decay reference
//!   cargo run --bin recompute -- --reset-retries 0x<id>  # unpark oracle pushes

use anyhow::{bail, Context, Result};
use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use trust_oracle::config::Config;
use trust_oracle::metrics::PipelineMetrics;
use trust_oracle::scoring::ScoringEngine;
use trust_oracle::store::Store;

// ─── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Args {
    agent: Option<B256>,
    as_of: Option<DateTime<Utc>>,
    reset_retries: Option<B256>,
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut args = Args::default();
    let mut iter = raw.iter();
    while let Some(flag) = iter.next() {
        let mut value = || iter.next().with_context(|| format!("{flag} needs a value"));
        match flag.as_str() {
            "--agent" => args.agent = Some(parse_agent(value()?)?),
            "--reset-retries" => args.reset_retries = Some(parse_agent(value()?)?),
            "--as-of" => {
                let raw = value()?;
                let secs: i64 = raw.parse().with_context(|| format!("bad --as-of '{raw}'"))?;
                args.as_of = Some(
                    DateTime::from_timestamp(secs, 0)
                        .with_context(|| format!("--as-of out of range: {secs}"))?,
                );
            }
            other => bail!("unknown argument '{other}'"),
        }
    }
    Ok(args)
}

fn parse_agent(raw: &str) -> Result<B256> {
    B256::from_str(raw).with_context(|| format!("bad agent id '{raw}'"))
}

// ─── Main ───────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&raw)?;

    let config_path =
        std::env::var("TRUST_ORACLE_CONFIG").unwrap_or_else(|_| "trust-oracle.toml".to_string());
    let config = if Path::new(&config_path).exists() {
        Config::load(Path::new(&config_path))?
    } else {
        Config::from_env()?
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    let store = Store::open(&config.store.path)
        .with_context(|| format!("opening store at {}", config.store.path))?;

    if let Some(agent) = args.reset_retries {
        store.reset_oracle_retries(agent)?;
        println!("oracle retries reset for {agent:#x}");
        return Ok(());
    }

    let engine = ScoringEngine::new(
        store,
        config.scoring.clone(),
        Arc::new(PipelineMetrics::new()),
    );
    let now = Utc::now();
    let as_of = args.as_of.unwrap_or(now);

    match args.agent {
        Some(agent) => {
            let score = engine.recompute(agent, as_of, now)?;
            println!("{}", serde_json::to_string_pretty(&score)?);
        }
        None => {
            let summary = engine.recompute_all(as_of, now).await?;
            println!(
                "recomputed {} agents as of {}: {} scored, {} without feedback, {} failed",
                summary.agents,
                as_of.to_rfc3339(),
                summary.scored,
                summary.unscored,
                summary.failed
            );
            if summary.failed > 0 {
                bail!("{} recomputations failed", summary.failed);
            }
        }
    }
    Ok(())
}
