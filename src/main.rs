//! coherenced - streaming market coherence engine daemon.
//!
//! Runs the sharded engine against a synthetic random-walk tick feed and
//! logs scored records, pattern intervals, and alerts. The feed stands in
//! for a real ingestion adapter; everything downstream of `Engine::ingest`
//! is the production path.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coherence_engine::models::{EngineRecord, Tick};
use coherence_engine::{Engine, EngineConfig, EngineHandles};

#[derive(Parser, Debug)]
#[command(name = "coherenced", about = "Streaming market coherence engine")]
struct Args {
    /// Symbols for the synthetic feed, comma separated
    #[arg(long, value_delimiter = ',', default_value = "AAPL,TSLA,NVDA,MSFT")]
    symbols: Vec<String>,

    /// Ticks to generate per symbol
    #[arg(long, default_value_t = 500)]
    ticks: usize,

    /// Path to an engine config TOML
    #[arg(long, env = "ENGINE_CONFIG")]
    config: Option<String>,

    /// Seconds to wait for queued ticks at shutdown
    #[arg(long, default_value_t = 10)]
    drain_secs: u64,

    /// RNG seed for the synthetic feed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Random-walk price feed that derives the signal inputs the engine
/// expects from its own recent history.
struct SyntheticFeed {
    symbol: String,
    rng: StdRng,
    price: f64,
    history: VecDeque<f64>,
}

impl SyntheticFeed {
    const LOOKBACK: usize = 30;

    fn new(symbol: &str, seed: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            rng: StdRng::seed_from_u64(seed),
            price: 100.0,
            history: VecDeque::with_capacity(Self::LOOKBACK),
        }
    }

    fn next_tick(&mut self, timestamp: DateTime<Utc>) -> Tick {
        self.price *= 1.0 + self.rng.gen_range(-0.01..0.01);
        self.history.push_back(self.price);
        if self.history.len() > Self::LOOKBACK {
            self.history.pop_front();
        }

        let n = self.history.len() as f64;
        let mean = self.history.iter().sum::<f64>() / n;
        let variance = self
            .history
            .iter()
            .map(|p| (p - mean).powi(2))
            .sum::<f64>()
            / n;
        let volatility = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };

        let momentum = self
            .history
            .len()
            .checked_sub(10)
            .and_then(|i| self.history.get(i))
            .map(|past| (self.price - past) / past)
            .unwrap_or(0.0);

        let trend_strength = self
            .history
            .front()
            .filter(|_| self.history.len() >= 2)
            .map(|first| (self.price - first) / (n * mean))
            .unwrap_or(0.0);

        let sentiment = if self.rng.gen_bool(0.2) {
            Some(self.rng.gen_range(-1.0..1.0))
        } else {
            None
        };

        Tick {
            symbol: self.symbol.clone(),
            timestamp,
            price: self.price,
            volume: self.rng.gen_range(500..5_000),
            volatility,
            momentum,
            trend_strength,
            sentiment,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coherence_engine=info,coherenced=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => {
            let config = EngineConfig::from_toml_file(path)?;
            config.validate()?;
            config
        }
        None => EngineConfig::load()?,
    };

    let (engine, handles) = Engine::new(config).context("failed to start engine")?;
    let EngineHandles {
        mut records,
        mut alerts,
    } = handles;

    let record_task = tokio::spawn(async move {
        let mut scores = 0u64;
        let mut patterns = 0u64;
        while let Some(record) = records.recv().await {
            match record {
                EngineRecord::Score(scored) => {
                    scores += 1;
                    debug!(
                        symbol = %scored.symbol,
                        composite = scored.score.composite,
                        label = scored.label.as_str(),
                        "tick scored"
                    );
                }
                EngineRecord::Pattern(interval) => {
                    patterns += 1;
                    info!(
                        symbol = %interval.symbol,
                        label = interval.label.as_str(),
                        ticks = interval.tick_count,
                        "pattern interval closed"
                    );
                }
            }
        }
        (scores, patterns)
    });

    let alert_task = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(alert) = alerts.recv().await {
            count += 1;
            info!(
                symbol = %alert.symbol,
                alert_type = alert.alert_type.as_str(),
                severity = ?alert.severity,
                "🚨 alert"
            );
        }
        count
    });

    let mut feeds: Vec<SyntheticFeed> = args
        .symbols
        .iter()
        .enumerate()
        .map(|(i, symbol)| SyntheticFeed::new(symbol, args.seed.wrapping_add(i as u64)))
        .collect();

    let base = Utc::now();
    for round in 0..args.ticks {
        let timestamp = base + ChronoDuration::seconds(round as i64);
        for feed in &mut feeds {
            let tick = feed.next_tick(timestamp);
            if engine.ingest(tick).await.is_err() {
                break;
            }
        }
    }

    let report = engine.shutdown(Duration::from_secs(args.drain_secs)).await;

    let (scores, patterns) = record_task.await?;
    let alerts = alert_task.await?;
    info!(
        scores,
        patterns,
        alerts,
        discarded = report.discarded_ticks,
        timed_out = report.timed_out,
        "run complete"
    );

    Ok(())
}
