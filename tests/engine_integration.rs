//! End-to-end tests for the sharded coherence engine: synthetic tick
//! streams in, scored records, pattern intervals, and alerts out.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use coherence_engine::models::{
    AlertType, DimensionAssessment, EngineRecord, PatternLabel, ScoredTick, Tick,
};
use coherence_engine::{Engine, EngineConfig, EngineHandles};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Tick engineered so psi = exp(-2*volatility) ≈ 0.85, rho = 0.85,
/// f = 0.6 from sentiment, q = 0.5 at steady volume. Composite 0.73,
/// which classifies as HIGH_COHERENCE.
fn high_coherence_tick(symbol: &str, secs: i64) -> Tick {
    Tick {
        symbol: symbol.to_string(),
        timestamp: ts(secs),
        price: 100.0,
        volume: 1_000,
        volatility: -(0.85f64.ln()) / 2.0,
        momentum: 0.0,
        trend_strength: 0.085,
        sentiment: Some(0.2),
    }
}

/// Near-zero volatility pushes psi above the 0.9 spike threshold.
fn spike_tick(symbol: &str, secs: i64) -> Tick {
    Tick {
        volatility: 0.001,
        ..high_coherence_tick(symbol, secs)
    }
}

async fn drain_outputs(
    mut handles: EngineHandles,
) -> (Vec<ScoredTick>, Vec<coherence_engine::models::PatternInterval>, Vec<coherence_engine::models::Alert>) {
    let mut scores = Vec::new();
    let mut intervals = Vec::new();
    while let Some(record) = handles.records.recv().await {
        match record {
            EngineRecord::Score(s) => scores.push(s),
            EngineRecord::Pattern(p) => intervals.push(p),
        }
    }
    let mut alerts = Vec::new();
    while let Some(alert) = handles.alerts.recv().await {
        alerts.push(alert);
    }
    (scores, intervals, alerts)
}

#[tokio::test]
async fn test_sustained_high_coherence_yields_one_interval_and_one_alert() {
    let (engine, handles) = Engine::new(EngineConfig::default()).unwrap();

    for i in 0..25 {
        engine.ingest(high_coherence_tick("AAPL", i)).await.unwrap();
    }
    let report = engine.shutdown(Duration::from_secs(5)).await;
    assert!(!report.timed_out);
    assert_eq!(report.discarded_ticks, 0);

    let (scores, intervals, alerts) = drain_outputs(handles).await;

    assert_eq!(scores.len(), 25);
    for scored in &scores {
        assert_eq!(scored.label, PatternLabel::HighCoherence);
        assert!((scored.score.composite - 0.73).abs() < 0.02);
    }

    // One contiguous run, closed at drain
    assert_eq!(intervals.len(), 1);
    let interval = &intervals[0];
    assert_eq!(interval.symbol, "AAPL");
    assert_eq!(interval.label, PatternLabel::HighCoherence);
    assert_eq!(interval.tick_count, 25);
    assert_eq!(interval.started_at, ts(0));
    assert_eq!(interval.ended_at, ts(24));

    // One pattern alert for the run, deduplicated
    let pattern_alerts: Vec<_> = alerts
        .iter()
        .filter(|a| a.alert_type == AlertType::PatternDetected)
        .collect();
    assert_eq!(pattern_alerts.len(), 1);
}

#[tokio::test]
async fn test_warmup_reports_insufficient_data_not_normal() {
    let (engine, handles) = Engine::new(EngineConfig::default()).unwrap();

    for i in 0..5 {
        engine.ingest(high_coherence_tick("TSLA", i)).await.unwrap();
    }
    engine.shutdown(Duration::from_secs(5)).await;

    let (scores, _, alerts) = drain_outputs(handles).await;
    assert_eq!(scores.len(), 5);
    for scored in &scores {
        assert_eq!(scored.anomaly.psi, DimensionAssessment::InsufficientData);
        assert!(scored.anomaly.insufficient_data());
    }
    assert!(
        !alerts.iter().any(|a| a.alert_type == AlertType::MarketAnomaly),
        "no anomaly alerts before the baseline exists"
    );
}

#[tokio::test]
async fn test_coherence_spike_alert_respects_cooldown() {
    let (engine, handles) = Engine::new(EngineConfig::default()).unwrap();

    // 30 spiking ticks one second apart, well inside the 600s cooldown
    for i in 0..30 {
        engine.ingest(spike_tick("NVDA", i)).await.unwrap();
    }
    // One more past the cooldown window
    engine.ingest(spike_tick("NVDA", 601)).await.unwrap();
    engine.shutdown(Duration::from_secs(5)).await;

    let (_, _, alerts) = drain_outputs(handles).await;
    let spikes: Vec<_> = alerts
        .iter()
        .filter(|a| a.alert_type == AlertType::CoherenceSpike)
        .collect();
    assert_eq!(spikes.len(), 2);
    assert_eq!(spikes[0].timestamp, ts(0));
    assert_eq!(spikes[1].timestamp, ts(601));
}

#[tokio::test]
async fn test_per_symbol_records_preserve_ingest_order() {
    let (engine, handles) = Engine::new(EngineConfig::default()).unwrap();
    let symbols = ["AAPL", "TSLA", "NVDA", "MSFT", "AMZN"];

    for i in 0..40 {
        for symbol in symbols {
            engine.ingest(high_coherence_tick(symbol, i)).await.unwrap();
        }
    }
    let report = engine.shutdown(Duration::from_secs(5)).await;
    assert_eq!(report.discarded_ticks, 0);

    let (scores, _, _) = drain_outputs(handles).await;
    assert_eq!(scores.len(), 40 * symbols.len());

    for symbol in symbols {
        let times: Vec<_> = scores
            .iter()
            .filter(|s| s.symbol == symbol)
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(times.len(), 40);
        assert!(
            times.windows(2).all(|w| w[0] < w[1]),
            "{symbol} records out of order"
        );
    }
}

#[tokio::test]
async fn test_graceful_drain_processes_everything() {
    let config = EngineConfig {
        num_shards: 2,
        ..EngineConfig::default()
    };
    let (engine, handles) = Engine::new(config).unwrap();

    for i in 0..200 {
        engine.ingest(high_coherence_tick("AAPL", i)).await.unwrap();
        engine.ingest(high_coherence_tick("TSLA", i)).await.unwrap();
    }
    assert_eq!(engine.counters().ticks_ingested, 400);

    let report = engine.shutdown(Duration::from_secs(10)).await;
    assert!(!report.timed_out);
    assert_eq!(report.discarded_ticks, 0);

    let snapshot = drain_outputs(handles).await;
    assert_eq!(snapshot.0.len(), 400);
}

#[tokio::test]
async fn test_volatility_regime_break_raises_anomaly_alert() {
    let config = EngineConfig {
        min_samples_for_anomaly: 10,
        ..EngineConfig::default()
    };
    let (engine, handles) = Engine::new(config).unwrap();

    // Stable baseline with mild jitter so variance is non-zero
    for i in 0..60 {
        let mut tick = high_coherence_tick("AAPL", i);
        tick.volatility += (i % 5) as f64 * 0.002;
        tick.sentiment = Some(0.2 + (i % 3) as f64 * 0.01);
        engine.ingest(tick).await.unwrap();
    }
    // Regime break: volatility explodes, psi collapses toward zero
    let mut shock = high_coherence_tick("AAPL", 60);
    shock.volatility = 2.0;
    engine.ingest(shock).await.unwrap();
    engine.shutdown(Duration::from_secs(5)).await;

    let (scores, _, alerts) = drain_outputs(handles).await;
    let last = scores.last().unwrap();
    assert!(last.anomaly.psi.is_anomalous(), "psi verdict: {:?}", last.anomaly.psi);
    assert!(alerts.iter().any(|a| a.alert_type == AlertType::MarketAnomaly));
}
