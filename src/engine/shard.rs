//! Sharded engine runtime.
//!
//! Symbols are hashed onto a fixed set of shards; each shard is a single
//! tokio task that exclusively owns the per-symbol state for the symbols
//! it serves. There is no locking on the hot path: all cross-shard data is
//! either immutable config or atomic counters.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::alerts::AlertEmitter;
use crate::engine::anomaly::AnomalyDetector;
use crate::engine::calculator::CoherenceCalculator;
use crate::engine::patterns::{ClosedRun, PatternClassifier, RunGrouper};
use crate::engine::queue::{RecvOutcome, ShardQueue};
use crate::engine::rolling::RollingWindow;
use crate::engine::stats::{CountersSnapshot, EngineCounters};
use crate::models::{Alert, AlertType, EngineRecord, ScoredTick, Tick};

/// All mutable state for one symbol. Owned by exactly one shard.
struct SymbolState {
    rolling: RollingWindow,
    runs: RunGrouper,
}

struct ShardWorker {
    id: usize,
    config: Arc<EngineConfig>,
    queue: Arc<ShardQueue<Tick>>,
    symbols: HashMap<String, SymbolState>,
    calculator: CoherenceCalculator,
    detector: AnomalyDetector,
    classifier: PatternClassifier,
    emitter: AlertEmitter,
    records: mpsc::Sender<EngineRecord>,
    counters: Arc<EngineCounters>,
    discard: Arc<AtomicBool>,
}

impl ShardWorker {
    async fn run(mut self) {
        debug!(shard = self.id, "shard worker started");
        loop {
            if self.discard.load(Ordering::Acquire) {
                let n = self.queue.discard_remaining();
                self.counters.record_ticks_discarded(n);
                break;
            }
            match self.queue.recv(self.config.pattern_idle_flush()).await {
                RecvOutcome::Item(tick) => self.process(tick),
                RecvOutcome::Idle => self.flush_open_runs(),
                RecvOutcome::Closed => break,
            }
        }
        // Close whatever runs are still open so the final intervals reach
        // the output channel.
        self.flush_open_runs();
        debug!(shard = self.id, symbols = self.symbols.len(), "shard worker stopped");
    }

    fn process(&mut self, tick: Tick) {
        let state = self
            .symbols
            .entry(tick.symbol.clone())
            .or_insert_with(|| SymbolState {
                rolling: RollingWindow::new(self.config.history_window),
                runs: RunGrouper::new(tick.symbol.clone(), self.config.min_pattern_run_length),
            });

        // Score against the stats as they stood BEFORE this tick, then fold
        // the tick in and judge anomalies against the updated stats.
        let prior = state.rolling.snapshot();
        let score = self.calculator.score(&tick, &prior);
        let stats = state.rolling.update(&tick, &score);
        let anomaly = self.detector.classify(&score, &stats);
        let label = self.classifier.label(&score);
        let closed = state.runs.push(tick.timestamp, &score, label);

        if let Some(closed) = closed {
            self.handle_closed_run(closed);
        }

        if anomaly.is_anomalous() {
            let severity = self.emitter.anomaly_severity(&anomaly);
            let alert = Alert::new(
                AlertType::MarketAnomaly,
                severity,
                &tick.symbol,
                tick.timestamp,
                json!({ "score": &score, "anomaly": &anomaly }),
            );
            self.emitter.maybe_emit(alert);
        }

        if score.psi > self.config.coherence_spike_threshold {
            let severity = self.emitter.spike_severity(score.psi);
            let alert = Alert::new(
                AlertType::CoherenceSpike,
                severity,
                &tick.symbol,
                tick.timestamp,
                json!({ "psi": score.psi, "composite": score.composite }),
            );
            self.emitter.maybe_emit(alert);
        }

        self.forward(EngineRecord::Score(ScoredTick {
            symbol: tick.symbol,
            timestamp: tick.timestamp,
            price: tick.price,
            volume: tick.volume,
            score,
            label,
            anomaly,
        }));
        self.counters.record_tick_processed();
    }

    fn handle_closed_run(&mut self, closed: ClosedRun) {
        match closed {
            ClosedRun::Kept(interval) => {
                self.counters.record_interval_closed();
                if interval.label != crate::models::PatternLabel::Normal {
                    let severity = self.emitter.pattern_severity(interval.label);
                    let alert = Alert::new(
                        AlertType::PatternDetected,
                        severity,
                        &interval.symbol,
                        interval.ended_at,
                        json!({
                            "label": interval.label,
                            "tick_count": interval.tick_count,
                            "started_at": interval.started_at,
                        }),
                    );
                    self.emitter.maybe_emit(alert);
                }
                self.forward(EngineRecord::Pattern(interval));
            }
            ClosedRun::Discarded { label, tick_count } => {
                debug!(
                    shard = self.id,
                    label = label.as_str(),
                    tick_count,
                    "run below minimum length discarded"
                );
                self.counters.record_interval_discarded();
            }
        }
    }

    fn flush_open_runs(&mut self) {
        let closed: Vec<ClosedRun> = self
            .symbols
            .values_mut()
            .filter_map(|state| state.runs.flush())
            .collect();
        for run in closed {
            self.handle_closed_run(run);
        }
    }

    fn forward(&self, record: EngineRecord) {
        if self.records.try_send(record).is_err() {
            warn!(shard = self.id, "record channel full, dropping record");
            self.counters.record_record_dropped();
        }
    }
}

/// Receiving ends of the engine's two output streams.
pub struct EngineHandles {
    pub records: mpsc::Receiver<EngineRecord>,
    pub alerts: mpsc::Receiver<Alert>,
}

#[derive(Debug, Clone, Copy)]
pub struct DrainReport {
    /// Ticks thrown away unprocessed because the drain deadline passed.
    pub discarded_ticks: u64,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestError {
    /// Shutdown has begun; no new ticks are accepted.
    ShuttingDown,
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::ShuttingDown => write!(f, "engine is shutting down"),
        }
    }
}

impl std::error::Error for IngestError {}

/// The sharded coherence engine.
pub struct Engine {
    config: Arc<EngineConfig>,
    queues: Vec<Arc<ShardQueue<Tick>>>,
    counters: Arc<EngineCounters>,
    accepting: AtomicBool,
    discard: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Validate the config, spawn one worker task per shard, and hand back
    /// the engine plus the output channel receivers.
    pub fn new(config: EngineConfig) -> Result<(Self, EngineHandles)> {
        config.validate()?;
        let config = Arc::new(config);
        let counters = Arc::new(EngineCounters::default());
        let discard = Arc::new(AtomicBool::new(false));

        let (record_tx, record_rx) = mpsc::channel(config.record_channel_capacity);
        let (alert_tx, alert_rx) = mpsc::channel(config.alert_channel_capacity);

        let mut queues = Vec::with_capacity(config.num_shards);
        let mut workers = Vec::with_capacity(config.num_shards);
        for id in 0..config.num_shards {
            let queue = Arc::new(ShardQueue::new(
                config.shard_queue_capacity,
                config.backpressure_policy,
            ));
            queues.push(Arc::clone(&queue));

            let worker = ShardWorker {
                id,
                config: Arc::clone(&config),
                queue,
                symbols: HashMap::new(),
                calculator: CoherenceCalculator::new(config.composite_weights),
                detector: AnomalyDetector::new(
                    config.z_score_threshold,
                    config.min_samples_for_anomaly,
                ),
                classifier: PatternClassifier::new(config.pattern),
                emitter: AlertEmitter::new(
                    Arc::clone(&config),
                    alert_tx.clone(),
                    Arc::clone(&counters),
                ),
                records: record_tx.clone(),
                counters: Arc::clone(&counters),
                discard: Arc::clone(&discard),
            };
            workers.push(tokio::spawn(worker.run()));
        }

        info!(
            shards = config.num_shards,
            queue_capacity = config.shard_queue_capacity,
            policy = ?config.backpressure_policy,
            "coherence engine started"
        );

        Ok((
            Self {
                config,
                queues,
                counters,
                accepting: AtomicBool::new(true),
                discard,
                workers,
            },
            EngineHandles {
                records: record_rx,
                alerts: alert_rx,
            },
        ))
    }

    /// Route one tick to its symbol's shard. Under the blocking backpressure
    /// policy this awaits queue space.
    pub async fn ingest(&self, tick: Tick) -> Result<(), IngestError> {
        if !self.accepting.load(Ordering::Acquire) {
            self.counters.record_tick_rejected();
            return Err(IngestError::ShuttingDown);
        }
        let shard = shard_for(&tick.symbol, self.queues.len());
        match self.queues[shard].push(tick).await {
            Ok(evicted) => {
                self.counters.record_ticks_dropped(evicted);
                self.counters.record_tick_ingested();
                Ok(())
            }
            Err(_) => {
                self.counters.record_tick_rejected();
                Err(IngestError::ShuttingDown)
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Stop accepting ticks, drain the shard queues, and join the workers.
    /// Anything still queued when the deadline passes is discarded and
    /// counted in the report.
    pub async fn shutdown(mut self, drain_timeout: Duration) -> DrainReport {
        info!("🛑 draining coherence engine");
        self.accepting.store(false, Ordering::Release);
        for queue in &self.queues {
            queue.close();
        }

        let deadline = tokio::time::Instant::now() + drain_timeout;
        let mut pending = Vec::new();
        let mut timed_out = false;

        for (id, mut handle) in self.workers.drain(..).enumerate() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    timed_out = true;
                    pending.push((id, handle));
                }
            }
        }

        if !pending.is_empty() {
            warn!(
                shards = pending.len(),
                "drain deadline passed, discarding queued ticks"
            );
            self.discard.store(true, Ordering::Release);
            for (id, handle) in pending {
                if handle.await.is_err() {
                    warn!(shard = id, "shard worker panicked during drain");
                }
            }
        }

        let snap = self.counters.snapshot();
        info!(
            processed = snap.ticks_processed,
            discarded = snap.ticks_discarded,
            "✅ coherence engine drained"
        );
        DrainReport {
            discarded_ticks: snap.ticks_discarded,
            timed_out,
        }
    }
}

fn shard_for(symbol: &str, num_shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    symbol.hash(&mut hasher);
    (hasher.finish() % num_shards as u64) as usize
}
