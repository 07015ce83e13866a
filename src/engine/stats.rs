//! Engine-wide counters.
//!
//! Lock-free atomics shared across shards, mirrored into the `metrics`
//! recorder so an exporter can be attached without touching the hot path.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;

#[derive(Debug, Default)]
pub struct EngineCounters {
    ticks_ingested: AtomicU64,
    ticks_processed: AtomicU64,
    /// Evicted from a full shard queue under drop_oldest.
    ticks_dropped: AtomicU64,
    /// Thrown away unprocessed during a shutdown drain timeout.
    ticks_discarded: AtomicU64,
    /// Refused at ingest after shutdown began.
    ticks_rejected: AtomicU64,
    alerts_emitted: AtomicU64,
    alerts_suppressed: AtomicU64,
    alerts_dropped: AtomicU64,
    records_dropped: AtomicU64,
    intervals_closed: AtomicU64,
    intervals_discarded: AtomicU64,
}

impl EngineCounters {
    pub fn record_tick_ingested(&self) {
        self.ticks_ingested.fetch_add(1, Ordering::Relaxed);
        counter!("coherence_ticks_ingested_total", 1);
    }

    pub fn record_tick_processed(&self) {
        self.ticks_processed.fetch_add(1, Ordering::Relaxed);
        counter!("coherence_ticks_processed_total", 1);
    }

    pub fn record_ticks_dropped(&self, n: u64) {
        if n > 0 {
            self.ticks_dropped.fetch_add(n, Ordering::Relaxed);
            counter!("coherence_ticks_dropped_total", n);
        }
    }

    pub fn record_ticks_discarded(&self, n: u64) {
        if n > 0 {
            self.ticks_discarded.fetch_add(n, Ordering::Relaxed);
            counter!("coherence_ticks_discarded_total", n);
        }
    }

    pub fn record_tick_rejected(&self) {
        self.ticks_rejected.fetch_add(1, Ordering::Relaxed);
        counter!("coherence_ticks_rejected_total", 1);
    }

    pub fn record_alert_emitted(&self) {
        self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
        counter!("coherence_alerts_emitted_total", 1);
    }

    pub fn record_alert_suppressed(&self) {
        self.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
        counter!("coherence_alerts_suppressed_total", 1);
    }

    pub fn record_alert_dropped(&self) {
        self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
        counter!("coherence_alerts_dropped_total", 1);
    }

    pub fn record_record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
        counter!("coherence_records_dropped_total", 1);
    }

    pub fn record_interval_closed(&self) {
        self.intervals_closed.fetch_add(1, Ordering::Relaxed);
        counter!("coherence_intervals_closed_total", 1);
    }

    pub fn record_interval_discarded(&self) {
        self.intervals_discarded.fetch_add(1, Ordering::Relaxed);
        counter!("coherence_intervals_discarded_total", 1);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            ticks_ingested: self.ticks_ingested.load(Ordering::Relaxed),
            ticks_processed: self.ticks_processed.load(Ordering::Relaxed),
            ticks_dropped: self.ticks_dropped.load(Ordering::Relaxed),
            ticks_discarded: self.ticks_discarded.load(Ordering::Relaxed),
            ticks_rejected: self.ticks_rejected.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            intervals_closed: self.intervals_closed.load(Ordering::Relaxed),
            intervals_discarded: self.intervals_discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CountersSnapshot {
    pub ticks_ingested: u64,
    pub ticks_processed: u64,
    pub ticks_dropped: u64,
    pub ticks_discarded: u64,
    pub ticks_rejected: u64,
    pub alerts_emitted: u64,
    pub alerts_suppressed: u64,
    pub alerts_dropped: u64,
    pub records_dropped: u64,
    pub intervals_closed: u64,
    pub intervals_discarded: u64,
}
