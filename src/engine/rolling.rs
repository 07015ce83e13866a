//! Per-symbol rolling statistics with bounded history.
//!
//! Uses Welford's online algorithm for numerically stable incremental
//! mean/variance, with an O(1) reverse update on eviction so long streams
//! never trigger a rescan. History is bounded either by tick count or by a
//! wall-clock retention window measured in event time.

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use crate::config::HistoryWindow;
use crate::models::{CoherenceScore, Dimension, Tick};

/// Welford running mean/variance with O(1) add and remove.
#[derive(Debug, Clone, Copy, Default)]
pub struct WelfordStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl WelfordStats {
    #[inline]
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Reverse-Welford: subtract one previously added value.
    #[inline]
    pub fn remove(&mut self, value: f64) {
        match self.count {
            0 => {}
            1 => *self = WelfordStats::default(),
            n => {
                let n1 = (n - 1) as f64;
                let old_mean = (n as f64 * self.mean - value) / n1;
                self.m2 -= (value - self.mean) * (value - old_mean);
                // Floating-point cancellation can leave a tiny negative residue
                self.m2 = self.m2.max(0.0);
                self.mean = old_mean;
                self.count = n - 1;
            }
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation; 0.0 with fewer than two observations.
    #[inline]
    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    fn summary(&self) -> StatsSummary {
        StatsSummary {
            mean: self.mean(),
            std_dev: self.std_dev(),
            count: self.count(),
        }
    }
}

/// Read-only (mean, stddev, count) triple for one tracked series.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub count: u64,
}

/// Owned snapshot of a symbol's rolling statistics. Consumers never see a
/// live reference into the window.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RollingStatsSnapshot {
    pub price: StatsSummary,
    pub volume: StatsSummary,
    pub psi: StatsSummary,
    pub rho: StatsSummary,
    pub q: StatsSummary,
    pub f: StatsSummary,
}

impl RollingStatsSnapshot {
    pub fn dim(&self, d: Dimension) -> &StatsSummary {
        match d {
            Dimension::Psi => &self.psi,
            Dimension::Rho => &self.rho,
            Dimension::Q => &self.q,
            Dimension::F => &self.f,
        }
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    timestamp: DateTime<Utc>,
    price: f64,
    volume: f64,
    dims: [f64; 4],
}

/// Bounded rolling window for a single symbol. Owned exclusively by the
/// shard that processes the symbol's ticks.
#[derive(Debug)]
pub struct RollingWindow {
    window: HistoryWindow,
    price: WelfordStats,
    volume: WelfordStats,
    dims: [WelfordStats; 4],
    history: VecDeque<HistoryEntry>,
}

impl RollingWindow {
    pub fn new(window: HistoryWindow) -> Self {
        let capacity = match window {
            HistoryWindow::Ticks { count } => count,
            HistoryWindow::Duration { .. } => 64,
        };
        Self {
            window,
            price: WelfordStats::default(),
            volume: WelfordStats::default(),
            dims: [WelfordStats::default(); 4],
            history: VecDeque::with_capacity(capacity),
        }
    }

    /// Incorporate one tick and its score, evict anything that fell out of
    /// the window, and return an owned snapshot of the updated statistics.
    pub fn update(&mut self, tick: &Tick, score: &CoherenceScore) -> RollingStatsSnapshot {
        let entry = HistoryEntry {
            timestamp: tick.timestamp,
            price: tick.price,
            volume: tick.volume as f64,
            dims: [score.psi, score.rho, score.q, score.f],
        };

        self.price.add(entry.price);
        self.volume.add(entry.volume);
        for (stats, value) in self.dims.iter_mut().zip(entry.dims) {
            stats.add(value);
        }
        self.history.push_back(entry);

        self.evict();
        self.snapshot()
    }

    fn evict(&mut self) {
        match self.window {
            HistoryWindow::Ticks { count } => {
                while self.history.len() > count {
                    self.pop_oldest();
                }
            }
            HistoryWindow::Duration { secs } => {
                let newest = match self.history.back() {
                    Some(entry) => entry.timestamp,
                    None => return,
                };
                let cutoff = newest - ChronoDuration::seconds(secs as i64);
                while self
                    .history
                    .front()
                    .is_some_and(|entry| entry.timestamp <= cutoff)
                {
                    self.pop_oldest();
                }
            }
        }
    }

    fn pop_oldest(&mut self) {
        if let Some(old) = self.history.pop_front() {
            self.price.remove(old.price);
            self.volume.remove(old.volume);
            for (stats, value) in self.dims.iter_mut().zip(old.dims) {
                stats.remove(value);
            }
        }
    }

    pub fn snapshot(&self) -> RollingStatsSnapshot {
        RollingStatsSnapshot {
            price: self.price.summary(),
            volume: self.volume.summary(),
            psi: self.dims[0].summary(),
            rho: self.dims[1].summary(),
            q: self.dims[2].summary(),
            f: self.dims[3].summary(),
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
