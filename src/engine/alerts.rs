//! Alert emission with per-(symbol, type) deduplication.
//!
//! Cooldowns are measured in event time (tick timestamps), not wall clock,
//! so a replayed stream produces the same alert set as the live run. The
//! sink is never awaited on the hot path: a full channel drops the alert
//! and bumps a counter instead of stalling tick processing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::stats::EngineCounters;
use crate::models::{Alert, AlertSeverity, AlertType, AnomalyResult, PatternLabel};

pub struct AlertEmitter {
    config: Arc<EngineConfig>,
    last_emitted: HashMap<(String, AlertType), DateTime<Utc>>,
    sink: mpsc::Sender<Alert>,
    counters: Arc<EngineCounters>,
}

impl AlertEmitter {
    pub fn new(
        config: Arc<EngineConfig>,
        sink: mpsc::Sender<Alert>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            config,
            last_emitted: HashMap::new(),
            sink,
            counters,
        }
    }

    /// Emit unless the same (symbol, type) fired within its cooldown.
    /// Returns true when the alert passed deduplication.
    pub fn maybe_emit(&mut self, alert: Alert) -> bool {
        let cooldown = ChronoDuration::from_std(self.config.cooldown_for(alert.alert_type))
            .unwrap_or_else(|_| ChronoDuration::seconds(600));
        let key = (alert.symbol.clone(), alert.alert_type);

        if let Some(last) = self.last_emitted.get(&key) {
            if alert.timestamp - *last < cooldown {
                debug!(
                    symbol = %alert.symbol,
                    alert_type = alert.alert_type.as_str(),
                    "alert suppressed by cooldown"
                );
                self.counters.record_alert_suppressed();
                return false;
            }
        }

        // The cooldown clock restarts even if the sink is full: the alert
        // was decided, delivery is best-effort.
        self.last_emitted.insert(key, alert.timestamp);
        self.counters.record_alert_emitted();

        if let Err(mpsc::error::TrySendError::Full(alert)) = self.sink.try_send(alert) {
            warn!(
                symbol = %alert.symbol,
                alert_type = alert.alert_type.as_str(),
                "alert sink full, dropping alert"
            );
            self.counters.record_alert_dropped();
        }
        true
    }

    /// Severity from how far the worst z-score sits past the threshold.
    pub fn anomaly_severity(&self, anomaly: &AnomalyResult) -> AlertSeverity {
        let worst = [anomaly.psi, anomaly.rho, anomaly.q, anomaly.f]
            .iter()
            .filter_map(|a| a.z_score())
            .map(f64::abs)
            .fold(0.0_f64, f64::max);
        let ratio = worst / self.config.z_score_threshold;
        if ratio >= 2.0 {
            AlertSeverity::Critical
        } else if ratio >= 1.5 {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        }
    }

    pub fn spike_severity(&self, psi: f64) -> AlertSeverity {
        if psi > 0.97 {
            AlertSeverity::Critical
        } else {
            AlertSeverity::High
        }
    }

    pub fn pattern_severity(&self, label: PatternLabel) -> AlertSeverity {
        match label {
            PatternLabel::HighCoherence => AlertSeverity::High,
            _ => AlertSeverity::Medium,
        }
    }
}
