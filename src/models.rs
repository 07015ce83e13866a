//! Core value types shared across the engine pipeline.
//!
//! Everything here is an immutable value passed by move/copy between stages.
//! Per-symbol mutable state lives inside the shard that owns the symbol, never
//! in these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four coherence dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// ψ, internal consistency
    Psi,
    /// ρ, accumulated trend/volume correlation
    Rho,
    /// q, activation/energy
    Q,
    /// f, frequency/social signal
    F,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [Dimension::Psi, Dimension::Rho, Dimension::Q, Dimension::F];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Psi => "psi",
            Dimension::Rho => "rho",
            Dimension::Q => "q",
            Dimension::F => "f",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Dimension::Psi => 0,
            Dimension::Rho => 1,
            Dimension::Q => 2,
            Dimension::F => 3,
        }
    }
}

/// A raw market tick as delivered by the ingestion adapter.
///
/// Carries the raw signal inputs the calculator needs; the engine never
/// fetches data itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    /// Source (exchange) time; monotonic per symbol.
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: u64,
    /// Short-term volatility proxy (recent stddev / mean of price).
    pub volatility: f64,
    /// Fractional price change over the short lookback.
    pub momentum: f64,
    /// Trend-strength proxy (|regression slope| / mean price).
    pub trend_strength: f64,
    /// Optional sentiment in [-1, 1]; momentum is used as proxy when absent.
    pub sentiment: Option<f64>,
}

/// A bounded four-dimensional coherence score plus weighted composite.
///
/// Constructed only by the calculator; every value is clamped to [0, 1] at
/// construction so downstream stages can rely on the bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceScore {
    pub psi: f64,
    pub rho: f64,
    pub q: f64,
    pub f: f64,
    pub composite: f64,
    /// Dimensions that could not be computed (zero/undefined denominator)
    /// and were substituted with 0.0.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<Dimension>,
}

impl CoherenceScore {
    pub fn dim(&self, d: Dimension) -> f64 {
        match d {
            Dimension::Psi => self.psi,
            Dimension::Rho => self.rho,
            Dimension::Q => self.q,
            Dimension::F => self.f,
        }
    }

    /// Euclidean magnitude of the four dimensions, normalized to [0, 1].
    pub fn coherence_magnitude(&self) -> f64 {
        let m = (self.psi * self.psi + self.rho * self.rho + self.q * self.q + self.f * self.f)
            .sqrt()
            / 2.0;
        m.clamp(0.0, 1.0)
    }

    pub fn is_degraded(&self, d: Dimension) -> bool {
        self.degraded.contains(&d)
    }
}

/// Classifier label for a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternLabel {
    HighCoherence,
    LowCoherence,
    PsiRhoSpike,
    QuantumSpike,
    FlowSpike,
    Normal,
}

impl PatternLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternLabel::HighCoherence => "HIGH_COHERENCE",
            PatternLabel::LowCoherence => "LOW_COHERENCE",
            PatternLabel::PsiRhoSpike => "PSI_RHO_SPIKE",
            PatternLabel::QuantumSpike => "QUANTUM_SPIKE",
            PatternLabel::FlowSpike => "FLOW_SPIKE",
            PatternLabel::Normal => "NORMAL",
        }
    }
}

/// A contiguous run of ticks sharing one classifier label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternInterval {
    pub symbol: String,
    pub label: PatternLabel,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub tick_count: usize,
    pub avg_psi: f64,
    pub avg_rho: f64,
    pub avg_q: f64,
    pub avg_f: f64,
}

/// Verdict for a single dimension from the anomaly detector.
///
/// `InsufficientData` is distinct from `Normal` on purpose: callers must be
/// able to tell "no baseline yet" apart from "observed and unremarkable".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DimensionAssessment {
    Anomalous { z: f64 },
    Normal { z: f64 },
    InsufficientData,
}

impl DimensionAssessment {
    pub fn is_anomalous(&self) -> bool {
        matches!(self, DimensionAssessment::Anomalous { .. })
    }

    pub fn z_score(&self) -> Option<f64> {
        match self {
            DimensionAssessment::Anomalous { z } | DimensionAssessment::Normal { z } => Some(*z),
            DimensionAssessment::InsufficientData => None,
        }
    }
}

/// Full anomaly verdict for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub psi: DimensionAssessment,
    pub rho: DimensionAssessment,
    pub q: DimensionAssessment,
    pub f: DimensionAssessment,
    /// Mean of |z| over eligible dimensions; None when every dimension
    /// reported insufficient data.
    pub combined: Option<f64>,
}

impl AnomalyResult {
    pub fn dim(&self, d: Dimension) -> DimensionAssessment {
        match d {
            Dimension::Psi => self.psi,
            Dimension::Rho => self.rho,
            Dimension::Q => self.q,
            Dimension::F => self.f,
        }
    }

    pub fn is_anomalous(&self) -> bool {
        Dimension::ALL.iter().any(|d| self.dim(*d).is_anomalous())
    }

    pub fn insufficient_data(&self) -> bool {
        self.combined.is_none()
    }
}

/// Alert types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    CoherenceSpike,
    MarketAnomaly,
    PatternDetected,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::CoherenceSpike => "COHERENCE_SPIKE",
            AlertType::MarketAnomaly => "MARKET_ANOMALY",
            AlertType::PatternDetected => "PATTERN_DETECTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A deduplicated alert, terminal once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub symbol: String,
    pub dedup_key: String,
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the triggering scores/stats.
    pub payload: serde_json::Value,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        symbol: &str,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: format!(
                "{}_{}_{}",
                symbol,
                alert_type.as_str().to_lowercase(),
                timestamp.timestamp_millis()
            ),
            alert_type,
            severity,
            symbol: symbol.to_string(),
            dedup_key: format!("{}:{}", symbol, alert_type.as_str()),
            timestamp,
            payload,
        }
    }
}

/// Per-tick output record: the score, its label, and the anomaly verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTick {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: u64,
    pub score: CoherenceScore,
    pub label: PatternLabel,
    pub anomaly: AnomalyResult,
}

/// Records produced on the engine output channel, one `Score` per processed
/// tick plus a `Pattern` whenever an interval closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineRecord {
    Score(ScoredTick),
    Pattern(PatternInterval),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coherence_magnitude_bounds() {
        let score = CoherenceScore {
            psi: 1.0,
            rho: 1.0,
            q: 1.0,
            f: 1.0,
            composite: 1.0,
            degraded: Vec::new(),
        };
        assert!((score.coherence_magnitude() - 1.0).abs() < 1e-12);

        let zero = CoherenceScore {
            psi: 0.0,
            rho: 0.0,
            q: 0.0,
            f: 0.0,
            composite: 0.0,
            degraded: Vec::new(),
        };
        assert_eq!(zero.coherence_magnitude(), 0.0);
    }

    #[test]
    fn test_alert_dedup_key_is_symbol_and_type() {
        let alert = Alert::new(
            AlertType::MarketAnomaly,
            AlertSeverity::High,
            "AAPL",
            Utc::now(),
            serde_json::json!({}),
        );
        assert_eq!(alert.dedup_key, "AAPL:MARKET_ANOMALY");
    }

    #[test]
    fn test_assessment_distinguishes_no_data_from_normal() {
        let no_data = DimensionAssessment::InsufficientData;
        assert!(!no_data.is_anomalous());
        assert_eq!(no_data.z_score(), None);

        let normal = DimensionAssessment::Normal { z: 0.4 };
        assert_eq!(normal.z_score(), Some(0.4));
    }
}
