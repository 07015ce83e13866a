//! Z-score anomaly detection over rolling per-dimension statistics.
//!
//! A dimension with too few samples or zero variance is reported as
//! insufficient data, never as "not anomalous": callers must be able to
//! distinguish an empty baseline from a genuinely normal observation.

use crate::engine::rolling::RollingStatsSnapshot;
use crate::models::{AnomalyResult, CoherenceScore, Dimension, DimensionAssessment};

pub struct AnomalyDetector {
    z_score_threshold: f64,
    min_samples: u64,
}

impl AnomalyDetector {
    pub fn new(z_score_threshold: f64, min_samples: u64) -> Self {
        Self {
            z_score_threshold,
            min_samples,
        }
    }

    /// Classify one score against the updated rolling statistics.
    pub fn classify(&self, score: &CoherenceScore, stats: &RollingStatsSnapshot) -> AnomalyResult {
        let assess = |d: Dimension| -> DimensionAssessment {
            let s = stats.dim(d);
            if s.count < self.min_samples || s.std_dev == 0.0 {
                return DimensionAssessment::InsufficientData;
            }
            let z = (score.dim(d) - s.mean) / s.std_dev;
            if z.abs() > self.z_score_threshold {
                DimensionAssessment::Anomalous { z }
            } else {
                DimensionAssessment::Normal { z }
            }
        };

        let psi = assess(Dimension::Psi);
        let rho = assess(Dimension::Rho);
        let q = assess(Dimension::Q);
        let f = assess(Dimension::F);

        let zs: Vec<f64> = [psi, rho, q, f]
            .iter()
            .filter_map(|a| a.z_score())
            .map(f64::abs)
            .collect();
        let combined = if zs.is_empty() {
            None
        } else {
            Some(zs.iter().sum::<f64>() / zs.len() as f64)
        };

        AnomalyResult {
            psi,
            rho,
            q,
            f,
            combined,
        }
    }
}
