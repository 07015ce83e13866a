//! Coherence score calculation.
//!
//! Pure mapping from one tick plus the symbol's prior rolling context to a
//! bounded four-dimensional score. All numeric edge cases are handled here:
//! a zero or undefined denominator yields 0.0 for that dimension and tags it
//! as degraded instead of producing NaN or panicking.

use crate::config::CompositeWeights;
use crate::engine::rolling::RollingStatsSnapshot;
use crate::models::{CoherenceScore, Dimension, Tick};

/// Guarded ratio: `None` when the denominator is zero or either side is
/// non-finite. Every ratio in the calculator goes through this helper.
#[inline]
pub fn guarded_ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if !numerator.is_finite() || !denominator.is_finite() || denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

pub struct CoherenceCalculator {
    weights: CompositeWeights,
}

impl CoherenceCalculator {
    pub fn new(weights: CompositeWeights) -> Self {
        Self { weights }
    }

    /// Score one tick against the symbol's prior rolling statistics.
    ///
    /// Never panics on degenerate input; dimensions that cannot be computed
    /// come back as 0.0 with a degraded tag. Everything is clamped to [0, 1].
    pub fn score(&self, tick: &Tick, prior: &RollingStatsSnapshot) -> CoherenceScore {
        let mut degraded = Vec::new();

        // ψ, internal consistency: exp(-2 * short-term volatility)
        let psi = if tick.volatility.is_finite() {
            (-2.0 * tick.volatility.max(0.0)).exp()
        } else {
            degraded.push(Dimension::Psi);
            0.0
        };

        // ρ, accumulated trend strength scaled onto [0, 1]
        let rho = if tick.trend_strength.is_finite() {
            tick.trend_strength.abs() * 10.0
        } else {
            degraded.push(Dimension::Rho);
            0.0
        };

        // q: activation from the volume ratio against the rolling mean.
        // No volume history yet means neutral activation, not degraded:
        // the ratio is only degenerate once a mean exists and is zero.
        let q = if prior.volume.count == 0 {
            0.5
        } else {
            match guarded_ratio(tick.volume as f64, prior.volume.mean) {
                Some(ratio) => ((ratio - 1.0).tanh() + 1.0) / 2.0,
                None => {
                    degraded.push(Dimension::Q);
                    0.0
                }
            }
        };

        // f: sentiment when present, otherwise price momentum as proxy
        let f = match tick.sentiment {
            Some(s) if s.is_finite() => (s.clamp(-1.0, 1.0) + 1.0) / 2.0,
            _ => {
                if tick.momentum.is_finite() {
                    ((10.0 * tick.momentum).tanh() + 1.0) / 2.0
                } else {
                    degraded.push(Dimension::F);
                    0.0
                }
            }
        };

        self.build(psi, rho, q, f, degraded)
    }

    fn build(&self, psi: f64, rho: f64, q: f64, f: f64, degraded: Vec<Dimension>) -> CoherenceScore {
        let psi = psi.clamp(0.0, 1.0);
        let rho = rho.clamp(0.0, 1.0);
        let q = q.clamp(0.0, 1.0);
        let f = f.clamp(0.0, 1.0);

        let w = &self.weights;
        let composite = (w.psi * psi + w.rho * rho + w.q * q + w.f * f).clamp(0.0, 1.0);

        CoherenceScore {
            psi,
            rho,
            q,
            f,
            composite,
            degraded,
        }
    }
}
