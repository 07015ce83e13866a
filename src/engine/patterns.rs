//! Pattern classification and run grouping.
//!
//! Labels each tick from its score, then merges consecutive same-label ticks
//! into pattern intervals. Classification order is fixed (composite
//! high/low first, then the named dimension spikes) so a tick matching
//! several conditions always resolves the same way.

use chrono::{DateTime, Utc};

use crate::config::PatternThresholds;
use crate::models::{CoherenceScore, PatternInterval, PatternLabel};

pub struct PatternClassifier {
    thresholds: PatternThresholds,
}

impl PatternClassifier {
    pub fn new(thresholds: PatternThresholds) -> Self {
        Self { thresholds }
    }

    /// Pure label function. Tie-break order is fixed and load-bearing.
    pub fn label(&self, score: &CoherenceScore) -> PatternLabel {
        let t = &self.thresholds;
        if score.composite > t.high_coherence {
            PatternLabel::HighCoherence
        } else if score.composite < t.low_coherence {
            PatternLabel::LowCoherence
        } else if score.psi > t.psi_rho_spike && score.rho > t.psi_rho_spike {
            PatternLabel::PsiRhoSpike
        } else if score.q > t.quantum_spike {
            PatternLabel::QuantumSpike
        } else if score.f > t.flow_spike {
            PatternLabel::FlowSpike
        } else {
            PatternLabel::Normal
        }
    }
}

/// Outcome of closing a run: either a pattern interval worth reporting, or
/// a noise-length run that was filtered out.
#[derive(Debug, Clone)]
pub enum ClosedRun {
    Kept(PatternInterval),
    Discarded {
        label: PatternLabel,
        tick_count: usize,
    },
}

#[derive(Debug)]
struct OpenRun {
    label: PatternLabel,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    tick_count: usize,
    dim_sums: [f64; 4],
}

/// Groups consecutive same-label ticks for a single symbol into intervals.
/// Owned by the shard that processes the symbol.
#[derive(Debug)]
pub struct RunGrouper {
    symbol: String,
    min_run_length: usize,
    open: Option<OpenRun>,
}

impl RunGrouper {
    pub fn new(symbol: impl Into<String>, min_run_length: usize) -> Self {
        Self {
            symbol: symbol.into(),
            min_run_length,
            open: None,
        }
    }

    /// Feed one labeled tick. Returns the previous run when the label
    /// changed and that run just closed.
    pub fn push(
        &mut self,
        timestamp: DateTime<Utc>,
        score: &CoherenceScore,
        label: PatternLabel,
    ) -> Option<ClosedRun> {
        let mut closed = None;

        match &mut self.open {
            Some(run) if run.label == label => {
                run.ended_at = timestamp;
                run.tick_count += 1;
                run.dim_sums[0] += score.psi;
                run.dim_sums[1] += score.rho;
                run.dim_sums[2] += score.q;
                run.dim_sums[3] += score.f;
            }
            _ => {
                closed = self.flush();
                self.open = Some(OpenRun {
                    label,
                    started_at: timestamp,
                    ended_at: timestamp,
                    tick_count: 1,
                    dim_sums: [score.psi, score.rho, score.q, score.f],
                });
            }
        }

        closed
    }

    /// Close the open run, if any. Called on label change, idle flush, and
    /// at drain.
    pub fn flush(&mut self) -> Option<ClosedRun> {
        let run = self.open.take()?;
        if run.tick_count < self.min_run_length {
            return Some(ClosedRun::Discarded {
                label: run.label,
                tick_count: run.tick_count,
            });
        }

        let n = run.tick_count as f64;
        Some(ClosedRun::Kept(PatternInterval {
            symbol: self.symbol.clone(),
            label: run.label,
            started_at: run.started_at,
            ended_at: run.ended_at,
            tick_count: run.tick_count,
            avg_psi: run.dim_sums[0] / n,
            avg_rho: run.dim_sums[1] / n,
            avg_q: run.dim_sums[2] / n,
            avg_f: run.dim_sums[3] / n,
        }))
    }

    pub fn has_open_run(&self) -> bool {
        self.open.is_some()
    }
}
