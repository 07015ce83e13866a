//! Engine configuration.
//!
//! Loaded from a TOML file, overridable from the environment. Validation is
//! fail-fast: a bad configuration (weights that do not sum to 1.0, zero
//! capacities) is the only fatal error class in this crate; everything after
//! startup is recovered locally.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Weights for the composite coherence score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompositeWeights {
    pub psi: f64,
    pub rho: f64,
    pub q: f64,
    pub f: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            psi: 0.3,
            rho: 0.3,
            q: 0.2,
            f: 0.2,
        }
    }
}

impl CompositeWeights {
    pub fn sum(&self) -> f64 {
        self.psi + self.rho + self.q + self.f
    }
}

/// Retention policy for per-symbol rolling history. The two modes are
/// mutually exclusive; pick one per deployment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HistoryWindow {
    /// Keep the last `count` ticks.
    Ticks { count: usize },
    /// Keep ticks newer than `secs` relative to the newest tick's timestamp.
    Duration { secs: u64 },
}

impl Default for HistoryWindow {
    fn default() -> Self {
        HistoryWindow::Ticks { count: 500 }
    }
}

/// Thresholds for the pattern classifier, evaluated in fixed order:
/// high/low composite first, then the named dimension spikes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PatternThresholds {
    pub high_coherence: f64,
    pub low_coherence: f64,
    pub psi_rho_spike: f64,
    pub quantum_spike: f64,
    pub flow_spike: f64,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            high_coherence: 0.7,
            low_coherence: 0.3,
            psi_rho_spike: 0.8,
            quantum_spike: 0.9,
            flow_spike: 0.85,
        }
    }
}

/// Per-type cooldown windows, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlertCooldowns {
    pub anomaly_secs: u64,
    pub pattern_secs: u64,
    pub spike_secs: u64,
}

impl Default for AlertCooldowns {
    fn default() -> Self {
        Self {
            anomaly_secs: 600,
            pattern_secs: 900,
            spike_secs: 600,
        }
    }
}

/// What a producer does when a shard queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Producer awaits until a slot frees up.
    Block,
    /// Evict the oldest queued tick and count it as dropped.
    DropOldest,
}

// Scalar fields come before the nested sections so the struct serializes
// to valid TOML as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_samples_for_anomaly: u64,
    pub z_score_threshold: f64,
    pub min_pattern_run_length: usize,
    /// ψ level above which a COHERENCE_SPIKE alert fires.
    pub coherence_spike_threshold: f64,
    pub num_shards: usize,
    pub shard_queue_capacity: usize,
    pub backpressure_policy: BackpressurePolicy,
    /// A shard with no traffic for this long closes its open intervals.
    pub pattern_idle_flush_secs: u64,
    pub record_channel_capacity: usize,
    pub alert_channel_capacity: usize,
    pub composite_weights: CompositeWeights,
    pub history_window: HistoryWindow,
    pub pattern: PatternThresholds,
    pub alert_cooldown: AlertCooldowns,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_samples_for_anomaly: 20,
            z_score_threshold: 3.0,
            min_pattern_run_length: 3,
            coherence_spike_threshold: 0.9,
            num_shards: 4,
            shard_queue_capacity: 1024,
            backpressure_policy: BackpressurePolicy::Block,
            pattern_idle_flush_secs: 60,
            record_channel_capacity: 4096,
            alert_channel_capacity: 256,
            composite_weights: CompositeWeights::default(),
            history_window: HistoryWindow::default(),
            pattern: PatternThresholds::default(),
            alert_cooldown: AlertCooldowns::default(),
        }
    }
}

impl EngineConfig {
    /// Load defaults, apply a TOML file if `ENGINE_CONFIG` points at one,
    /// then apply environment overrides. Validates before returning.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match std::env::var("ENGINE_CONFIG") {
            Ok(path) => Self::from_toml_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse engine config {}", path.display()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("ENGINE_NUM_SHARDS") {
            self.num_shards = v;
        }
        if let Some(v) = env_parse::<usize>("ENGINE_SHARD_QUEUE_CAPACITY") {
            self.shard_queue_capacity = v;
        }
        if let Some(v) = env_parse::<f64>("ENGINE_ZSCORE_THRESHOLD") {
            self.z_score_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("ENGINE_MIN_SAMPLES") {
            self.min_samples_for_anomaly = v;
        }
        if let Some(v) = env_parse::<usize>("ENGINE_MIN_PATTERN_RUN") {
            self.min_pattern_run_length = v;
        }
        if let Some(v) = env_parse::<u64>("ENGINE_HISTORY_TICKS") {
            self.history_window = HistoryWindow::Ticks { count: v as usize };
        }
        if let Some(v) = env_parse::<u64>("ENGINE_HISTORY_SECS") {
            self.history_window = HistoryWindow::Duration { secs: v };
        }
        if let Ok(v) = std::env::var("ENGINE_BACKPRESSURE") {
            match v.as_str() {
                "block" => self.backpressure_policy = BackpressurePolicy::Block,
                "drop_oldest" => self.backpressure_policy = BackpressurePolicy::DropOldest,
                other => tracing::warn!(value = other, "unknown ENGINE_BACKPRESSURE, ignoring"),
            }
        }
    }

    /// Fail-fast validation, called once before the engine starts.
    pub fn validate(&self) -> Result<()> {
        let w = &self.composite_weights;
        if (w.sum() - 1.0).abs() > 1e-9 {
            bail!("composite weights must sum to 1.0, got {}", w.sum());
        }
        for (name, value) in [("psi", w.psi), ("rho", w.rho), ("q", w.q), ("f", w.f)] {
            if !(0.0..=1.0).contains(&value) {
                bail!("composite weight {} out of [0,1]: {}", name, value);
            }
        }
        if self.z_score_threshold <= 0.0 {
            bail!("z_score_threshold must be positive");
        }
        if self.min_samples_for_anomaly < 2 {
            bail!("min_samples_for_anomaly must be at least 2");
        }
        if self.min_pattern_run_length == 0 {
            bail!("min_pattern_run_length must be at least 1");
        }
        if self.num_shards == 0 {
            bail!("num_shards must be at least 1");
        }
        if self.shard_queue_capacity == 0
            || self.record_channel_capacity == 0
            || self.alert_channel_capacity == 0
        {
            bail!("queue and channel capacities must be non-zero");
        }
        match self.history_window {
            HistoryWindow::Ticks { count } if count == 0 => {
                bail!("history_window tick count must be non-zero")
            }
            HistoryWindow::Duration { secs } if secs == 0 => {
                bail!("history_window duration must be non-zero")
            }
            _ => {}
        }
        if self.pattern.high_coherence <= self.pattern.low_coherence {
            bail!(
                "high_coherence threshold ({}) must exceed low_coherence ({})",
                self.pattern.high_coherence,
                self.pattern.low_coherence
            );
        }
        Ok(())
    }

    pub fn cooldown_for(&self, alert_type: crate::models::AlertType) -> Duration {
        use crate::models::AlertType;
        let secs = match alert_type {
            AlertType::MarketAnomaly => self.alert_cooldown.anomaly_secs,
            AlertType::PatternDetected => self.alert_cooldown.pattern_secs,
            AlertType::CoherenceSpike => self.alert_cooldown.spike_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn pattern_idle_flush(&self) -> Duration {
        Duration::from_secs(self.pattern_idle_flush_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_bad_weights_are_fatal() {
        let mut config = EngineConfig::default();
        config.composite_weights.psi = 0.5; // sum = 1.2
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_is_fatal() {
        let mut config = EngineConfig::default();
        config.shard_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_pattern_thresholds_are_fatal() {
        let mut config = EngineConfig::default();
        config.pattern.high_coherence = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&raw).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.history_window, HistoryWindow::Ticks { count: 500 });
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
z_score_threshold = 2.5
min_pattern_run_length = 5

[history_window]
mode = "duration"
secs = 7200

[composite_weights]
psi = 0.4
rho = 0.4
q = 0.1
f = 0.1
"#
        )
        .unwrap();

        let config = EngineConfig::from_toml_file(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.z_score_threshold, 2.5);
        assert_eq!(config.min_pattern_run_length, 5);
        assert_eq!(config.history_window, HistoryWindow::Duration { secs: 7200 });
        assert_eq!(config.composite_weights.psi, 0.4);
        // Untouched fields keep their defaults
        assert_eq!(config.min_samples_for_anomaly, 20);
    }
}
