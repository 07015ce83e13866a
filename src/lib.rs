//! Streaming market coherence engine.
//!
//! Scores ticks on four bounded dimensions (ψ, ρ, q, f), tracks rolling
//! per-symbol statistics, flags z-score anomalies, groups tick-level
//! pattern labels into intervals, and emits deduplicated alerts. Work is
//! sharded by symbol so per-symbol processing stays single-threaded and
//! deterministic.

pub mod config;
pub mod engine;
pub mod models;

pub use config::EngineConfig;
pub use engine::{DrainReport, Engine, EngineHandles, IngestError};
