//! The streaming coherence engine: scoring, rolling statistics, anomaly
//! detection, pattern grouping, alerting, and the sharded runtime that
//! ties them together.

pub mod alerts;
pub mod anomaly;
pub mod calculator;
pub mod patterns;
pub mod queue;
pub mod rolling;
pub mod shard;
pub mod stats;

pub use shard::{DrainReport, Engine, EngineHandles, IngestError};
