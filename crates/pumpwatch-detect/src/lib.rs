//! ---
//! pw_section: "12-detection"
//! pw_subsection: "01-bootstrap"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Streaming anomaly detection over pump telemetry."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
//! Streaming detection for pumpwatch telemetry.
//!
//! Each sample is pushed into per-signal sliding windows, scored by the
//! static [`ThresholdDetector`], the baseline-relative [`AdaptiveDetector`]
//! and the multi-signal [`CombinationDetector`]. Every condition passes
//! through its own [`Hysteresis`] so that only sustained breaches surface,
//! and the [`AlertAggregator`] applies cooldown before publishing.

pub mod adaptive;
pub mod aggregator;
pub mod combination;
pub mod config;
pub mod engine;
pub mod evaluation;
pub mod hysteresis;
pub mod pipeline;
pub mod threshold;
pub mod window;

pub use adaptive::{AdaptiveDetector, Baseline};
pub use aggregator::{AlertAck, AlertAggregator, ManualAlert, DEFAULT_COOLDOWN};
pub use combination::CombinationDetector;
pub use config::{
    AdaptiveRule, CombinationRule, Comparison, Condition, DetectorConfig, DetectorConfigError,
    Direction, ThresholdRule, DEFAULT_WINDOW_SEC,
};
pub use engine::{sample_time_sec, DetectionEngine};
pub use evaluation::{evaluate, episodes, AssetEvaluation, Episode, EvaluationReport};
pub use hysteresis::{AlertState, Breach, Hysteresis, Transition};
pub use pipeline::PipelineReport;
pub use threshold::ThresholdDetector;
pub use window::{TelemetryBuffer, Window};
