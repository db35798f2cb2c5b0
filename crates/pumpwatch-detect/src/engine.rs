//! ---
//! pw_section: "12-detection"
//! pw_subsection: "09-engine"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Per-sample orchestration of windows, detectors and aggregation."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use pumpwatch_metrics::DetectionMetrics;
use pumpwatch_msg::{AlertEvent, TelemetrySample};
use tracing::{debug, warn};

use crate::adaptive::AdaptiveDetector;
use crate::aggregator::AlertAggregator;
use crate::combination::CombinationDetector;
use crate::config::DetectorConfig;
use crate::threshold::ThresholdDetector;
use crate::window::TelemetryBuffer;

/// Sample time in seconds since the epoch, microsecond resolution.
pub fn sample_time_sec(sample: &TelemetrySample) -> f64 {
    sample.ts.timestamp_micros() as f64 / 1_000_000.0
}

/// Streaming detector for any number of assets.
///
/// Samples of one asset must arrive in emission order. A timestamp that
/// goes backwards is taken as a restarted run and clears that asset.
pub struct DetectionEngine {
    config: DetectorConfig,
    buffer: TelemetryBuffer,
    thresholds: ThresholdDetector,
    adaptive: AdaptiveDetector,
    combinations: CombinationDetector,
    aggregator: Arc<AlertAggregator>,
    metrics: Option<DetectionMetrics>,
    last_seen: HashMap<String, f64>,
}

impl DetectionEngine {
    pub fn new(config: DetectorConfig, aggregator: Arc<AlertAggregator>) -> Self {
        let spans = config.clone();
        Self {
            buffer: TelemetryBuffer::new(move |signal| spans.window_sec(signal)),
            thresholds: ThresholdDetector::new(config.thresholds.clone()),
            adaptive: AdaptiveDetector::new(config.adaptive.clone()),
            combinations: CombinationDetector::new(config.combinations.clone()),
            config,
            aggregator,
            metrics: None,
            last_seen: HashMap::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: DetectionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Arc<AlertAggregator> {
        &self.aggregator
    }

    pub fn buffer(&self) -> &TelemetryBuffer {
        &self.buffer
    }

    pub fn adaptive(&self) -> &AdaptiveDetector {
        &self.adaptive
    }

    /// Run every detector over one sample and return the alert it raised.
    pub fn process(&mut self, sample: &TelemetrySample) -> Option<AlertEvent> {
        let asset_id = sample.asset_id.as_str();
        let t = sample_time_sec(sample);
        if self.last_seen.get(asset_id).is_some_and(|&last| t < last) {
            warn!(asset_id, "telemetry timestamp went backwards, resetting detector state");
            self.reset_asset(asset_id);
        }
        self.last_seen.insert(asset_id.to_owned(), t);
        if let Some(metrics) = &self.metrics {
            metrics.record_sample();
        }

        let mut breaches = Vec::new();
        for (signal, value) in sample.signals.iter() {
            if !value.is_finite() {
                debug!(asset_id, %signal, "skipping non-finite reading");
                continue;
            }
            let window = self.buffer.ingest(asset_id, signal, value, t);
            breaches.extend(self.thresholds.evaluate(asset_id, signal, value, t, window));
            breaches.extend(self.adaptive.evaluate(asset_id, signal, value, t, window));
        }
        breaches.extend(self.combinations.evaluate(asset_id, t, &self.buffer));

        self.aggregator
            .submit(sample.ts, &sample.plant_id, asset_id, breaches)
    }

    /// Forget windows, baselines, breach states and cooldowns of `asset_id`.
    pub fn reset_asset(&mut self, asset_id: &str) {
        self.buffer.reset_asset(asset_id);
        self.thresholds.reset_asset(asset_id);
        self.adaptive.reset_asset(asset_id);
        self.combinations.reset_asset(asset_id);
        self.aggregator.reset_asset(asset_id);
        self.last_seen.remove(asset_id);
    }
}
