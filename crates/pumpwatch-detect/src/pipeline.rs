//! ---
//! pw_section: "12-detection"
//! pw_subsection: "10-pipeline"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Async consumer feeding bus telemetry into the detection engine."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use pumpwatch_msg::{ControlAction, Payload, Subscription};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::DetectionEngine;

/// Counters returned when the pipeline stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub samples: u64,
    pub alerts: u64,
    pub resets: u64,
}

/// Consume telemetry and control messages until `shutdown` flips to true
/// or the subscription closes. Messages already queued when shutdown is
/// requested are still processed.
///
/// The subscription should cover `TopicKind::Telemetry` and
/// `TopicKind::Control`; alert messages are ignored.
pub async fn run(
    mut engine: DetectionEngine,
    mut subscription: Subscription,
    mut shutdown: watch::Receiver<bool>,
) -> (DetectionEngine, PipelineReport) {
    let mut report = PipelineReport::default();
    info!("detection pipeline started");
    loop {
        let message = tokio::select! {
            biased;
            message = subscription.recv() => match message {
                Some(message) => message,
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        match message.payload {
            Payload::Telemetry(sample) => {
                report.samples += 1;
                if engine.process(&sample).is_some() {
                    report.alerts += 1;
                }
            }
            Payload::Control(event) if event.action == ControlAction::Reset => {
                debug!(asset_id = %event.asset_id, "clearing detector state");
                engine.reset_asset(&event.asset_id);
                report.resets += 1;
            }
            Payload::Control(_) | Payload::Alert(_) => {}
        }
    }
    info!(
        samples = report.samples,
        alerts = report.alerts,
        "detection pipeline stopped"
    );
    (engine, report)
}

pub fn spawn(
    engine: DetectionEngine,
    subscription: Subscription,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<(DetectionEngine, PipelineReport)> {
    tokio::spawn(run(engine, subscription, shutdown))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use pumpwatch_msg::{
        ControlEvent, GroundTruth, InMemoryTransport, MessageBus, SignalReadings, TelemetrySample,
        TopicKind,
    };

    use super::*;
    use crate::aggregator::AlertAggregator;
    use crate::config::DetectorConfig;

    fn sample(secs: i64, flow: f64) -> TelemetrySample {
        TelemetrySample {
            ts: Utc.timestamp_opt(1_714_521_600 + secs, 0).unwrap(),
            plant_id: "plant01".into(),
            asset_id: "pump01".into(),
            signals: SignalReadings::from_array([4.41, flow, 34.1, 63.2, 2.0, 2950.0, 38.5, 60.0]),
            truth: GroundTruth::healthy(),
            warnings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn consumes_until_shutdown_and_publishes_alerts() {
        let memory = Arc::new(InMemoryTransport::new());
        let input = memory.subscribe(&[TopicKind::Telemetry, TopicKind::Control]);
        let mut alerts = memory.subscribe(&[TopicKind::Alerts]);
        let mut bus = MessageBus::new();
        bus.register_transport(memory);
        let bus = Arc::new(bus);

        let aggregator = Arc::new(AlertAggregator::default().with_bus(bus.clone()));
        let engine = DetectionEngine::new(DetectorConfig::default(), aggregator);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn(engine, input, stop_rx);

        for s in 0..30 {
            bus.publish_telemetry(sample(s, if s < 5 { 100.0 } else { 60.0 }))
                .unwrap();
        }
        bus.publish_control(ControlEvent {
            ts: Utc::now(),
            asset_id: "pump01".into(),
            action: ControlAction::Reset,
            scenario: None,
        })
        .unwrap();

        stop_tx.send(true).unwrap();
        let (engine, report) = handle.await.unwrap();
        assert_eq!(report.samples, 30);
        assert_eq!(report.alerts, 1);
        assert_eq!(report.resets, 1);
        assert!(engine.buffer().is_empty());

        let published = alerts.drain();
        assert_eq!(published.len(), 1);
        assert!(matches!(published[0].payload, Payload::Alert(ref e) if e.asset_id == "pump01"));
    }
}
