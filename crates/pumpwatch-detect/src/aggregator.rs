//! ---
//! pw_section: "12-detection"
//! pw_subsection: "08-aggregation"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Cooldown, grouping and publication of alert events."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pumpwatch_common::time::seconds_between;
use pumpwatch_metrics::DetectionMetrics;
use pumpwatch_msg::{
    AlertDetail, AlertEvent, AlertEvidence, DetectionMethod, MessageBus, Severity,
    DEFAULT_PLANT_ID,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hysteresis::Breach;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Operator-supplied alert for the manual trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualAlert {
    pub asset_id: String,
    #[serde(default)]
    pub plant_id: Option<String>,
    pub signal: String,
    pub severity: Severity,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub method: Option<DetectionMethod>,
}

impl ManualAlert {
    pub fn into_event(self, ts: DateTime<Utc>) -> AlertEvent {
        AlertEvent {
            ts,
            plant_id: self.plant_id.unwrap_or_else(|| DEFAULT_PLANT_ID.to_owned()),
            asset_id: self.asset_id,
            severity: self.severity,
            alerts: vec![AlertDetail {
                signal: self.signal,
                score: self.score,
                method: self.method.unwrap_or(DetectionMethod::Manual),
                window_sec: 0,
                evidence: AlertEvidence::default(),
            }],
            alert_id: None,
        }
    }
}

/// Receipt for a manually triggered alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertAck {
    pub alert_id: Uuid,
    pub asset_id: String,
    pub severity: Severity,
    /// False when the bus rejected the event; it is still counted.
    pub published: bool,
}

#[derive(Debug, Clone, Copy)]
struct LastEmitted {
    ts: DateTime<Utc>,
    severity: Severity,
}

/// Turns breaches into published [`AlertEvent`]s.
///
/// Shared between the detection pipeline and the control surface, so all
/// methods take `&self`.
pub struct AlertAggregator {
    cooldown_sec: f64,
    bus: Option<Arc<MessageBus>>,
    metrics: Option<DetectionMetrics>,
    last: Mutex<HashMap<(String, String), LastEmitted>>,
}

impl AlertAggregator {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown_sec: cooldown.as_secs_f64(),
            bus: None,
            metrics: None,
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_metrics(mut self, metrics: DetectionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_sec)
    }

    /// Apply cooldown to the breaches of one sample and emit what survives
    /// as a single event.
    pub fn submit(
        &self,
        ts: DateTime<Utc>,
        plant_id: &str,
        asset_id: &str,
        breaches: Vec<Breach>,
    ) -> Option<AlertEvent> {
        if breaches.is_empty() {
            return None;
        }

        let mut kept = Vec::with_capacity(breaches.len());
        {
            let mut last = self.last.lock();
            for breach in breaches {
                let key = (asset_id.to_owned(), breach.key.clone());
                let suppressed = last.get(&key).is_some_and(|prev| {
                    let elapsed = seconds_between(prev.ts, ts);
                    elapsed >= 0.0 && elapsed < self.cooldown_sec && breach.severity <= prev.severity
                });
                if suppressed {
                    debug!(asset_id, key = %breach.key, severity = %breach.severity, "alert suppressed by cooldown");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_suppressed();
                    }
                    continue;
                }
                last.insert(
                    key,
                    LastEmitted {
                        ts,
                        severity: breach.severity,
                    },
                );
                kept.push(breach);
            }
        }

        let severity = kept.iter().map(|b| b.severity).max()?;
        let event = AlertEvent {
            ts,
            plant_id: plant_id.to_owned(),
            asset_id: asset_id.to_owned(),
            severity,
            alerts: kept.into_iter().map(|b| b.detail).collect(),
            alert_id: Some(Uuid::new_v4()),
        };
        self.emit(&event);
        Some(event)
    }

    /// Publish `event` immediately, bypassing cooldown. Every detail is
    /// marked as manually triggered.
    pub fn trigger_alert(&self, mut event: AlertEvent) -> AlertAck {
        let alert_id = *event.alert_id.get_or_insert_with(Uuid::new_v4);
        for detail in &mut event.alerts {
            detail.evidence.manual_trigger = true;
        }
        info!(asset_id = %event.asset_id, %alert_id, severity = %event.severity, "manual alert triggered");
        let published = self.emit(&event);
        AlertAck {
            alert_id,
            asset_id: event.asset_id,
            severity: event.severity,
            published,
        }
    }

    /// Forget cooldown history for `asset_id`.
    pub fn reset_asset(&self, asset_id: &str) {
        self.last.lock().retain(|(asset, _), _| asset != asset_id);
    }

    fn emit(&self, event: &AlertEvent) -> bool {
        if let Some(metrics) = &self.metrics {
            for detail in &event.alerts {
                metrics.record_alert(event.severity.as_ref(), detail.method.as_ref());
            }
        }
        info!(
            asset_id = %event.asset_id,
            severity = %event.severity,
            details = event.alerts.len(),
            "alert raised"
        );
        let Some(bus) = &self.bus else {
            return true;
        };
        match bus.publish_alert(event.clone()) {
            Ok(_) => true,
            Err(err) => {
                warn!(asset_id = %event.asset_id, error = %err, "alert publish failed");
                false
            }
        }
    }
}

impl Default for AlertAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pumpwatch_msg::{InMemoryTransport, Payload, TopicKind};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_521_600 + secs, 0).unwrap()
    }

    fn breach(key: &str, severity: Severity) -> Breach {
        Breach {
            key: key.to_owned(),
            severity,
            detail: AlertDetail {
                signal: key.to_owned(),
                score: 1.0,
                method: DetectionMethod::Threshold,
                window_sec: 30,
                evidence: AlertEvidence::default(),
            },
        }
    }

    #[test]
    fn cooldown_suppresses_repeats_but_not_escalation() {
        let agg = AlertAggregator::new(Duration::from_secs(60));
        let first = agg.submit(at(0), "plant01", "pump01", vec![breach("flow_m3h", Severity::Warning)]);
        assert!(first.is_some());
        assert!(agg
            .submit(at(30), "plant01", "pump01", vec![breach("flow_m3h", Severity::Warning)])
            .is_none());
        let escalated = agg
            .submit(at(31), "plant01", "pump01", vec![breach("flow_m3h", Severity::Critical)])
            .unwrap();
        assert_eq!(escalated.severity, Severity::Critical);
        assert!(agg
            .submit(at(95), "plant01", "pump01", vec![breach("flow_m3h", Severity::Warning)])
            .is_some());
    }

    #[test]
    fn cooldown_is_per_asset_and_signal() {
        let agg = AlertAggregator::default();
        agg.submit(at(0), "plant01", "pump01", vec![breach("flow_m3h", Severity::Warning)]);
        assert!(agg
            .submit(at(1), "plant01", "pump02", vec![breach("flow_m3h", Severity::Warning)])
            .is_some());
        assert!(agg
            .submit(at(1), "plant01", "pump01", vec![breach("rpm", Severity::Warning)])
            .is_some());
        agg.reset_asset("pump01");
        assert!(agg
            .submit(at(2), "plant01", "pump01", vec![breach("flow_m3h", Severity::Warning)])
            .is_some());
    }

    #[test]
    fn same_sample_details_are_grouped() {
        let agg = AlertAggregator::default();
        let event = agg
            .submit(
                at(0),
                "plant01",
                "pump01",
                vec![
                    breach("flow_m3h", Severity::Warning),
                    breach("pressure_bar", Severity::Critical),
                ],
            )
            .unwrap();
        assert_eq!(event.alerts.len(), 2);
        assert_eq!(event.severity, Severity::Critical);
        assert!(event.alert_id.is_some());
    }

    #[test]
    fn manual_trigger_publishes_marked_event() {
        let memory = Arc::new(InMemoryTransport::new());
        let mut alerts = memory.subscribe(&[TopicKind::Alerts]);
        let mut bus = MessageBus::new();
        bus.register_transport(memory);
        let agg = AlertAggregator::default().with_bus(Arc::new(bus));

        let manual = ManualAlert {
            asset_id: "pump01".into(),
            plant_id: None,
            signal: "vibration_rms".into(),
            severity: Severity::Critical,
            score: 5.0,
            method: None,
        };
        let ack = agg.trigger_alert(manual.clone().into_event(at(0)));
        assert!(ack.published);
        // A second trigger right away is not subject to cooldown.
        let again = agg.trigger_alert(manual.into_event(at(1)));
        assert_ne!(again.alert_id, ack.alert_id);

        let published = alerts.drain();
        assert_eq!(published.len(), 2);
        let Payload::Alert(event) = &published[0].payload else {
            panic!("expected alert payload");
        };
        assert_eq!(event.alert_id, Some(ack.alert_id));
        assert_eq!(event.plant_id, DEFAULT_PLANT_ID);
        assert_eq!(event.alerts[0].method, DetectionMethod::Manual);
        assert!(event.alerts[0].evidence.manual_trigger);
    }
}
