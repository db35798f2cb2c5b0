//! ---
//! pw_section: "12-detection"
//! pw_subsection: "07-combination"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Multi-signal predicate rules sharing the breach state machine."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::collections::HashMap;

use pumpwatch_msg::{AlertDetail, AlertEvidence, DetectionMethod};

use crate::config::CombinationRule;
use crate::hysteresis::{Breach, Hysteresis};
use crate::window::TelemetryBuffer;

#[derive(Debug, Clone)]
pub struct CombinationDetector {
    rules: Vec<CombinationRule>,
    states: HashMap<(String, usize), Hysteresis>,
}

impl CombinationDetector {
    pub fn new(rules: Vec<CombinationRule>) -> Self {
        Self {
            rules,
            states: HashMap::new(),
        }
    }

    pub fn rules(&self) -> &[CombinationRule] {
        &self.rules
    }

    /// Evaluate every rule against the latest value in each signal's window.
    ///
    /// A rule whose signals have not been seen yet counts as not holding.
    pub fn evaluate(&mut self, asset_id: &str, t: f64, buffer: &TelemetryBuffer) -> Vec<Breach> {
        let latest = |signal| {
            buffer
                .window(asset_id, signal)
                .and_then(|w| w.last())
                .map(|(_, value)| value)
        };

        let mut out = Vec::new();
        for (index, rule) in self.rules.iter().enumerate() {
            let holds = rule
                .all
                .iter()
                .all(|c| latest(c.signal).is_some_and(|v| c.holds(v)));
            let state = self
                .states
                .entry((asset_id.to_owned(), index))
                .or_insert_with(|| Hysteresis::new(rule.min_duration_sec, rule.recovery_sec));

            let observed = holds.then_some(rule.severity);
            let Some(level) = state.update(t, observed).and_then(|tr| tr.alert_level()) else {
                continue;
            };

            let score_signal = rule.score_signal();
            let score_window = score_signal.and_then(|s| buffer.window(asset_id, s));
            let value = score_signal.and_then(latest);
            out.push(Breach {
                key: rule.name.clone(),
                severity: level,
                detail: AlertDetail {
                    signal: rule.name.clone(),
                    score: value.unwrap_or_default(),
                    method: DetectionMethod::Combination,
                    window_sec: score_window.map_or(0, |w| w.span_sec().round() as u32),
                    evidence: AlertEvidence {
                        value,
                        mean: score_window.and_then(|w| w.mean()),
                        std: score_window.and_then(|w| w.std()),
                        slope: score_window.and_then(|w| w.slope()),
                        duration_sec: Some(state.held_sec(t)),
                        note: Some(rule.describe()),
                        ..AlertEvidence::default()
                    },
                },
            });
        }
        out
    }

    pub fn reset_asset(&mut self, asset_id: &str) {
        self.states.retain(|(asset, _), _| asset != asset_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use pumpwatch_msg::{Severity, SignalKind};

    fn feed(
        detector: &mut CombinationDetector,
        buffer: &mut TelemetryBuffer,
        t: f64,
        valve: f64,
        flow: f64,
    ) -> Vec<Breach> {
        buffer.ingest("pump01", SignalKind::ValveOpenPct, valve, t);
        buffer.ingest("pump01", SignalKind::FlowM3h, flow, t);
        detector.evaluate("pump01", t, buffer)
    }

    #[test]
    fn mismatch_must_hold_for_the_rule_duration() {
        let mut detector = CombinationDetector::new(DetectorConfig::default().combinations);
        let mut buffer = TelemetryBuffer::new(|_| 10.0);

        let mut fired = Vec::new();
        for i in 0..60 {
            let t = i as f64;
            let (valve, flow) = if i >= 5 { (90.0, 40.0) } else { (60.0, 100.0) };
            for breach in feed(&mut detector, &mut buffer, t, valve, flow) {
                fired.push((t, breach));
            }
        }
        assert_eq!(fired.len(), 1);
        let (t, breach) = &fired[0];
        assert_eq!(*t, 25.0);
        assert_eq!(breach.severity, Severity::Warning);
        assert_eq!(breach.detail.signal, "valve_flow_mismatch");
        assert_eq!(breach.detail.score, 40.0);
        assert_eq!(
            breach.detail.evidence.note.as_deref(),
            Some("valve_open_pct > 80 && flow_m3h < 50")
        );
    }

    #[test]
    fn missing_signal_means_rule_does_not_hold() {
        let mut detector = CombinationDetector::new(DetectorConfig::default().combinations);
        let mut buffer = TelemetryBuffer::new(|_| 10.0);
        for i in 0..60 {
            buffer.ingest("pump01", SignalKind::FlowM3h, 10.0, i as f64);
            assert!(detector.evaluate("pump01", i as f64, &buffer).is_empty());
        }
    }
}
