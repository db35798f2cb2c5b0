//! ---
//! pw_section: "12-detection"
//! pw_subsection: "05-threshold"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Static bound detector with per-signal hysteresis."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};

use pumpwatch_msg::{AlertDetail, AlertEvidence, DetectionMethod, SignalKind};

use crate::config::ThresholdRule;
use crate::hysteresis::{Breach, Hysteresis};
use crate::window::Window;

/// Compares each reading against its signal's static bounds.
#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    rules: BTreeMap<SignalKind, ThresholdRule>,
    states: HashMap<(String, SignalKind), Hysteresis>,
}

impl ThresholdDetector {
    pub fn new(rules: BTreeMap<SignalKind, ThresholdRule>) -> Self {
        Self {
            rules,
            states: HashMap::new(),
        }
    }

    pub fn rule(&self, signal: SignalKind) -> Option<&ThresholdRule> {
        self.rules.get(&signal)
    }

    /// Feed the reading `value` taken at `t`; `window` already contains it.
    pub fn evaluate(
        &mut self,
        asset_id: &str,
        signal: SignalKind,
        value: f64,
        t: f64,
        window: &Window,
    ) -> Option<Breach> {
        let rule = self.rules.get(&signal)?;
        let state = self
            .states
            .entry((asset_id.to_owned(), signal))
            .or_insert_with(|| Hysteresis::new(rule.min_duration_sec, rule.recovery_sec));

        let level = state.update(t, rule.classify(value))?.alert_level()?;
        let evidence = AlertEvidence {
            value: Some(value),
            threshold: Some(rule.bound(level, value)),
            mean: window.mean(),
            std: window.std(),
            slope: window.slope(),
            duration_sec: Some(state.held_sec(t)),
            ..AlertEvidence::default()
        };
        Some(Breach {
            key: signal.to_string(),
            severity: level,
            detail: AlertDetail {
                signal: signal.to_string(),
                score: value,
                method: DetectionMethod::Threshold,
                window_sec: window.span_sec().round() as u32,
                evidence,
            },
        })
    }

    pub fn reset_asset(&mut self, asset_id: &str) {
        self.states.retain(|(asset, _), _| asset != asset_id);
    }
}
