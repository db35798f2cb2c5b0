//! ---
//! pw_section: "12-detection"
//! pw_subsection: "06-adaptive"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Baseline-relative z-score and trend detection."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};

use pumpwatch_msg::{AlertDetail, AlertEvidence, DetectionMethod, Severity, SignalKind};

use crate::config::AdaptiveRule;
use crate::hysteresis::{Breach, Hysteresis};
use crate::window::Window;

/// Slowly moving reference level of one signal.
///
/// The first `warmup_sec` seconds are averaged exactly. After that the
/// baseline is locked and follows an exponentially weighted mean whose
/// half-life is `half_life_sec`. Samples further than `gate_z` deviations
/// from the baseline are not absorbed, so a developing fault does not
/// drag the reference along with it.
#[derive(Debug, Clone)]
pub struct Baseline {
    warmup_sec: f64,
    half_life_sec: f64,
    gate_z: f64,
    started: Option<f64>,
    last_t: Option<f64>,
    n: u64,
    sum: f64,
    sum_sq: f64,
    mean: f64,
    var: f64,
    locked: bool,
}

impl Baseline {
    pub fn new(warmup_sec: f64, half_life_sec: f64, gate_z: f64) -> Self {
        Self {
            warmup_sec,
            half_life_sec,
            gate_z,
            started: None,
            last_t: None,
            n: 0,
            sum: 0.0,
            sum_sq: 0.0,
            mean: 0.0,
            var: 0.0,
            locked: false,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn mean(&self) -> Option<f64> {
        self.locked.then_some(self.mean)
    }

    pub fn std(&self) -> Option<f64> {
        self.locked.then(|| self.var.max(0.0).sqrt())
    }

    pub fn update(&mut self, t: f64, x: f64) {
        let started = *self.started.get_or_insert(t);
        if !self.locked && t - started >= self.warmup_sec && self.n > 0 {
            self.lock();
        }

        if self.locked {
            let dt = self.last_t.map_or(0.0, |last| (t - last).max(0.0));
            let diff = x - self.mean;
            let std = self.var.max(0.0).sqrt();
            if diff.abs() <= self.gate_z * std {
                let alpha = 1.0 - 0.5_f64.powf(dt / self.half_life_sec);
                self.mean += alpha * diff;
                self.var = (1.0 - alpha) * (self.var + alpha * diff * diff);
            }
        } else {
            self.n += 1;
            self.sum += x;
            self.sum_sq += x * x;
        }
        self.last_t = Some(t);
    }

    fn lock(&mut self) {
        let n = self.n as f64;
        self.mean = self.sum / n;
        self.var = if self.n > 1 {
            ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0)).max(0.0)
        } else {
            0.0
        };
        self.locked = true;
    }
}

#[derive(Debug, Clone)]
struct SignalState {
    baseline: Baseline,
    z: Hysteresis,
    slope: Hysteresis,
}

impl SignalState {
    fn new(rule: &AdaptiveRule) -> Self {
        Self {
            baseline: Baseline::new(rule.warmup_sec, rule.baseline_window_sec, rule.z_warning),
            z: Hysteresis::new(rule.min_duration_sec, rule.recovery_sec),
            slope: Hysteresis::new(rule.min_duration_sec, rule.recovery_sec),
        }
    }
}

/// Scores the short window against an adaptive baseline, and its trend
/// against slope limits.
#[derive(Debug, Clone)]
pub struct AdaptiveDetector {
    rules: BTreeMap<SignalKind, AdaptiveRule>,
    states: HashMap<(String, SignalKind), SignalState>,
}

impl AdaptiveDetector {
    pub fn new(rules: BTreeMap<SignalKind, AdaptiveRule>) -> Self {
        Self {
            rules,
            states: HashMap::new(),
        }
    }

    pub fn baseline(&self, asset_id: &str, signal: SignalKind) -> Option<&Baseline> {
        self.states
            .get(&(asset_id.to_owned(), signal))
            .map(|s| &s.baseline)
    }

    /// Feed the reading `value` taken at `t`; `window` already contains it.
    pub fn evaluate(
        &mut self,
        asset_id: &str,
        signal: SignalKind,
        value: f64,
        t: f64,
        window: &Window,
    ) -> Vec<Breach> {
        let Some(rule) = self.rules.get(&signal) else {
            return Vec::new();
        };
        let state = self
            .states
            .entry((asset_id.to_owned(), signal))
            .or_insert_with(|| SignalState::new(rule));

        let baseline_mean = state.baseline.mean();
        let baseline_std = state.baseline.std();
        let z = match (window.mean(), baseline_mean, baseline_std) {
            (Some(mean), Some(b_mean), Some(b_std)) if b_std > 0.0 => Some((mean - b_mean) / b_std),
            _ => None,
        };
        state.baseline.update(t, value);

        let slope = window
            .slope()
            .filter(|_| window.len() >= 3 && window.covered_sec() >= rule.window_sec / 2.0);

        let evidence = AlertEvidence {
            value: Some(value),
            mean: window.mean(),
            std: window.std(),
            slope: window.slope(),
            z_score: z,
            baseline_mean,
            baseline_std,
            ..AlertEvidence::default()
        };
        let window_sec = window.span_sec().round() as u32;
        let detail = |method, score: f64, threshold: f64, held: f64| AlertDetail {
            signal: signal.to_string(),
            score,
            method,
            window_sec,
            evidence: AlertEvidence {
                threshold: Some(threshold),
                duration_sec: Some(held),
                ..evidence.clone()
            },
        };

        let mut out = Vec::new();
        let z_level = z.and_then(|z| rule.classify_z(z));
        if let Some(level) = state.z.update(t, z_level).and_then(|tr| tr.alert_level()) {
            let z = z.unwrap_or_default();
            let limit = match level {
                Severity::Critical => rule.z_critical,
                Severity::Warning => rule.z_warning,
            };
            out.push(Breach {
                key: signal.to_string(),
                severity: level,
                detail: detail(DetectionMethod::Zscore, z, limit.copysign(z), state.z.held_sec(t)),
            });
        }

        let slope_level = slope.and_then(|s| rule.classify_slope(s));
        if let Some(level) = state.slope.update(t, slope_level).and_then(|tr| tr.alert_level()) {
            let limit = match level {
                Severity::Critical => rule.slope_critical,
                Severity::Warning => rule.slope_warning,
            };
            out.push(Breach {
                key: signal.to_string(),
                severity: level,
                detail: detail(
                    DetectionMethod::Slope,
                    slope.unwrap_or_default(),
                    limit.unwrap_or_default(),
                    state.slope.held_sec(t),
                ),
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

    /// Deterministic pseudo-noise in [-1, 1].
    fn wiggle(i: u32) -> f64 {
        ((i * 37 % 17) as f64 - 8.0) / 8.0
    }

    #[test]
    fn baseline_locks_after_warmup() {
        let mut b = Baseline::new(60.0, 600.0, 4.0);
        for t in 0..60 {
            b.update(t as f64, 10.0 + wiggle(t));
            assert!(!b.is_locked());
        }
        b.update(60.0, 10.0);
        assert!(b.is_locked());
        let mean = (0..60).map(|t| 10.0 + wiggle(t)).sum::<f64>() / 60.0;
        // The locking sample itself is already folded into the EWMA.
        assert!((b.mean().unwrap() - mean).abs() < 1e-3);
        assert!(b.std().unwrap() > 0.0);
    }

    #[test]
    fn baseline_ignores_outliers() {
        let mut b = Baseline::new(10.0, 60.0, 4.0);
        for t in 0..=10 {
            b.update(t as f64, 5.0 + 0.1 * wiggle(t));
        }
        let before = b.mean().unwrap();
        for t in 11..100 {
            b.update(t as f64, 50.0);
        }
        assert_eq!(b.mean().unwrap(), before);
    }

    #[test]
    fn baseline_follows_in_band_drift() {
        let mut b = Baseline::new(10.0, 10.0, 4.0);
        for t in 0..=10 {
            b.update(t as f64, 5.0 + 0.5 * wiggle(t));
        }
        let before = b.mean().unwrap();
        for t in 11..200 {
            b.update(t as f64, before + 0.2);
        }
        assert!((b.mean().unwrap() - (before + 0.2)).abs() < 0.01);
    }

    fn step_run(step_at: u32, until: u32) -> Vec<(f64, Breach)> {
        let rule = AdaptiveRule::new(10.0, 600.0);
        let mut detector = AdaptiveDetector::new(BTreeMap::from([(SignalKind::MotorCurrentA, rule)]));
        let mut window = Window::new(10.0);
        let mut out = Vec::new();
        for i in 0..until {
            let t = i as f64;
            let v = 38.5 + 0.15 * wiggle(i) + if i >= step_at { 3.0 } else { 0.0 };
            window.push(t, v);
            for breach in detector.evaluate("pump01", SignalKind::MotorCurrentA, v, t, &window) {
                out.push((t, breach));
            }
        }
        out
    }

    #[test]
    fn no_z_scores_during_warmup() {
        assert!(step_run(20, 60).is_empty());
    }

    #[test]
    fn step_after_warmup_raises_z_alert() {
        let out = step_run(100, 200);
        let (t, first) = &out[0];
        assert_eq!(first.detail.method, DetectionMethod::Zscore);
        assert!(*t > 100.0 && *t <= 120.0, "first alert at {t}");
        assert!(first.detail.score > 4.0);
        assert!(first.detail.evidence.baseline_mean.is_some());
        assert!(out
            .iter()
            .filter(|(_, b)| b.detail.method == DetectionMethod::Zscore)
            .all(|(_, b)| b.key == "motor_current_a"));
    }

    #[test]
    fn falling_trend_raises_slope_alert() {
        let rule = AdaptiveRule::new(10.0, 600.0).with_slope(-2.0, -5.0);
        let mut detector = AdaptiveDetector::new(BTreeMap::from([(SignalKind::FlowM3h, rule)]));
        let mut window = Window::new(10.0);
        let mut slope_alerts = Vec::new();
        for i in 0..40 {
            let t = i as f64;
            let v = if i < 10 { 100.0 } else { 100.0 - 3.0 * (i - 10) as f64 };
            window.push(t, v);
            for breach in detector.evaluate("pump01", SignalKind::FlowM3h, v, t, &window) {
                if breach.detail.method == DetectionMethod::Slope {
                    slope_alerts.push((t, breach));
                }
            }
        }
        assert_eq!(slope_alerts.len(), 1);
        let (_, breach) = &slope_alerts[0];
        assert_eq!(breach.severity, Severity::Warning);
        assert!(breach.detail.score <= -2.0);
        assert_eq!(breach.detail.evidence.threshold, Some(-2.0));
    }
}
