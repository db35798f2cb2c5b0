//! ---
//! pw_section: "11-simulation"
//! pw_subsection: "02-engine"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Fault timeline: state mutation, sensor effects and ground truth."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use pumpwatch_common::LabelPolicy;
use pumpwatch_msg::{FaultLabel, GroundTruth, SignalKind, SignalReadings};

use crate::scenario::{ClogProfile, FaultEvent, FaultKind, SkippedFault};
use crate::state::InternalState;

/// Per-fault bookkeeping carried between ticks.
#[derive(Debug, Clone, Default)]
struct Progress {
    /// Wear added so far by a bearing fault.
    wear_added: f64,
    /// Current clogging contribution to the resistance factor.
    clog_extra: f64,
    /// Value a stuck valve or sensor is frozen at.
    frozen: Option<f64>,
    /// Drift bias currently applied.
    bias: f64,
}

/// Applies a scenario's fault timeline to one asset.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    faults: Vec<FaultEvent>,
    progress: Vec<Progress>,
    skipped: Vec<SkippedFault>,
    skipped_announced: Vec<bool>,
    policy: LabelPolicy,
    last_reported: Option<SignalReadings>,
    base_wear: f64,
}

impl FaultInjector {
    pub fn new(
        faults: Vec<FaultEvent>,
        skipped: Vec<SkippedFault>,
        policy: LabelPolicy,
        base_wear: f64,
    ) -> Self {
        Self {
            progress: vec![Progress::default(); faults.len()],
            skipped_announced: vec![false; skipped.len()],
            faults,
            skipped,
            policy,
            last_reported: None,
            base_wear,
        }
    }

    pub fn faults(&self) -> &[FaultEvent] {
        &self.faults
    }

    /// Bring physical and measurement effects up to time `t`.
    pub fn apply(&mut self, state: &mut InternalState, t: f64) {
        state.clear_sensor_effects();
        let mut wear_added = 0.0;
        let mut clog = 0.0;
        let mut valve_override: Option<(f64, f64)> = None;

        for (fault, progress) in self.faults.iter().zip(self.progress.iter_mut()) {
            let active = fault.is_active_at(t);
            match &fault.kind {
                FaultKind::BearingWear { rate_per_sec } => {
                    if t >= fault.start_time_sec {
                        let elapsed = t.min(fault.end_time_sec()) - fault.start_time_sec;
                        progress.wear_added = rate_per_sec * elapsed.max(0.0);
                    }
                    wear_added += progress.wear_added;
                }
                FaultKind::Clogging { profile } => {
                    progress.clog_extra = if active {
                        match profile {
                            ClogProfile::Step { resistance_factor } => resistance_factor - 1.0,
                            ClogProfile::Ramp { ramp_rate } => {
                                ramp_rate * (t - fault.start_time_sec)
                            }
                        }
                    } else {
                        0.0
                    };
                    clog += progress.clog_extra;
                }
                FaultKind::ValveStuck { stuck_value } => {
                    if active {
                        let current = valve_override.map_or(state.valve_open_pct, |(_, v)| v);
                        let frozen = *progress
                            .frozen
                            .get_or_insert_with(|| stuck_value.unwrap_or(current));
                        match valve_override {
                            Some((start, _)) if start <= fault.start_time_sec => {}
                            _ => valve_override = Some((fault.start_time_sec, frozen)),
                        }
                    } else {
                        progress.frozen = None;
                    }
                }
                FaultKind::SensorDrift { signal, drift_rate } => {
                    progress.bias = if active {
                        drift_rate * (t - fault.start_time_sec)
                    } else {
                        0.0
                    };
                    state.sensor_bias[signal.index()] += progress.bias;
                }
                FaultKind::SensorStuck { .. } => {
                    if !active {
                        progress.frozen = None;
                    }
                }
                FaultKind::NoiseBurst {
                    signals,
                    multiplier,
                } => {
                    if active {
                        for signal in signals {
                            state.noise_gain[signal.index()] += multiplier - 1.0;
                        }
                    }
                }
            }
        }

        state.bearing_wear = (self.base_wear + wear_added).clamp(0.0, 1.0);
        state.clog_factor = clog;
        state.valve_override = valve_override.map(|(_, value)| value);
    }

    /// Freeze stuck sensors in the measured readings and remember what was reported.
    pub fn apply_sensor_overrides(&mut self, t: f64, readings: &mut SignalReadings) {
        let mut owners: [Option<(f64, f64)>; SignalKind::COUNT] = [None; SignalKind::COUNT];
        for (fault, progress) in self.faults.iter().zip(self.progress.iter_mut()) {
            let FaultKind::SensorStuck { signal } = fault.kind else {
                continue;
            };
            if !fault.is_active_at(t) {
                continue;
            }
            let previous = self
                .last_reported
                .as_ref()
                .and_then(|last| last.get(signal))
                .or_else(|| readings.get(signal));
            let Some(frozen) = progress.frozen.or(previous) else {
                continue;
            };
            progress.frozen = Some(frozen);
            let slot = &mut owners[signal.index()];
            if slot.map_or(true, |(start, _)| fault.start_time_sec < start) {
                *slot = Some((fault.start_time_sec, frozen));
            }
        }
        for kind in SignalKind::ALL {
            if let Some((_, value)) = owners[kind.index()] {
                readings.set(kind, value);
            }
        }
        self.last_reported = Some(readings.clone());
    }

    /// Ground-truth label at `t` under the configured policy.
    pub fn truth(&self, t: f64) -> GroundTruth {
        let mut best: Option<(usize, f64, &FaultEvent)> = None;
        for (index, (fault, progress)) in self.faults.iter().zip(&self.progress).enumerate() {
            let Some(severity) = self.severity(fault, progress, t) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((best_index, best_severity, best_fault)) => match self.policy {
                    LabelPolicy::HighestSeverity => {
                        severity > best_severity
                            || (severity == best_severity
                                && (fault.start_time_sec, index)
                                    < (best_fault.start_time_sec, best_index))
                    }
                    LabelPolicy::EarliestOnset => {
                        (fault.start_time_sec, index) < (best_fault.start_time_sec, best_index)
                    }
                },
            };
            if better {
                best = Some((index, severity, fault));
            }
        }
        match best {
            Some((_, severity, fault)) => GroundTruth {
                fault: fault.kind.label(),
                severity,
            },
            None => GroundTruth {
                fault: FaultLabel::None,
                severity: 0.0,
            },
        }
    }

    /// Severity of a fault that counts toward truth at `t`, if any.
    fn severity(&self, fault: &FaultEvent, progress: &Progress, t: f64) -> Option<f64> {
        match &fault.kind {
            // Wear is permanent damage and stays reported after its window.
            FaultKind::BearingWear { .. } if t >= fault.start_time_sec => {
                Some((progress.wear_added * 10.0).min(1.0))
            }
            FaultKind::BearingWear { .. } => None,
            _ if !fault.is_active_at(t) => None,
            FaultKind::Clogging { .. } => Some((progress.clog_extra / 2.0).min(1.0)),
            FaultKind::SensorDrift { .. } => Some((progress.bias.abs() / 10.0).min(1.0)),
            FaultKind::ValveStuck { .. }
            | FaultKind::SensorStuck { .. }
            | FaultKind::NoiseBurst { .. } => Some(1.0),
        }
    }

    /// Warnings for skipped faults whose start time has been reached.
    pub fn take_warnings(&mut self, t: f64) -> Vec<String> {
        let mut warnings = Vec::new();
        for (skip, announced) in self.skipped.iter().zip(self.skipped_announced.iter_mut()) {
            if !*announced && t >= skip.start_time_sec {
                *announced = true;
                warnings.push(skip.warning());
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PhysicalStateModel;
    use crate::scenario::InitialConditions;

    fn fault(start: f64, duration: Option<f64>, kind: FaultKind) -> FaultEvent {
        FaultEvent {
            start_time_sec: start,
            duration_sec: duration,
            kind,
        }
    }

    fn healthy_state() -> InternalState {
        PhysicalStateModel::new(1).initial_state(&InitialConditions::default())
    }

    fn injector(faults: Vec<FaultEvent>) -> FaultInjector {
        FaultInjector::new(faults, Vec::new(), LabelPolicy::HighestSeverity, 0.0)
    }

    #[test]
    fn bearing_wear_accumulates_and_persists() {
        let mut inj = injector(vec![fault(
            100.0,
            Some(50.0),
            FaultKind::BearingWear { rate_per_sec: 1e-3 },
        )]);
        let mut state = healthy_state();

        inj.apply(&mut state, 99.0);
        assert_eq!(state.bearing_wear, 0.0);
        assert_eq!(inj.truth(99.0).fault, FaultLabel::None);

        inj.apply(&mut state, 120.0);
        assert!((state.bearing_wear - 0.02).abs() < 1e-12);
        assert!((inj.truth(120.0).severity - 0.2).abs() < 1e-9);

        inj.apply(&mut state, 500.0);
        assert!((state.bearing_wear - 0.05).abs() < 1e-12);
        let truth = inj.truth(500.0);
        assert_eq!(truth.fault, FaultLabel::BearingWear);
        assert!((truth.severity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn clogging_step_is_withdrawn_after_window() {
        let mut inj = injector(vec![fault(
            10.0,
            Some(20.0),
            FaultKind::Clogging {
                profile: ClogProfile::Step {
                    resistance_factor: 3.5,
                },
            },
        )]);
        let mut state = healthy_state();
        inj.apply(&mut state, 10.0);
        assert_eq!(state.resistance_factor(), 3.5);
        assert_eq!(inj.truth(10.0).severity, 1.0);
        inj.apply(&mut state, 30.0);
        assert_eq!(state.resistance_factor(), 1.0);
        assert_eq!(inj.truth(30.0).fault, FaultLabel::None);
    }

    #[test]
    fn overlapping_clogs_add() {
        let clog = |start, factor| {
            fault(
                start,
                None,
                FaultKind::Clogging {
                    profile: ClogProfile::Step {
                        resistance_factor: factor,
                    },
                },
            )
        };
        let mut inj = injector(vec![clog(0.0, 1.5), clog(5.0, 2.0)]);
        let mut state = healthy_state();
        inj.apply(&mut state, 6.0);
        assert!((state.resistance_factor() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn valve_freezes_at_onset_position() {
        let mut inj = injector(vec![fault(
            5.0,
            Some(10.0),
            FaultKind::ValveStuck { stuck_value: None },
        )]);
        let mut state = healthy_state();
        inj.apply(&mut state, 5.0);
        state.valve_open_pct = 95.0;
        inj.apply(&mut state, 6.0);
        assert_eq!(state.effective_valve_pct(), 60.0);
        inj.apply(&mut state, 15.0);
        assert_eq!(state.effective_valve_pct(), 95.0);
    }

    #[test]
    fn drift_biases_only_the_named_signal() {
        let mut inj = injector(vec![fault(
            0.0,
            None,
            FaultKind::SensorDrift {
                signal: SignalKind::PressureBar,
                drift_rate: 0.5,
            },
        )]);
        let mut state = healthy_state();
        inj.apply(&mut state, 4.0);
        assert_eq!(state.sensor_bias[SignalKind::PressureBar.index()], 2.0);
        assert_eq!(state.sensor_bias[SignalKind::FlowM3h.index()], 0.0);
        assert!((inj.truth(4.0).severity - 0.2).abs() < 1e-12);
    }

    #[test]
    fn stuck_sensor_repeats_previous_report() {
        let mut inj = injector(vec![fault(
            2.0,
            Some(3.0),
            FaultKind::SensorStuck {
                signal: SignalKind::FlowM3h,
            },
        )]);
        let mut before = SignalReadings::from_array([4.4, 99.0, 34.0, 63.0, 2.0, 2950.0, 38.5, 60.0]);
        inj.apply_sensor_overrides(1.0, &mut before);

        let mut during = SignalReadings::from_array([4.4, 101.0, 34.0, 63.0, 2.0, 2950.0, 38.5, 60.0]);
        inj.apply_sensor_overrides(2.0, &mut during);
        assert_eq!(during.flow_m3h, Some(99.0));

        let mut later = SignalReadings::from_array([4.4, 97.0, 34.0, 63.0, 2.0, 2950.0, 38.5, 60.0]);
        inj.apply_sensor_overrides(3.0, &mut later);
        assert_eq!(later.flow_m3h, Some(99.0));

        let mut released = SignalReadings::from_array([4.4, 97.0, 34.0, 63.0, 2.0, 2950.0, 38.5, 60.0]);
        inj.apply_sensor_overrides(5.0, &mut released);
        assert_eq!(released.flow_m3h, Some(97.0));
    }

    #[test]
    fn noise_gains_add_across_bursts() {
        let burst = |m| {
            fault(
                0.0,
                Some(10.0),
                FaultKind::NoiseBurst {
                    signals: vec![SignalKind::VibrationRms],
                    multiplier: m,
                },
            )
        };
        let mut inj = injector(vec![burst(10.0), burst(4.0)]);
        let mut state = healthy_state();
        inj.apply(&mut state, 1.0);
        assert_eq!(state.noise_gain[SignalKind::VibrationRms.index()], 13.0);
        inj.apply(&mut state, 10.0);
        assert_eq!(state.noise_gain[SignalKind::VibrationRms.index()], 1.0);
    }

    #[test]
    fn label_policies_pick_different_winners() {
        let faults = vec![
            fault(
                0.0,
                None,
                FaultKind::SensorDrift {
                    signal: SignalKind::TempC,
                    drift_rate: 0.01,
                },
            ),
            fault(5.0, None, FaultKind::ValveStuck { stuck_value: Some(50.0) }),
        ];
        let mut state = healthy_state();

        let mut highest = injector(faults.clone());
        highest.apply(&mut state, 10.0);
        assert_eq!(highest.truth(10.0).fault, FaultLabel::ValveStuck);

        let mut earliest =
            FaultInjector::new(faults, Vec::new(), LabelPolicy::EarliestOnset, 0.0);
        earliest.apply(&mut state, 10.0);
        let truth = earliest.truth(10.0);
        assert_eq!(truth.fault, FaultLabel::SensorDrift);
        assert!((truth.severity - 0.01).abs() < 1e-12);
    }

    #[test]
    fn equal_severity_ties_go_to_earliest_start() {
        let faults = vec![
            fault(
                8.0,
                None,
                FaultKind::SensorStuck {
                    signal: SignalKind::Rpm,
                },
            ),
            fault(3.0, None, FaultKind::ValveStuck { stuck_value: None }),
        ];
        let mut inj = injector(faults);
        let mut state = healthy_state();
        inj.apply(&mut state, 9.0);
        assert_eq!(inj.truth(9.0).fault, FaultLabel::ValveStuck);
    }

    #[test]
    fn skipped_fault_warning_is_emitted_once() {
        let skipped = vec![SkippedFault {
            index: 0,
            fault_type: "cavitation".into(),
            start_time_sec: 5.0,
            reason: "unknown fault type 'cavitation'".into(),
        }];
        let mut inj = FaultInjector::new(Vec::new(), skipped, LabelPolicy::HighestSeverity, 0.0);
        assert!(inj.take_warnings(4.0).is_empty());
        assert_eq!(inj.take_warnings(5.0).len(), 1);
        assert!(inj.take_warnings(6.0).is_empty());
    }
}
