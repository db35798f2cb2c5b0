//! ---
//! pw_section: "11-simulation"
//! pw_subsection: "02-engine"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Closed-form pump, pipe and bearing model with seeded measurement noise."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use rand::prelude::*;
use rand_distr::StandardNormal;
use serde::Serialize;

use pumpwatch_msg::{SignalKind, SignalReadings};

use crate::scenario::{InitialConditions, Setpoint, SetpointField};
use crate::state::InternalState;

const RHO: f64 = 1000.0;
const G: f64 = 9.81;

/// Nominal pump curve, pipe system and motor constants.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpParameters {
    pub rated_rpm: f64,
    /// Shut-off head at rated speed, m.
    pub shutoff_head_m: f64,
    /// Head loss coefficient of the pump curve, m/(m³/h)².
    pub curve_coeff: f64,
    pub valve_coeff: f64,
    pub static_head_m: f64,
    pub resistance_nominal: f64,
    /// Best-efficiency flow at rated speed.
    pub bep_flow_m3h: f64,
    pub peak_efficiency: f64,
    pub min_curve_efficiency: f64,
    pub efficiency_tau_sec: f64,
    pub rated_shaft_kw: f64,
    pub motor_efficiency: f64,
    pub supply_voltage: f64,
    pub power_factor: f64,
    pub no_load_current_a: f64,
    pub baseline_vibration: f64,
    pub min_valve_fraction: f64,
}

impl Default for PumpParameters {
    fn default() -> Self {
        Self {
            rated_rpm: 2950.0,
            shutoff_head_m: 60.0,
            curve_coeff: 0.001,
            valve_coeff: 2.8125e-4,
            static_head_m: 10.0,
            resistance_nominal: 0.0035,
            bep_flow_m3h: 100.0,
            peak_efficiency: 0.75,
            min_curve_efficiency: 0.3,
            efficiency_tau_sec: 20.0,
            rated_shaft_kw: 18.0,
            motor_efficiency: 0.92,
            supply_voltage: 400.0,
            power_factor: 0.85,
            no_load_current_a: 5.0,
            baseline_vibration: 2.0,
            min_valve_fraction: 0.05,
        }
    }
}

/// Measurement noise standard deviation per signal, canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseProfile {
    pub sigma: [f64; SignalKind::COUNT],
}

impl Default for NoiseProfile {
    fn default() -> Self {
        Self {
            sigma: [0.02, 0.4, 0.05, 0.08, 0.05, 1.5, 0.15, 0.0],
        }
    }
}

/// Noise-free hydraulic and electrical quantities for one state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OperatingPoint {
    pub flow_m3h: f64,
    pub head_m: f64,
    pub pressure_bar: f64,
    pub hydraulic_kw: f64,
    /// Efficiency the lagged value converges to.
    pub efficiency_target: f64,
}

/// Vibration severity zones for small machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, strum::Display)]
pub enum VibrationGrade {
    A,
    B,
    C,
    D,
}

pub fn iso_vibration_grade(rms_mm_s: f64) -> VibrationGrade {
    if rms_mm_s < 2.8 {
        VibrationGrade::A
    } else if rms_mm_s < 7.1 {
        VibrationGrade::B
    } else if rms_mm_s < 18.0 {
        VibrationGrade::C
    } else {
        VibrationGrade::D
    }
}

/// Setpoints in time order with a cursor over the ones already applied.
#[derive(Debug, Clone)]
pub struct SetpointSchedule {
    setpoints: Vec<Setpoint>,
    next: usize,
}

impl SetpointSchedule {
    pub fn new(mut setpoints: Vec<Setpoint>) -> Self {
        setpoints.sort_by(|a, b| a.time_sec.total_cmp(&b.time_sec));
        Self { setpoints, next: 0 }
    }

    /// Apply every setpoint with `time_sec <= t` not applied yet.
    pub fn apply_due(&mut self, t: f64, state: &mut InternalState) -> usize {
        let mut applied = 0;
        while let Some(sp) = self.setpoints.get(self.next) {
            if sp.time_sec > t {
                break;
            }
            match sp.field {
                SetpointField::Rpm => state.rpm = sp.value,
                SetpointField::ValveOpenPct => state.valve_open_pct = sp.value,
            }
            self.next += 1;
            applied += 1;
        }
        applied
    }

    pub fn remaining(&self) -> usize {
        self.setpoints.len() - self.next
    }
}

/// Deterministic physics plus the scenario's seeded noise stream.
#[derive(Debug)]
pub struct PhysicalStateModel {
    params: PumpParameters,
    noise: NoiseProfile,
    rng: StdRng,
}

impl PhysicalStateModel {
    pub fn new(seed: u64) -> Self {
        Self::with_parameters(seed, PumpParameters::default(), NoiseProfile::default())
    }

    pub fn with_parameters(seed: u64, params: PumpParameters, noise: NoiseProfile) -> Self {
        Self {
            params,
            noise,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn parameters(&self) -> &PumpParameters {
        &self.params
    }

    /// State at t = 0 with efficiency already settled.
    pub fn initial_state(&self, initial: &InitialConditions) -> InternalState {
        let mut state = InternalState {
            rpm: initial.rpm,
            valve_open_pct: initial.valve_open_pct,
            valve_override: None,
            bearing_wear: initial.bearing_wear.clamp(0.0, 1.0),
            resistance_nominal: self.params.resistance_nominal,
            base_resistance_factor: initial.resistance_factor,
            clog_factor: 0.0,
            efficiency: 1.0,
            ambient_temp_c: initial.ambient_temp_c,
            sensor_bias: [0.0; SignalKind::COUNT],
            noise_gain: [1.0; SignalKind::COUNT],
        };
        state.efficiency = self.operating_point(&state).efficiency_target;
        state
    }

    /// Closed-form operating point; does not touch the noise stream.
    pub fn operating_point(&self, state: &InternalState) -> OperatingPoint {
        let p = &self.params;
        let s = (state.rpm / p.rated_rpm).max(0.0);
        let u = (state.effective_valve_pct() / 100.0).clamp(p.min_valve_fraction, 1.0);
        let r_valve = p.valve_coeff * (1.0 / (u * u) - 1.0);
        let r_line = state.resistance();

        let driving_head = (p.shutoff_head_m * s * s - p.static_head_m).max(0.0);
        let flow = (driving_head / (p.curve_coeff + r_line + r_valve)).sqrt();
        let head = p.shutoff_head_m * s * s - p.curve_coeff * flow * flow;
        let pressure_bar = RHO * G * (head - r_valve * flow * flow) / 1e5;
        let hydraulic_kw = RHO * G * (flow / 3600.0) * head / 1000.0;

        let bep = p.bep_flow_m3h * s;
        let curve_eff = if bep > 0.0 {
            let dev = (flow - bep) / bep;
            (p.peak_efficiency * (1.0 - dev * dev)).clamp(p.min_curve_efficiency, p.peak_efficiency)
        } else {
            p.min_curve_efficiency
        };
        let ratio = state.resistance_factor().max(1e-6);
        let efficiency_target = curve_eff
            * (1.0 - 0.2 * state.bearing_wear.clamp(0.0, 1.0))
            * (1.0 - 0.05 * ratio.ln());

        OperatingPoint {
            flow_m3h: flow,
            head_m: head,
            pressure_bar,
            hydraulic_kw: hydraulic_kw.max(0.0),
            efficiency_target,
        }
    }

    /// Advance `state` by `dt` seconds and return true and measured signals.
    ///
    /// Exactly one standard-normal draw per signal is consumed on every call.
    pub fn advance(&mut self, state: &mut InternalState, dt: f64) -> (SignalReadings, SignalReadings) {
        state.bearing_wear = state.bearing_wear.clamp(0.0, 1.0);
        let op = self.operating_point(state);
        let p = &self.params;

        let alpha = 1.0 - (-dt / p.efficiency_tau_sec).exp();
        state.efficiency += (op.efficiency_target - state.efficiency) * alpha;
        state.efficiency = state.efficiency.clamp(0.05, 1.0);

        let d = state.bearing_wear;
        let shaft_kw = op.hydraulic_kw / state.efficiency;
        let load = shaft_kw / p.rated_shaft_kw;
        let current = p.no_load_current_a
            + (shaft_kw / p.motor_efficiency) * 1000.0
                / (3f64.sqrt() * p.supply_voltage * p.power_factor);
        let temp = state.ambient_temp_c + 2.0 * (shaft_kw - op.hydraulic_kw);
        let bearing_temp =
            state.ambient_temp_c + 20.0 + 18.0 * load * (1.0 + 3.0 * d) / (1.0 + 0.5 * d);
        let vibration = (p.baseline_vibration
            * (1.0 + 2.0 * d + 5.0 * d.powi(3))
            * (1.0 + 0.2 * (load - 1.0)))
            .max(0.1);

        let truth = [
            op.pressure_bar,
            op.flow_m3h,
            temp,
            bearing_temp,
            vibration,
            state.rpm,
            current,
            state.effective_valve_pct(),
        ];

        let mut measured = [0.0; SignalKind::COUNT];
        for kind in SignalKind::ALL {
            let i = kind.index();
            let z: f64 = self.rng.sample(StandardNormal);
            measured[i] = truth[i] + self.noise.sigma[i] * state.noise_gain[i] * z + state.sensor_bias[i];
        }

        (
            SignalReadings::from_array(truth),
            SignalReadings::from_array(measured),
        )
    }
}
