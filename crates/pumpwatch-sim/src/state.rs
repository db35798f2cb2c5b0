//! ---
//! pw_section: "11-simulation"
//! pw_subsection: "02-engine"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Internal physical state owned by one scenario executor."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use pumpwatch_msg::SignalKind;

/// Mutable state of one simulated asset.
///
/// Owned exclusively by a single executor. Physical fields feed the
/// operating point; `sensor_bias` and `noise_gain` only shape the
/// measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalState {
    /// Commanded shaft speed.
    pub rpm: f64,
    /// Commanded valve opening in percent.
    pub valve_open_pct: f64,
    /// Frozen valve position while a valve fault is active.
    pub valve_override: Option<f64>,
    /// Bearing damage `d` in `[0, 1]`.
    pub bearing_wear: f64,
    pub resistance_nominal: f64,
    /// Line resistance factor before any clogging.
    pub base_resistance_factor: f64,
    /// Added resistance factor from active clogging.
    pub clog_factor: f64,
    /// Lagged pump efficiency.
    pub efficiency: f64,
    pub ambient_temp_c: f64,
    pub sensor_bias: [f64; SignalKind::COUNT],
    pub noise_gain: [f64; SignalKind::COUNT],
}

impl InternalState {
    /// Valve position the hydraulics actually see.
    pub fn effective_valve_pct(&self) -> f64 {
        self.valve_override.unwrap_or(self.valve_open_pct)
    }

    pub fn resistance_factor(&self) -> f64 {
        self.base_resistance_factor + self.clog_factor
    }

    pub fn resistance(&self) -> f64 {
        (self.resistance_nominal * self.resistance_factor()).max(0.0)
    }

    /// Withdraw every measurement effect before faults re-apply theirs.
    pub fn clear_sensor_effects(&mut self) {
        self.sensor_bias = [0.0; SignalKind::COUNT];
        self.noise_gain = [1.0; SignalKind::COUNT];
    }
}
