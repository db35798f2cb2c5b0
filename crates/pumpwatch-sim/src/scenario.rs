//! ---
//! pw_section: "11-simulation"
//! pw_subsection: "02-engine"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Scenario documents: parsing, defaults and validation."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
//! Scenario documents are parsed into [`ScenarioDefinition`] at the boundary.
//! Everything past this module works with typed faults and setpoints only.

use std::path::Path;

use chrono::{DateTime, Utc};
use pumpwatch_msg::{FaultLabel, SignalKind, DEFAULT_ASSET_ID, DEFAULT_PLANT_ID};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ValidationError;

type Validation<T> = std::result::Result<T, ValidationError>;

const DEFAULT_NOISE_BURST_SEC: f64 = 10.0;

/// Longest accepted run: 30 days of simulated time.
pub const MAX_DURATION_SEC: f64 = 30.0 * 24.0 * 3600.0;

fn default_version() -> String {
    "1.0".to_owned()
}

fn default_rpm() -> f64 {
    2950.0
}

fn default_valve() -> f64 {
    60.0
}

fn default_resistance_factor() -> f64 {
    1.0
}

fn default_ambient() -> f64 {
    25.0
}

/// Starting physical conditions of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialConditions {
    #[serde(default = "default_rpm")]
    pub rpm: f64,
    #[serde(default = "default_valve")]
    pub valve_open_pct: f64,
    /// Pre-existing bearing wear in `[0, 1]`.
    #[serde(default)]
    pub bearing_wear: f64,
    /// Line resistance relative to nominal, `>= 1`.
    #[serde(default = "default_resistance_factor")]
    pub resistance_factor: f64,
    #[serde(default = "default_ambient")]
    pub ambient_temp_c: f64,
}

impl Default for InitialConditions {
    fn default() -> Self {
        Self {
            rpm: default_rpm(),
            valve_open_pct: default_valve(),
            bearing_wear: 0.0,
            resistance_factor: default_resistance_factor(),
            ambient_temp_c: default_ambient(),
        }
    }
}

impl InitialConditions {
    fn validate(&self) -> Validation<()> {
        non_negative("initial_conditions.rpm", self.rpm)?;
        percentage("initial_conditions.valve_open_pct", self.valve_open_pct)?;
        if !(0.0..=1.0).contains(&self.bearing_wear) {
            return Err(ValidationError::field(
                "initial_conditions.bearing_wear",
                "must be within [0, 1]",
            ));
        }
        if !self.resistance_factor.is_finite() || self.resistance_factor < 1.0 {
            return Err(ValidationError::field(
                "initial_conditions.resistance_factor",
                "must be a finite number >= 1",
            ));
        }
        finite("initial_conditions.ambient_temp_c", self.ambient_temp_c)
    }
}

/// Commanded quantity a setpoint changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetpointField {
    Rpm,
    ValveOpenPct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setpoint {
    pub time_sec: f64,
    pub field: SetpointField,
    pub value: f64,
}

/// Clogging either jumps to a factor or grows at a rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClogProfile {
    Step { resistance_factor: f64 },
    Ramp { ramp_rate: f64 },
}

/// Typed fault with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultKind {
    BearingWear { rate_per_sec: f64 },
    Clogging { profile: ClogProfile },
    ValveStuck { stuck_value: Option<f64> },
    SensorDrift { signal: SignalKind, drift_rate: f64 },
    SensorStuck { signal: SignalKind },
    NoiseBurst { signals: Vec<SignalKind>, multiplier: f64 },
}

impl FaultKind {
    pub fn label(&self) -> FaultLabel {
        match self {
            FaultKind::BearingWear { .. } => FaultLabel::BearingWear,
            FaultKind::Clogging { .. } => FaultLabel::Clogging,
            FaultKind::ValveStuck { .. } => FaultLabel::ValveStuck,
            FaultKind::SensorDrift { .. } => FaultLabel::SensorDrift,
            FaultKind::SensorStuck { .. } => FaultLabel::SensorStuck,
            FaultKind::NoiseBurst { .. } => FaultLabel::NoiseBurst,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultEvent {
    pub start_time_sec: f64,
    pub duration_sec: Option<f64>,
    pub kind: FaultKind,
}

impl FaultEvent {
    pub fn end_time_sec(&self) -> f64 {
        self.duration_sec
            .map_or(f64::INFINITY, |d| self.start_time_sec + d)
    }

    pub fn is_active_at(&self, t: f64) -> bool {
        t >= self.start_time_sec && t < self.end_time_sec()
    }
}

/// A fault entry the simulator cannot act on. The run continues without it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFault {
    pub index: usize,
    pub fault_type: String,
    pub start_time_sec: f64,
    pub reason: String,
}

impl SkippedFault {
    pub fn warning(&self) -> String {
        format!(
            "fault #{} ({}) skipped: {}",
            self.index, self.fault_type, self.reason
        )
    }
}

/// Validated, immutable description of one asset run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioDefinition {
    pub version: String,
    pub name: String,
    pub plant_id: String,
    pub asset_id: String,
    pub seed: u64,
    pub duration_sec: f64,
    /// Anchors sample timestamps; the start instant is used when absent.
    /// Two runs of the same seed only serialize byte-identically when this
    /// is set, since otherwise every `ts` follows the wall clock.
    pub start_ts: Option<DateTime<Utc>>,
    pub initial_conditions: InitialConditions,
    pub faults: Vec<FaultEvent>,
    pub skipped_faults: Vec<SkippedFault>,
    /// Sorted by `time_sec`.
    pub setpoints: Vec<Setpoint>,
}

#[derive(Debug, Deserialize)]
struct ScenarioDocument {
    #[serde(default = "default_version")]
    version: String,
    name: Option<String>,
    plant_id: Option<String>,
    asset_id: Option<String>,
    seed: Option<u64>,
    duration_sec: Option<f64>,
    #[serde(default)]
    start_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    initial_conditions: InitialConditions,
    #[serde(default)]
    faults: Vec<RawFault>,
    #[serde(default)]
    setpoints: Vec<RawSetpoint>,
}

#[derive(Debug, Deserialize)]
struct RawFault {
    #[serde(rename = "type")]
    fault_type: Option<String>,
    start_time_sec: Option<f64>,
    duration_sec: Option<f64>,
    #[serde(default)]
    params: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawSetpoint {
    time_sec: Option<f64>,
    field: Option<String>,
    value: Option<f64>,
}

#[derive(Deserialize)]
struct BearingWearParams {
    #[serde(default = "BearingWearParams::default_rate")]
    rate_per_sec: f64,
}

impl BearingWearParams {
    fn default_rate() -> f64 {
        1e-4
    }
}

#[derive(Deserialize)]
struct CloggingParams {
    resistance_factor: Option<f64>,
    ramp_rate: Option<f64>,
}

#[derive(Deserialize)]
struct ValveStuckParams {
    stuck_value: Option<f64>,
}

#[derive(Deserialize)]
struct SensorDriftParams {
    #[serde(default = "SensorDriftParams::default_signal")]
    signal: String,
    #[serde(default = "SensorDriftParams::default_rate")]
    drift_rate: f64,
}

impl SensorDriftParams {
    fn default_signal() -> String {
        SignalKind::PressureBar.to_string()
    }

    fn default_rate() -> f64 {
        0.01
    }
}

#[derive(Deserialize)]
struct SensorStuckParams {
    signal: Option<String>,
}

#[derive(Deserialize)]
struct NoiseBurstParams {
    signal: Option<String>,
    signals: Option<Vec<String>>,
    #[serde(default = "NoiseBurstParams::default_multiplier")]
    multiplier: f64,
}

impl NoiseBurstParams {
    fn default_multiplier() -> f64 {
        10.0
    }
}

/// Outcome of interpreting one raw fault entry.
enum Parsed {
    Fault(FaultEvent),
    Skipped(SkippedFault),
}

impl ScenarioDefinition {
    pub fn from_json_str(text: &str) -> Validation<Self> {
        let doc: ScenarioDocument =
            serde_json::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::from_document(doc)
    }

    pub fn from_value(value: Value) -> Validation<Self> {
        let doc: ScenarioDocument =
            serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::from_document(doc)
    }

    pub fn from_path(path: &Path) -> Validation<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ValidationError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    fn from_document(doc: ScenarioDocument) -> Validation<Self> {
        let name = doc.name.ok_or(ValidationError::MissingField("name"))?;
        let seed = doc.seed.ok_or(ValidationError::MissingField("seed"))?;
        let duration_sec = doc
            .duration_sec
            .ok_or(ValidationError::MissingField("duration_sec"))?;

        let mut faults = Vec::new();
        let mut skipped_faults = Vec::new();
        for (index, raw) in doc.faults.into_iter().enumerate() {
            match parse_fault(index, raw)? {
                Parsed::Fault(fault) => faults.push(fault),
                Parsed::Skipped(skip) => {
                    warn!(scenario = %name, fault = index, reason = %skip.reason, "skipping fault");
                    skipped_faults.push(skip);
                }
            }
        }

        let mut setpoints = doc
            .setpoints
            .into_iter()
            .enumerate()
            .map(|(index, raw)| parse_setpoint(index, raw))
            .collect::<Validation<Vec<_>>>()?;
        setpoints.sort_by(|a, b| a.time_sec.total_cmp(&b.time_sec));

        let definition = Self {
            version: doc.version,
            name,
            plant_id: doc.plant_id.unwrap_or_else(|| DEFAULT_PLANT_ID.to_owned()),
            asset_id: doc.asset_id.unwrap_or_else(|| DEFAULT_ASSET_ID.to_owned()),
            seed,
            duration_sec,
            start_ts: doc.start_ts,
            initial_conditions: doc.initial_conditions,
            faults,
            skipped_faults,
            setpoints,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Structural checks; also run by the registry before installing.
    pub fn validate(&self) -> Validation<()> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::field("name", "must not be empty"));
        }
        if self.asset_id.trim().is_empty() || self.asset_id.contains('/') {
            return Err(ValidationError::field(
                "asset_id",
                "must be non-empty and contain no '/'",
            ));
        }
        if !self.duration_sec.is_finite() || self.duration_sec <= 0.0 {
            return Err(ValidationError::field(
                "duration_sec",
                format!("must be a positive number, got {}", self.duration_sec),
            ));
        }
        if self.duration_sec > MAX_DURATION_SEC {
            return Err(ValidationError::field(
                "duration_sec",
                format!("must not exceed {MAX_DURATION_SEC} s, got {}", self.duration_sec),
            ));
        }
        self.initial_conditions.validate()?;
        for (index, fault) in self.faults.iter().enumerate() {
            validate_fault(fault).map_err(|reason| ValidationError::InvalidFault { index, reason })?;
        }
        for (index, sp) in self.setpoints.iter().enumerate() {
            validate_setpoint(sp).map_err(|reason| ValidationError::InvalidSetpoint { index, reason })?;
        }
        if self
            .setpoints
            .windows(2)
            .any(|w| w[0].time_sec > w[1].time_sec)
        {
            return Err(ValidationError::field("setpoints", "must be sorted by time_sec"));
        }
        Ok(())
    }
}

fn parse_fault(index: usize, raw: RawFault) -> Validation<Parsed> {
    let invalid = |reason: String| ValidationError::InvalidFault { index, reason };

    let fault_type = raw
        .fault_type
        .ok_or_else(|| invalid("missing 'type'".into()))?;
    let start_time_sec = raw
        .start_time_sec
        .ok_or_else(|| invalid("missing 'start_time_sec'".into()))?;
    let skip = |reason: String| {
        Ok(Parsed::Skipped(SkippedFault {
            index,
            fault_type: fault_type.clone(),
            start_time_sec,
            reason,
        }))
    };

    let kind = match fault_type.as_str() {
        "bearing_wear" => {
            let p: BearingWearParams = params(index, &raw.params)?;
            FaultKind::BearingWear {
                rate_per_sec: p.rate_per_sec,
            }
        }
        "clogging" => {
            let p: CloggingParams = params(index, &raw.params)?;
            let profile = match (p.resistance_factor, p.ramp_rate) {
                (Some(_), Some(_)) => {
                    return Err(invalid(
                        "set either resistance_factor or ramp_rate, not both".into(),
                    ))
                }
                (None, Some(ramp_rate)) => ClogProfile::Ramp { ramp_rate },
                (factor, None) => ClogProfile::Step {
                    resistance_factor: factor.unwrap_or(1.5),
                },
            };
            FaultKind::Clogging { profile }
        }
        "valve_stuck" => {
            let p: ValveStuckParams = params(index, &raw.params)?;
            FaultKind::ValveStuck {
                stuck_value: p.stuck_value,
            }
        }
        "sensor_drift" => {
            let p: SensorDriftParams = params(index, &raw.params)?;
            let Ok(signal) = p.signal.parse::<SignalKind>() else {
                return skip(format!("unknown signal '{}'", p.signal));
            };
            FaultKind::SensorDrift {
                signal,
                drift_rate: p.drift_rate,
            }
        }
        "sensor_stuck" => {
            let p: SensorStuckParams = params(index, &raw.params)?;
            let Some(name) = p.signal else {
                return skip("no signal named".into());
            };
            let Ok(signal) = name.parse::<SignalKind>() else {
                return skip(format!("unknown signal '{name}'"));
            };
            FaultKind::SensorStuck { signal }
        }
        "noise_burst" => {
            let p: NoiseBurstParams = params(index, &raw.params)?;
            let names = match (p.signals, p.signal) {
                (Some(list), _) => list,
                (None, Some(one)) => vec![one],
                (None, None) => vec![SignalKind::VibrationRms.to_string()],
            };
            let mut signals = Vec::with_capacity(names.len());
            for name in names {
                match name.parse::<SignalKind>() {
                    Ok(signal) => signals.push(signal),
                    Err(_) => return skip(format!("unknown signal '{name}'")),
                }
            }
            let duration_sec = raw.duration_sec.or(Some(DEFAULT_NOISE_BURST_SEC));
            return Ok(Parsed::Fault(FaultEvent {
                start_time_sec,
                duration_sec,
                kind: FaultKind::NoiseBurst {
                    signals,
                    multiplier: p.multiplier,
                },
            }));
        }
        other => return skip(format!("unknown fault type '{other}'")),
    };

    Ok(Parsed::Fault(FaultEvent {
        start_time_sec,
        duration_sec: raw.duration_sec,
        kind,
    }))
}

fn params<T: DeserializeOwned>(index: usize, raw: &Map<String, Value>) -> Validation<T> {
    serde_json::from_value(Value::Object(raw.clone())).map_err(|e| ValidationError::InvalidFault {
        index,
        reason: format!("bad params: {e}"),
    })
}

fn validate_fault(fault: &FaultEvent) -> std::result::Result<(), String> {
    if !fault.start_time_sec.is_finite() || fault.start_time_sec < 0.0 {
        return Err("start_time_sec must be a non-negative number".into());
    }
    if let Some(d) = fault.duration_sec {
        if !d.is_finite() || d <= 0.0 {
            return Err("duration_sec must be positive".into());
        }
    }
    let ok = match &fault.kind {
        FaultKind::BearingWear { rate_per_sec } => rate_per_sec.is_finite() && *rate_per_sec >= 0.0,
        FaultKind::Clogging {
            profile: ClogProfile::Step { resistance_factor },
        } => resistance_factor.is_finite() && *resistance_factor >= 1.0,
        FaultKind::Clogging {
            profile: ClogProfile::Ramp { ramp_rate },
        } => ramp_rate.is_finite() && *ramp_rate >= 0.0,
        FaultKind::ValveStuck { stuck_value } => {
            stuck_value.map_or(true, |v| v.is_finite() && (0.0..=100.0).contains(&v))
        }
        FaultKind::SensorDrift { drift_rate, .. } => drift_rate.is_finite(),
        FaultKind::SensorStuck { .. } => true,
        FaultKind::NoiseBurst {
            signals,
            multiplier,
        } => !signals.is_empty() && multiplier.is_finite() && *multiplier >= 1.0,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("parameters out of range for {}", fault.kind.label()))
    }
}

fn parse_setpoint(index: usize, raw: RawSetpoint) -> Validation<Setpoint> {
    let invalid = |reason: &str| ValidationError::InvalidSetpoint {
        index,
        reason: reason.to_owned(),
    };
    let time_sec = raw.time_sec.ok_or_else(|| invalid("missing 'time_sec'"))?;
    let value = raw.value.ok_or_else(|| invalid("missing 'value'"))?;
    let field = match raw.field.as_deref() {
        Some("rpm") => SetpointField::Rpm,
        Some("valve_open_pct") => SetpointField::ValveOpenPct,
        Some(other) => {
            return Err(ValidationError::InvalidSetpoint {
                index,
                reason: format!("unknown field '{other}'"),
            })
        }
        None => return Err(invalid("missing 'field'")),
    };
    Ok(Setpoint {
        time_sec,
        field,
        value,
    })
}

fn validate_setpoint(sp: &Setpoint) -> std::result::Result<(), String> {
    if !sp.time_sec.is_finite() || sp.time_sec < 0.0 {
        return Err("time_sec must be a non-negative number".into());
    }
    let in_range = match sp.field {
        SetpointField::Rpm => sp.value.is_finite() && sp.value >= 0.0,
        SetpointField::ValveOpenPct => sp.value.is_finite() && (0.0..=100.0).contains(&sp.value),
    };
    if in_range {
        Ok(())
    } else {
        Err(format!("value {} out of range", sp.value))
    }
}

fn finite(field: &str, value: f64) -> Validation<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::field(field, "must be finite"))
    }
}

fn non_negative(field: &str, value: f64) -> Validation<()> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::field(field, "must be >= 0"));
    }
    Ok(())
}

fn percentage(field: &str, value: f64) -> Validation<()> {
    finite(field, value)?;
    if !(0.0..=100.0).contains(&value) {
        return Err(ValidationError::field(field, "must be within [0, 100]"));
    }
    Ok(())
}
