//! ---
//! pw_section: "02-messaging-ipc-data-model"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Wire model for telemetry, alerts and lifecycle events."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BusError, Result};

/// Plant identifier used when a scenario does not name one.
pub const DEFAULT_PLANT_ID: &str = "plant01";
/// Asset identifier used when a scenario does not name one.
pub const DEFAULT_ASSET_ID: &str = "pump01";

/// Observable signals reported by every asset, in canonical order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum SignalKind {
    /// Discharge pressure after the control valve.
    #[serde(rename = "pressure_bar")]
    #[strum(serialize = "pressure_bar")]
    PressureBar,
    /// Volumetric flow.
    #[serde(rename = "flow_m3h")]
    #[strum(serialize = "flow_m3h")]
    FlowM3h,
    /// Fluid temperature.
    #[serde(rename = "temp_c")]
    #[strum(serialize = "temp_c")]
    TempC,
    /// Drive-end bearing temperature.
    #[serde(rename = "bearing_temp_c")]
    #[strum(serialize = "bearing_temp_c")]
    BearingTempC,
    /// Overall vibration velocity RMS in mm/s.
    #[serde(rename = "vibration_rms")]
    #[strum(serialize = "vibration_rms")]
    VibrationRms,
    /// Shaft speed.
    #[serde(rename = "rpm")]
    #[strum(serialize = "rpm")]
    Rpm,
    /// Motor phase current.
    #[serde(rename = "motor_current_a")]
    #[strum(serialize = "motor_current_a")]
    MotorCurrentA,
    /// Reported valve opening.
    #[serde(rename = "valve_open_pct")]
    #[strum(serialize = "valve_open_pct")]
    ValveOpenPct,
}

impl SignalKind {
    /// Number of signal kinds.
    pub const COUNT: usize = 8;

    /// All signals in canonical order.
    pub const ALL: [SignalKind; SignalKind::COUNT] = [
        SignalKind::PressureBar,
        SignalKind::FlowM3h,
        SignalKind::TempC,
        SignalKind::BearingTempC,
        SignalKind::VibrationRms,
        SignalKind::Rpm,
        SignalKind::MotorCurrentA,
        SignalKind::ValveOpenPct,
    ];

    /// Position of the signal in [`SignalKind::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Engineering unit of the signal.
    pub fn unit(self) -> &'static str {
        match self {
            SignalKind::PressureBar => "bar",
            SignalKind::FlowM3h => "m3/h",
            SignalKind::TempC | SignalKind::BearingTempC => "degC",
            SignalKind::VibrationRms => "mm/s",
            SignalKind::Rpm => "rpm",
            SignalKind::MotorCurrentA => "A",
            SignalKind::ValveOpenPct => "%",
        }
    }
}

/// One reading per signal. Absent readings deserialize as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalReadings {
    /// See [`SignalKind::PressureBar`].
    #[serde(default)]
    pub pressure_bar: Option<f64>,
    /// See [`SignalKind::FlowM3h`].
    #[serde(default)]
    pub flow_m3h: Option<f64>,
    /// See [`SignalKind::TempC`].
    #[serde(default)]
    pub temp_c: Option<f64>,
    /// See [`SignalKind::BearingTempC`].
    #[serde(default)]
    pub bearing_temp_c: Option<f64>,
    /// See [`SignalKind::VibrationRms`].
    #[serde(default)]
    pub vibration_rms: Option<f64>,
    /// See [`SignalKind::Rpm`].
    #[serde(default)]
    pub rpm: Option<f64>,
    /// See [`SignalKind::MotorCurrentA`].
    #[serde(default)]
    pub motor_current_a: Option<f64>,
    /// See [`SignalKind::ValveOpenPct`].
    #[serde(default)]
    pub valve_open_pct: Option<f64>,
}

impl SignalReadings {
    /// Build a fully populated reading set from canonical-order values.
    pub fn from_array(values: [f64; SignalKind::COUNT]) -> Self {
        let mut readings = Self::default();
        for kind in SignalKind::ALL {
            readings.set(kind, values[kind.index()]);
        }
        readings
    }

    /// Reading for `kind`, if present.
    pub fn get(&self, kind: SignalKind) -> Option<f64> {
        match kind {
            SignalKind::PressureBar => self.pressure_bar,
            SignalKind::FlowM3h => self.flow_m3h,
            SignalKind::TempC => self.temp_c,
            SignalKind::BearingTempC => self.bearing_temp_c,
            SignalKind::VibrationRms => self.vibration_rms,
            SignalKind::Rpm => self.rpm,
            SignalKind::MotorCurrentA => self.motor_current_a,
            SignalKind::ValveOpenPct => self.valve_open_pct,
        }
    }

    /// Set the reading for `kind`.
    pub fn set(&mut self, kind: SignalKind, value: f64) {
        let slot = match kind {
            SignalKind::PressureBar => &mut self.pressure_bar,
            SignalKind::FlowM3h => &mut self.flow_m3h,
            SignalKind::TempC => &mut self.temp_c,
            SignalKind::BearingTempC => &mut self.bearing_temp_c,
            SignalKind::VibrationRms => &mut self.vibration_rms,
            SignalKind::Rpm => &mut self.rpm,
            SignalKind::MotorCurrentA => &mut self.motor_current_a,
            SignalKind::ValveOpenPct => &mut self.valve_open_pct,
        };
        *slot = Some(value);
    }

    /// Present readings in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (SignalKind, f64)> + '_ {
        SignalKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|value| (kind, value)))
    }
}

/// Ground-truth fault label asserted by the simulator.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FaultLabel {
    /// No fault active.
    #[default]
    None,
    /// Progressive bearing damage.
    BearingWear,
    /// Increased line resistance.
    Clogging,
    /// Valve no longer follows its setpoint.
    ValveStuck,
    /// Linearly growing measurement bias.
    SensorDrift,
    /// Frozen measurement.
    SensorStuck,
    /// Temporarily amplified measurement noise.
    NoiseBurst,
}

/// Label and severity in `[0, 1]` attached to every sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GroundTruth {
    /// Winning fault label.
    #[serde(default)]
    pub fault: FaultLabel,
    /// Severity of the winning fault.
    #[serde(default)]
    pub severity: f64,
}

impl GroundTruth {
    /// Healthy truth.
    pub fn healthy() -> Self {
        Self::default()
    }

    /// Whether a fault is asserted.
    pub fn is_faulty(&self) -> bool {
        self.fault != FaultLabel::None
    }
}

/// One tick of one asset, as published on `telemetry/{asset_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Virtual-clock timestamp of the tick.
    pub ts: DateTime<Utc>,
    /// Plant the asset belongs to.
    pub plant_id: String,
    /// Asset that produced the sample.
    pub asset_id: String,
    /// Measured signals.
    #[serde(default)]
    pub signals: SignalReadings,
    /// Simulator ground truth.
    #[serde(default)]
    pub truth: GroundTruth,
    /// Non-fatal notices raised on this tick, such as skipped faults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Alert severity. Ordered so that `Critical > Warning`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    /// Attention required.
    Warning,
    /// Immediate action required.
    Critical,
}

/// Detection method that produced an alert detail.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DetectionMethod {
    /// Static bound.
    Threshold,
    /// Window mean against the adaptive baseline.
    Zscore,
    /// Least-squares trend over the window.
    Slope,
    /// Multi-signal predicate.
    Combination,
    /// Operator or test injection.
    Manual,
}

/// Supporting numbers for an alert detail. Only relevant fields are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertEvidence {
    /// Latest value of the signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Bound or z/slope threshold that was crossed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Window mean.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    /// Window standard deviation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    /// Window least-squares slope per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
    /// Seconds the condition had held when the alert fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    /// z-score of the window mean.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    /// Adaptive baseline mean.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_mean: Option<f64>,
    /// Adaptive baseline standard deviation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_std: Option<f64>,
    /// Set for alerts injected through the manual trigger.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub manual_trigger: bool,
    /// Free-form context, e.g. the combination rule predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A single signal-level finding inside an [`AlertEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDetail {
    /// Signal name, or the combination rule name.
    pub signal: String,
    /// Method-specific score (value, z, slope).
    pub score: f64,
    /// Method that produced the detail.
    pub method: DetectionMethod,
    /// Window length the evidence was computed over.
    #[serde(default)]
    pub window_sec: u32,
    /// Supporting numbers.
    #[serde(default)]
    pub evidence: AlertEvidence,
}

/// Alert published on `alerts/{asset_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Timestamp of the sample that triggered the alert.
    pub ts: DateTime<Utc>,
    /// Plant the asset belongs to.
    pub plant_id: String,
    /// Asset under alert.
    pub asset_id: String,
    /// Maximum severity across `alerts`.
    pub severity: Severity,
    /// Findings grouped into this event.
    pub alerts: Vec<AlertDetail>,
    /// Correlation identifier assigned by the aggregator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<Uuid>,
}

/// Executor lifecycle transitions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ControlAction {
    /// Scenario installed.
    Loaded,
    /// Ticking started.
    Started,
    /// Ticking stopped on request.
    Stopped,
    /// Scenario ran to its duration.
    Completed,
    /// Executor rewound to t=0; detector state for the asset is cleared.
    Reset,
}

/// Lifecycle notice published on `control/{asset_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    /// Wall-clock time of the transition.
    pub ts: DateTime<Utc>,
    /// Asset concerned.
    pub asset_id: String,
    /// Transition.
    pub action: ControlAction,
    /// Scenario name, when one is installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
}

/// Topic families.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum TopicKind {
    /// `telemetry/{asset_id}`
    Telemetry,
    /// `alerts/{asset_id}`
    Alerts,
    /// `control/{asset_id}`
    Control,
}

/// A concrete topic such as `telemetry/pump01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    /// Topic family.
    pub kind: TopicKind,
    /// Asset segment.
    pub asset_id: String,
}

impl Topic {
    /// Construct a topic.
    pub fn new(kind: TopicKind, asset_id: impl Into<String>) -> Self {
        Self {
            kind,
            asset_id: asset_id.into(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.asset_id)
    }
}

impl FromStr for Topic {
    type Err = BusError;

    fn from_str(raw: &str) -> Result<Self> {
        let (kind, asset) = raw
            .split_once('/')
            .ok_or_else(|| BusError::InvalidTopic(raw.to_owned()))?;
        let kind = kind
            .parse::<TopicKind>()
            .map_err(|_| BusError::InvalidTopic(raw.to_owned()))?;
        if asset.is_empty() || asset.contains('/') {
            return Err(BusError::InvalidTopic(raw.to_owned()));
        }
        Ok(Topic::new(kind, asset))
    }
}

/// Typed payload carried by a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Telemetry sample.
    Telemetry(TelemetrySample),
    /// Alert event.
    Alert(AlertEvent),
    /// Lifecycle event.
    Control(ControlEvent),
}

/// A payload addressed to a topic. Serialized to JSON only at transport edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Destination topic.
    pub topic: Topic,
    /// Typed payload.
    pub payload: Payload,
}

impl Message {
    /// Telemetry message for the sample's asset.
    pub fn telemetry(sample: TelemetrySample) -> Self {
        Self {
            topic: Topic::new(TopicKind::Telemetry, sample.asset_id.clone()),
            payload: Payload::Telemetry(sample),
        }
    }

    /// Alert message for the event's asset.
    pub fn alert(event: AlertEvent) -> Self {
        Self {
            topic: Topic::new(TopicKind::Alerts, event.asset_id.clone()),
            payload: Payload::Alert(event),
        }
    }

    /// Control message for the event's asset.
    pub fn control(event: ControlEvent) -> Self {
        Self {
            topic: Topic::new(TopicKind::Control, event.asset_id.clone()),
            payload: Payload::Control(event),
        }
    }

    /// Topic family of the message.
    pub fn kind(&self) -> TopicKind {
        self.topic.kind
    }

    /// Payload as a JSON value, exactly as it appears on the wire.
    pub fn payload_json(&self) -> Result<serde_json::Value> {
        let value = match &self.payload {
            Payload::Telemetry(sample) => serde_json::to_value(sample)?,
            Payload::Alert(event) => serde_json::to_value(event)?,
            Payload::Control(event) => serde_json::to_value(event)?,
        };
        Ok(value)
    }

    /// Payload serialized as a compact JSON string.
    pub fn payload_string(&self) -> Result<String> {
        let text = match &self.payload {
            Payload::Telemetry(sample) => serde_json::to_string(sample)?,
            Payload::Alert(event) => serde_json::to_string(event)?,
            Payload::Control(event) => serde_json::to_string(event)?,
        };
        Ok(text)
    }

    /// Rebuild a message from a topic string and its JSON payload.
    pub fn from_wire(topic: &str, payload: &str) -> Result<Self> {
        let topic: Topic = topic.parse()?;
        let payload = match topic.kind {
            TopicKind::Telemetry => Payload::Telemetry(serde_json::from_str(payload)?),
            TopicKind::Alerts => Payload::Alert(serde_json::from_str(payload)?),
            TopicKind::Control => Payload::Control(serde_json::from_str(payload)?),
        };
        Ok(Self { topic, payload })
    }
}
