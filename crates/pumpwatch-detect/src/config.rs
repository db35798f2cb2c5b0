//! ---
//! pw_section: "12-detection"
//! pw_subsection: "02-rules"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Typed detector rule set with TOML loading and validation."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use pumpwatch_msg::{Severity, SignalKind};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use thiserror::Error;

/// Rule files that cannot be used.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectorConfigError {
    #[error("unable to read detector rules {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("detector rules are malformed: {0}")]
    Parse(String),
    #[error("rule '{rule}' is invalid: {reason}")]
    InvalidRule { rule: String, reason: String },
}

type ConfigResult<T> = std::result::Result<T, DetectorConfigError>;

fn invalid(rule: impl Into<String>, reason: impl Into<String>) -> DetectorConfigError {
    DetectorConfigError::InvalidRule {
        rule: rule.into(),
        reason: reason.into(),
    }
}

fn default_min_duration() -> f64 {
    10.0
}

fn default_warmup() -> f64 {
    60.0
}

fn default_z_warning() -> f64 {
    4.0
}

fn default_z_critical() -> f64 {
    6.0
}

/// Which side of the bounds counts as a breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    High,
    Low,
    /// `warning` is the lower and `critical` the upper bound.
    Range,
}

/// Static bounds for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdRule {
    pub warning: f64,
    pub critical: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "default_min_duration")]
    pub min_duration_sec: f64,
    #[serde(default)]
    pub recovery_sec: f64,
}

impl ThresholdRule {
    pub fn new(direction: Direction, warning: f64, critical: f64, unit: &str) -> Self {
        Self {
            warning,
            critical,
            unit: unit.to_owned(),
            direction,
            min_duration_sec: default_min_duration(),
            recovery_sec: 0.0,
        }
    }

    /// Breach level of `value`, if any.
    pub fn classify(&self, value: f64) -> Option<Severity> {
        match self.direction {
            Direction::High if value >= self.critical => Some(Severity::Critical),
            Direction::High if value >= self.warning => Some(Severity::Warning),
            Direction::Low if value <= self.critical => Some(Severity::Critical),
            Direction::Low if value <= self.warning => Some(Severity::Warning),
            Direction::Range if value < self.warning || value > self.critical => {
                Some(Severity::Warning)
            }
            _ => None,
        }
    }

    /// Bound crossed at `level`, for evidence.
    pub fn bound(&self, level: Severity, value: f64) -> f64 {
        match (self.direction, level) {
            (Direction::Range, _) if value < self.warning => self.warning,
            (Direction::Range, _) => self.critical,
            (_, Severity::Critical) => self.critical,
            (_, Severity::Warning) => self.warning,
        }
    }

    fn validate(&self, signal: SignalKind) -> ConfigResult<()> {
        let name = format!("thresholds.{signal}");
        if !self.warning.is_finite() || !self.critical.is_finite() {
            return Err(invalid(name, "bounds must be finite"));
        }
        let ordered = match self.direction {
            Direction::High => self.warning <= self.critical,
            Direction::Low => self.warning >= self.critical,
            Direction::Range => self.warning < self.critical,
        };
        if !ordered {
            return Err(invalid(
                name,
                format!("warning {} and critical {} are out of order", self.warning, self.critical),
            ));
        }
        check_durations(&name, self.min_duration_sec, self.recovery_sec)
    }
}

/// Baseline-relative scoring for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptiveRule {
    /// Short window the mean and slope are taken over.
    pub window_sec: f64,
    /// Half-life of the baseline EWMA.
    pub baseline_window_sec: f64,
    #[serde(default = "default_warmup")]
    pub warmup_sec: f64,
    #[serde(default = "default_z_warning")]
    pub z_warning: f64,
    #[serde(default = "default_z_critical")]
    pub z_critical: f64,
    /// Negative values alert on falling trends.
    #[serde(default)]
    pub slope_warning: Option<f64>,
    #[serde(default)]
    pub slope_critical: Option<f64>,
    #[serde(default = "default_min_duration")]
    pub min_duration_sec: f64,
    #[serde(default)]
    pub recovery_sec: f64,
}

impl AdaptiveRule {
    pub fn new(window_sec: f64, baseline_window_sec: f64) -> Self {
        Self {
            window_sec,
            baseline_window_sec,
            warmup_sec: default_warmup(),
            z_warning: default_z_warning(),
            z_critical: default_z_critical(),
            slope_warning: None,
            slope_critical: None,
            min_duration_sec: default_min_duration(),
            recovery_sec: 0.0,
        }
    }

    pub fn with_slope(mut self, warning: f64, critical: f64) -> Self {
        self.slope_warning = Some(warning);
        self.slope_critical = Some(critical);
        self
    }

    pub fn classify_z(&self, z: f64) -> Option<Severity> {
        let magnitude = z.abs();
        if magnitude >= self.z_critical {
            Some(Severity::Critical)
        } else if magnitude >= self.z_warning {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    pub fn classify_slope(&self, slope: f64) -> Option<Severity> {
        let beyond = |limit: f64| {
            if limit < 0.0 {
                slope <= limit
            } else {
                slope >= limit
            }
        };
        if self.slope_critical.is_some_and(beyond) {
            Some(Severity::Critical)
        } else if self.slope_warning.is_some_and(beyond) {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    fn validate(&self, signal: SignalKind) -> ConfigResult<()> {
        let name = format!("adaptive.{signal}");
        for (field, value) in [
            ("window_sec", self.window_sec),
            ("baseline_window_sec", self.baseline_window_sec),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(&name, format!("{field} must be positive")));
            }
        }
        if !self.warmup_sec.is_finite() || self.warmup_sec < 0.0 {
            return Err(invalid(&name, "warmup_sec must be >= 0"));
        }
        if !(self.z_warning > 0.0 && self.z_warning <= self.z_critical && self.z_critical.is_finite())
        {
            return Err(invalid(&name, "z thresholds must satisfy 0 < z_warning <= z_critical"));
        }
        match (self.slope_warning, self.slope_critical) {
            (Some(w), Some(c)) => {
                let ordered = w.is_finite()
                    && c.is_finite()
                    && w != 0.0
                    && w.signum() == c.signum()
                    && w.abs() <= c.abs();
                if !ordered {
                    return Err(invalid(
                        &name,
                        "slope thresholds must share a sign with |warning| <= |critical|",
                    ));
                }
            }
            (Some(limit), None) | (None, Some(limit)) => {
                if !limit.is_finite() || limit == 0.0 {
                    return Err(invalid(&name, "slope threshold must be finite and non-zero"));
                }
            }
            (None, None) => {}
        }
        check_durations(&name, self.min_duration_sec, self.recovery_sec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    Below,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub signal: SignalKind,
    pub op: Comparison,
    pub value: f64,
}

impl Condition {
    pub fn holds(&self, observed: f64) -> bool {
        match self.op {
            Comparison::Above => observed > self.value,
            Comparison::Below => observed < self.value,
        }
    }
}

fn default_combination_severity() -> Severity {
    Severity::Warning
}

fn default_combination_duration() -> f64 {
    20.0
}

/// Multi-signal predicate that must hold for a minimum duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CombinationRule {
    pub name: String,
    pub all: Vec<Condition>,
    #[serde(default = "default_combination_severity")]
    pub severity: Severity,
    #[serde(default = "default_combination_duration")]
    pub min_duration_sec: f64,
    #[serde(default)]
    pub recovery_sec: f64,
    /// Signal whose value is reported as the score; the first condition's when unset.
    #[serde(default)]
    pub score_signal: Option<SignalKind>,
}

impl CombinationRule {
    pub fn describe(&self) -> String {
        self.all
            .iter()
            .map(|c| {
                let op = match c.op {
                    Comparison::Above => ">",
                    Comparison::Below => "<",
                };
                format!("{} {op} {}", c.signal, c.value)
            })
            .collect::<Vec<_>>()
            .join(" && ")
    }

    pub fn score_signal(&self) -> Option<SignalKind> {
        self.score_signal
            .or_else(|| self.all.first().map(|c| c.signal))
    }

    fn validate(&self) -> ConfigResult<()> {
        let name = format!("combinations.{}", self.name);
        if self.name.trim().is_empty() {
            return Err(invalid("combinations", "rule name must not be empty"));
        }
        if self.all.is_empty() {
            return Err(invalid(&name, "needs at least one condition"));
        }
        if self.all.iter().any(|c| !c.value.is_finite()) {
            return Err(invalid(&name, "condition values must be finite"));
        }
        check_durations(&name, self.min_duration_sec, self.recovery_sec)
    }
}

fn check_durations(name: &str, min_duration: f64, recovery: f64) -> ConfigResult<()> {
    if !min_duration.is_finite() || min_duration < 0.0 {
        return Err(invalid(name, "min_duration_sec must be >= 0"));
    }
    if !recovery.is_finite() || recovery < 0.0 {
        return Err(invalid(name, "recovery_sec must be >= 0"));
    }
    Ok(())
}

/// Complete detector rule set. Signal names are map keys.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
    #[serde(default = "default_thresholds")]
    #[serde_as(as = "BTreeMap<DisplayFromStr, _>")]
    pub thresholds: BTreeMap<SignalKind, ThresholdRule>,
    #[serde(default = "default_adaptive")]
    #[serde_as(as = "BTreeMap<DisplayFromStr, _>")]
    pub adaptive: BTreeMap<SignalKind, AdaptiveRule>,
    #[serde(default = "default_combinations")]
    pub combinations: Vec<CombinationRule>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            adaptive: default_adaptive(),
            combinations: default_combinations(),
        }
    }
}

impl DetectorConfig {
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| DetectorConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| DetectorConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (signal, rule) in &self.thresholds {
            rule.validate(*signal)?;
        }
        for (signal, rule) in &self.adaptive {
            rule.validate(*signal)?;
        }
        let mut names = HashSet::new();
        for rule in &self.combinations {
            rule.validate()?;
            if !names.insert(rule.name.as_str()) {
                return Err(invalid(
                    format!("combinations.{}", rule.name),
                    "duplicate rule name",
                ));
            }
        }
        Ok(())
    }

    /// Short window used for `signal`'s statistics.
    pub fn window_sec(&self, signal: SignalKind) -> f64 {
        self.adaptive
            .get(&signal)
            .map_or(DEFAULT_WINDOW_SEC, |rule| rule.window_sec)
    }
}

/// Window for signals without an adaptive rule.
pub const DEFAULT_WINDOW_SEC: f64 = 30.0;

fn default_thresholds() -> BTreeMap<SignalKind, ThresholdRule> {
    use Direction::*;
    BTreeMap::from([
        (SignalKind::VibrationRms, ThresholdRule::new(High, 7.1, 18.0, "mm/s")),
        (SignalKind::BearingTempC, ThresholdRule::new(High, 75.0, 90.0, "degC")),
        (SignalKind::PressureBar, ThresholdRule::new(High, 5.5, 5.8, "bar")),
        (SignalKind::MotorCurrentA, ThresholdRule::new(High, 48.0, 55.0, "A")),
        (SignalKind::TempC, ThresholdRule::new(High, 60.0, 75.0, "degC")),
        (SignalKind::FlowM3h, ThresholdRule::new(Low, 80.0, 50.0, "m3/h")),
        (SignalKind::Rpm, ThresholdRule::new(Range, 2800.0, 3100.0, "rpm")),
    ])
}

fn default_adaptive() -> BTreeMap<SignalKind, AdaptiveRule> {
    BTreeMap::from([
        (
            SignalKind::VibrationRms,
            AdaptiveRule::new(30.0, 1800.0).with_slope(0.03, 0.08),
        ),
        (
            SignalKind::BearingTempC,
            AdaptiveRule::new(30.0, 1800.0).with_slope(0.1, 0.3),
        ),
        (
            SignalKind::FlowM3h,
            AdaptiveRule::new(10.0, 600.0).with_slope(-2.0, -5.0),
        ),
        (
            SignalKind::PressureBar,
            AdaptiveRule::new(10.0, 600.0).with_slope(0.5, 1.0),
        ),
        (
            SignalKind::MotorCurrentA,
            AdaptiveRule::new(10.0, 600.0).with_slope(0.3, 0.8),
        ),
        (SignalKind::TempC, AdaptiveRule::new(30.0, 1800.0)),
    ])
}

fn default_combinations() -> Vec<CombinationRule> {
    vec![CombinationRule {
        name: "valve_flow_mismatch".to_owned(),
        all: vec![
            Condition {
                signal: SignalKind::ValveOpenPct,
                op: Comparison::Above,
                value: 80.0,
            },
            Condition {
                signal: SignalKind::FlowM3h,
                op: Comparison::Below,
                value: 50.0,
            },
        ],
        severity: Severity::Warning,
        min_duration_sec: 20.0,
        recovery_sec: 0.0,
        score_signal: Some(SignalKind::FlowM3h),
    }]
}
