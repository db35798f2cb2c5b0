//! ---
//! pw_section: "11-simulation"
//! pw_subsection: "02-engine"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Scenario executor state machine and its fixed-rate async driver."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pumpwatch_common::time::offset_secs;
use pumpwatch_common::LabelPolicy;
use pumpwatch_metrics::SimulationMetrics;
use pumpwatch_msg::{ControlAction, ControlEvent, MessageBus, TelemetrySample};
use pumpwatch_rt::FixedRateTicker;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, Result};
use crate::faults::FaultInjector;
use crate::model::{PhysicalStateModel, SetpointSchedule};
use crate::scenario::ScenarioDefinition;
use crate::state::InternalState;

/// Upper bound on the sample buffer reserved up front by `run_to_end`.
const MAX_PREALLOCATED: u64 = 1 << 16;

/// Lifecycle of one executor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutorState {
    Loaded,
    Running,
    Stopped,
    Completed,
}

/// Point-in-time view of an asset, readable without touching the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetStatus {
    pub asset_id: String,
    pub plant_id: String,
    pub scenario_name: String,
    pub state: ExecutorState,
    pub running: bool,
    pub current_time_sec: f64,
    pub duration_sec: f64,
    pub samples_emitted: u64,
}

/// Shared snapshot cell updated by the driver after every tick.
pub type StatusCell = Arc<RwLock<AssetStatus>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    /// Simulated seconds per tick; also the wall-clock tick period.
    pub tick_period: Duration,
    pub label_policy: LabelPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            label_policy: LabelPolicy::default(),
        }
    }
}

/// Owns one asset's simulated state and produces its samples in order.
#[derive(Debug)]
pub struct ScenarioExecutor {
    definition: Arc<ScenarioDefinition>,
    settings: ExecutorSettings,
    state: ExecutorState,
    model: PhysicalStateModel,
    physical: InternalState,
    injector: FaultInjector,
    setpoints: SetpointSchedule,
    tick: u64,
    total_ticks: u64,
    anchor: Option<DateTime<Utc>>,
}

impl ScenarioExecutor {
    pub fn new(definition: ScenarioDefinition, settings: ExecutorSettings) -> Self {
        let definition = Arc::new(definition);
        let dt = settings.tick_period.as_secs_f64();
        let total_ticks = ((definition.duration_sec / dt) - 1e-9).ceil().max(1.0) as u64;
        let (model, physical, injector, setpoints) = fresh_run(&definition, &settings);
        Self {
            definition,
            settings,
            state: ExecutorState::Loaded,
            model,
            physical,
            injector,
            setpoints,
            tick: 0,
            total_ticks,
            anchor: None,
        }
    }

    pub fn definition(&self) -> &ScenarioDefinition {
        &self.definition
    }

    pub fn asset_id(&self) -> &str {
        &self.definition.asset_id
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    fn dt(&self) -> f64 {
        self.settings.tick_period.as_secs_f64()
    }

    pub fn current_time_sec(&self) -> f64 {
        (self.tick as f64 * self.dt()).min(self.definition.duration_sec)
    }

    pub fn samples_emitted(&self) -> u64 {
        self.tick
    }

    pub fn status(&self) -> AssetStatus {
        AssetStatus {
            asset_id: self.definition.asset_id.clone(),
            plant_id: self.definition.plant_id.clone(),
            scenario_name: self.definition.name.clone(),
            state: self.state,
            running: self.state == ExecutorState::Running,
            current_time_sec: self.current_time_sec(),
            duration_sec: self.definition.duration_sec,
            samples_emitted: self.tick,
        }
    }

    fn invalid(&self, operation: &'static str) -> RegistryError {
        RegistryError::InvalidState {
            asset_id: self.definition.asset_id.clone(),
            state: self.state,
            operation,
        }
    }

    /// `Loaded -> Running`. Timestamps anchor at `start_ts` or `now`.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != ExecutorState::Loaded {
            return Err(self.invalid("start"));
        }
        self.anchor = Some(self.definition.start_ts.unwrap_or(now));
        self.state = ExecutorState::Running;
        Ok(())
    }

    /// Produce the next sample, or `None` when not running.
    pub fn step(&mut self) -> Option<TelemetrySample> {
        if self.state != ExecutorState::Running {
            return None;
        }
        let anchor = self.anchor?;
        let dt = self.dt();
        let t = self.tick as f64 * dt;

        self.setpoints.apply_due(t, &mut self.physical);
        self.injector.apply(&mut self.physical, t);
        let (_, mut measured) = self.model.advance(&mut self.physical, dt);
        self.injector.apply_sensor_overrides(t, &mut measured);

        let sample = TelemetrySample {
            ts: offset_secs(anchor, t),
            plant_id: self.definition.plant_id.clone(),
            asset_id: self.definition.asset_id.clone(),
            signals: measured,
            truth: self.injector.truth(t),
            warnings: self.injector.take_warnings(t),
        };

        self.tick += 1;
        if self.tick >= self.total_ticks {
            self.state = ExecutorState::Completed;
        }
        Some(sample)
    }

    /// Any state -> `Stopped`, except that a finished run stays `Completed`.
    pub fn mark_stopped(&mut self) {
        if matches!(self.state, ExecutorState::Loaded | ExecutorState::Running) {
            self.state = ExecutorState::Stopped;
        }
    }

    /// `Stopped | Completed -> Loaded` at t = 0 with the original seed.
    pub fn reset(&mut self) -> Result<()> {
        if !matches!(self.state, ExecutorState::Stopped | ExecutorState::Completed) {
            return Err(self.invalid("reset"));
        }
        let (model, physical, injector, setpoints) = fresh_run(&self.definition, &self.settings);
        self.model = model;
        self.physical = physical;
        self.injector = injector;
        self.setpoints = setpoints;
        self.tick = 0;
        self.anchor = None;
        self.state = ExecutorState::Loaded;
        Ok(())
    }

    /// Drive the whole run in virtual time.
    pub fn run_to_end(&mut self, now: DateTime<Utc>) -> Result<Vec<TelemetrySample>> {
        if self.state == ExecutorState::Loaded {
            self.begin(now)?;
        }
        let remaining = self.total_ticks.saturating_sub(self.tick);
        let mut samples = Vec::with_capacity(remaining.min(MAX_PREALLOCATED) as usize);
        while let Some(sample) = self.step() {
            samples.push(sample);
        }
        Ok(samples)
    }
}

fn fresh_run(
    definition: &ScenarioDefinition,
    settings: &ExecutorSettings,
) -> (PhysicalStateModel, InternalState, FaultInjector, SetpointSchedule) {
    let model = PhysicalStateModel::new(definition.seed);
    let physical = model.initial_state(&definition.initial_conditions);
    let injector = FaultInjector::new(
        definition.faults.clone(),
        definition.skipped_faults.clone(),
        settings.label_policy,
        definition.initial_conditions.bearing_wear,
    );
    let setpoints = SetpointSchedule::new(definition.setpoints.clone());
    (model, physical, injector, setpoints)
}

/// Collaborators shared by every driver task.
#[derive(Clone)]
pub struct DriveContext {
    pub bus: Arc<MessageBus>,
    pub status: StatusCell,
    pub metrics: Option<SimulationMetrics>,
}

/// Tick a running executor until it completes or `cancel` flips to `true`.
///
/// Publish failures are logged and counted; the run keeps going. The
/// executor is handed back so the owner can inspect or reset it.
pub async fn drive(
    mut executor: ScenarioExecutor,
    ctx: DriveContext,
    mut cancel: watch::Receiver<bool>,
) -> ScenarioExecutor {
    let asset_id = executor.asset_id().to_owned();
    let mut ticker = FixedRateTicker::new(executor.settings().tick_period);
    if let Some(metrics) = &ctx.metrics {
        metrics.executor_started();
    }
    info!(asset_id = %asset_id, scenario = %executor.definition().name, "executor running");

    loop {
        tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    executor.mark_stopped();
                    debug!(asset_id = %asset_id, "executor cancelled");
                    break;
                }
            }
            tick = ticker.tick() => {
                if let Some(metrics) = &ctx.metrics {
                    metrics.observe_lateness(tick.lateness);
                }
                let Some(sample) = executor.step() else {
                    break;
                };
                if let Some(metrics) = &ctx.metrics {
                    metrics.record_sample(&asset_id);
                }
                if let Err(err) = ctx.bus.publish_telemetry(sample) {
                    warn!(asset_id = %asset_id, tick = tick.index, error = %err, "telemetry publish failed");
                    if let Some(metrics) = &ctx.metrics {
                        metrics.record_publish_failure(&asset_id);
                    }
                }
                *ctx.status.write() = executor.status();
                if executor.state() == ExecutorState::Completed {
                    info!(asset_id = %asset_id, samples = executor.samples_emitted(), "scenario completed");
                    let event = ControlEvent {
                        ts: Utc::now(),
                        asset_id: asset_id.clone(),
                        action: ControlAction::Completed,
                        scenario: Some(executor.definition().name.clone()),
                    };
                    if let Err(err) = ctx.bus.publish_control(event) {
                        warn!(asset_id = %asset_id, error = %err, "control publish failed");
                    }
                    break;
                }
            }
        }
    }

    *ctx.status.write() = executor.status();
    if let Some(metrics) = &ctx.metrics {
        metrics.executor_finished();
    }
    executor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pumpwatch_msg::FaultLabel;
    use serde_json::json;

    fn definition(value: serde_json::Value) -> ScenarioDefinition {
        ScenarioDefinition::from_value(value).unwrap()
    }

    fn healthy() -> ScenarioDefinition {
        definition(json!({"name": "healthy", "seed": 12345, "duration_sec": 60}))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn emits_one_sample_per_second_then_completes() {
        let mut exec = ScenarioExecutor::new(healthy(), ExecutorSettings::default());
        let samples = exec.run_to_end(t0()).unwrap();
        assert_eq!(samples.len(), 60);
        assert_eq!(exec.state(), ExecutorState::Completed);
        assert_eq!(exec.current_time_sec(), 60.0);
        assert_eq!(samples[1].ts - samples[0].ts, chrono::Duration::seconds(1));
        assert!(samples.iter().all(|s| s.truth.fault == FaultLabel::None));
        assert!(exec.step().is_none());
    }

    #[test]
    fn reset_replays_identical_values() {
        let mut exec = ScenarioExecutor::new(healthy(), ExecutorSettings::default());
        let first = exec.run_to_end(t0()).unwrap();
        exec.reset().unwrap();
        assert_eq!(exec.state(), ExecutorState::Loaded);
        assert_eq!(exec.current_time_sec(), 0.0);
        let second = exec.run_to_end(t0()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn start_ts_anchors_timestamps() {
        let def = definition(json!({
            "name": "anchored", "seed": 1, "duration_sec": 3,
            "start_ts": "2024-01-01T00:00:00Z"
        }));
        let mut exec = ScenarioExecutor::new(def, ExecutorSettings::default());
        let samples = exec.run_to_end(t0()).unwrap();
        assert_eq!(samples[0].ts, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(samples[2].ts, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 2).unwrap());
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut exec = ScenarioExecutor::new(healthy(), ExecutorSettings::default());
        assert!(matches!(
            exec.reset(),
            Err(RegistryError::InvalidState { state: ExecutorState::Loaded, .. })
        ));
        exec.begin(t0()).unwrap();
        assert!(exec.begin(t0()).is_err());
        assert!(exec.reset().is_err());
        exec.step();
        exec.mark_stopped();
        assert_eq!(exec.state(), ExecutorState::Stopped);
        assert!(exec.step().is_none());
        assert_eq!(exec.samples_emitted(), 1);
    }

    #[test]
    fn clogging_drops_flow_from_onset() {
        let def = definition(json!({
            "name": "clog", "seed": 12345, "duration_sec": 30,
            "faults": [{"type": "clogging", "start_time_sec": 10, "params": {"resistance_factor": 3.5}}]
        }));
        let mut exec = ScenarioExecutor::new(def, ExecutorSettings::default());
        let samples = exec.run_to_end(t0()).unwrap();
        let flow = |i: usize| samples[i].signals.flow_m3h.unwrap();
        assert!(flow(9) > 97.0);
        assert!(flow(10) < 63.0);
        assert_eq!(samples[9].truth.fault, FaultLabel::None);
        assert_eq!(samples[10].truth.fault, FaultLabel::Clogging);
    }

    #[test]
    fn skipped_fault_warns_on_its_start_tick() {
        let def = definition(json!({
            "name": "odd", "seed": 1, "duration_sec": 10,
            "faults": [{"type": "cavitation", "start_time_sec": 4}]
        }));
        let mut exec = ScenarioExecutor::new(def, ExecutorSettings::default());
        let samples = exec.run_to_end(t0()).unwrap();
        let warned: Vec<_> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.warnings.is_empty())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(warned, vec![4]);
    }

    #[test]
    fn fractional_duration_rounds_up() {
        let def = definition(json!({"name": "short", "seed": 1, "duration_sec": 2.5}));
        let mut exec = ScenarioExecutor::new(def, ExecutorSettings::default());
        assert_eq!(exec.run_to_end(t0()).unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn drive_publishes_until_complete() {
        use pumpwatch_msg::{InMemoryTransport, TopicKind};

        let memory = Arc::new(InMemoryTransport::new());
        let mut sub = memory.subscribe(&[TopicKind::Telemetry, TopicKind::Control]);
        let mut bus = MessageBus::new();
        bus.register_transport(memory.clone());

        let def = definition(json!({"name": "short", "seed": 1, "duration_sec": 5}));
        let mut exec = ScenarioExecutor::new(def, ExecutorSettings::default());
        exec.begin(Utc::now()).unwrap();
        let status = Arc::new(RwLock::new(exec.status()));
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = DriveContext {
            bus: Arc::new(bus),
            status: status.clone(),
            metrics: None,
        };

        let exec = drive(exec, ctx, cancel_rx).await;
        assert_eq!(exec.state(), ExecutorState::Completed);
        assert_eq!(status.read().samples_emitted, 5);
        assert_eq!(sub.drain().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn drive_stops_on_cancel() {
        let def = definition(json!({"name": "long", "seed": 1, "duration_sec": 3600}));
        let mut exec = ScenarioExecutor::new(def, ExecutorSettings::default());
        exec.begin(Utc::now()).unwrap();
        let status = Arc::new(RwLock::new(exec.status()));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = DriveContext {
            bus: Arc::new(MessageBus::new()),
            status: status.clone(),
            metrics: None,
        };
        let task = tokio::spawn(drive(exec, ctx, cancel_rx));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel_tx.send(true).unwrap();
        let exec = task.await.unwrap();
        assert_eq!(exec.state(), ExecutorState::Stopped);
        assert_eq!(exec.samples_emitted(), 3);
        assert!(!status.read().running);
    }
}
