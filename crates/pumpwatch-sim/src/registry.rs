//! ---
//! pw_section: "11-simulation"
//! pw_subsection: "03-control"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Per-asset executor registry behind the control surface."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use pumpwatch_metrics::SimulationMetrics;
use pumpwatch_msg::{ControlAction, ControlEvent, MessageBus};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, Result};
use crate::executor::{
    drive, AssetStatus, DriveContext, ExecutorSettings, ExecutorState, ScenarioExecutor,
    StatusCell,
};
use crate::scenario::ScenarioDefinition;

/// Acknowledgement of a control operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub asset_id: String,
    pub action: ControlAction,
    /// State after the operation.
    pub state: ExecutorState,
}

enum Slot {
    Idle(Box<ScenarioExecutor>),
    Running {
        cancel: watch::Sender<bool>,
        task: JoinHandle<ScenarioExecutor>,
    },
    /// Only after an executor task was lost.
    Empty,
}

struct AssetEntry {
    slot: tokio::sync::Mutex<Slot>,
    status: StatusCell,
}

/// Owns at most one executor per asset.
///
/// The map lock is held only to look up or insert entries; each entry
/// serialises its own operations, so assets never wait on each other.
pub struct SimulationRegistry {
    assets: Mutex<HashMap<String, Arc<AssetEntry>>>,
    bus: Arc<MessageBus>,
    settings: ExecutorSettings,
    metrics: Option<SimulationMetrics>,
}

impl SimulationRegistry {
    pub fn new(bus: Arc<MessageBus>, settings: ExecutorSettings) -> Self {
        Self {
            assets: Mutex::new(HashMap::new()),
            bus,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SimulationMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    fn entry(&self, asset_id: &str) -> Result<Arc<AssetEntry>> {
        self.assets
            .lock()
            .get(asset_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                asset_id: asset_id.to_owned(),
            })
    }

    /// Install a scenario, replacing (and first stopping) any existing one.
    pub async fn load(&self, definition: ScenarioDefinition) -> Result<Ack> {
        definition.validate()?;
        let asset_id = definition.asset_id.clone();
        let scenario = definition.name.clone();
        let executor = ScenarioExecutor::new(definition, self.settings.clone());

        let entry = {
            let mut assets = self.assets.lock();
            assets
                .entry(asset_id.clone())
                .or_insert_with(|| {
                    Arc::new(AssetEntry {
                        slot: tokio::sync::Mutex::new(Slot::Empty),
                        status: Arc::new(RwLock::new(executor.status())),
                    })
                })
                .clone()
        };

        let mut slot = entry.slot.lock().await;
        if halt(&asset_id, &mut slot).await? {
            self.publish(&asset_id, ControlAction::Stopped, None);
            info!(asset_id = %asset_id, "running scenario replaced");
        }
        *entry.status.write() = executor.status();
        *slot = Slot::Idle(Box::new(executor));
        drop(slot);

        info!(asset_id = %asset_id, scenario = %scenario, "scenario loaded");
        self.publish(&asset_id, ControlAction::Loaded, Some(scenario));
        Ok(Ack {
            asset_id,
            action: ControlAction::Loaded,
            state: ExecutorState::Loaded,
        })
    }

    /// Parse and load a scenario document.
    pub async fn load_json(&self, text: &str) -> Result<Ack> {
        let definition = ScenarioDefinition::from_json_str(text)?;
        self.load(definition).await
    }

    pub async fn start(&self, asset_id: &str) -> Result<Ack> {
        let entry = self.entry(asset_id)?;
        let mut slot = entry.slot.lock().await;
        settle(asset_id, &mut slot, &entry.status).await?;

        let mut executor = match std::mem::replace(&mut *slot, Slot::Empty) {
            Slot::Idle(executor) => executor,
            other => {
                let state = entry.status.read().state;
                *slot = other;
                return Err(RegistryError::InvalidState {
                    asset_id: asset_id.to_owned(),
                    state,
                    operation: "start",
                });
            }
        };
        if let Err(err) = executor.begin(Utc::now()) {
            *slot = Slot::Idle(executor);
            return Err(err);
        }
        *entry.status.write() = executor.status();
        let scenario = executor.definition().name.clone();
        self.publish(asset_id, ControlAction::Started, Some(scenario));

        let (cancel, cancel_rx) = watch::channel(false);
        let ctx = DriveContext {
            bus: self.bus.clone(),
            status: entry.status.clone(),
            metrics: self.metrics.clone(),
        };
        let task = tokio::spawn(drive(*executor, ctx, cancel_rx));
        *slot = Slot::Running { cancel, task };
        Ok(Ack {
            asset_id: asset_id.to_owned(),
            action: ControlAction::Started,
            state: ExecutorState::Running,
        })
    }

    /// Stop a running executor. Stopping an idle asset is a no-op.
    pub async fn stop(&self, asset_id: &str) -> Result<Ack> {
        let entry = self.entry(asset_id)?;
        let mut slot = entry.slot.lock().await;
        let stopped = halt(asset_id, &mut slot).await?;
        if let Slot::Idle(executor) = &*slot {
            *entry.status.write() = executor.status();
        }
        drop(slot);

        if stopped {
            info!(asset_id = %asset_id, "scenario stopped");
            self.publish(asset_id, ControlAction::Stopped, None);
        } else {
            debug!(asset_id = %asset_id, "stop on idle asset");
        }
        let state = entry.status.read().state;
        Ok(Ack {
            asset_id: asset_id.to_owned(),
            action: ControlAction::Stopped,
            state,
        })
    }

    /// Return a stopped or completed asset to t = 0.
    pub async fn reset(&self, asset_id: &str) -> Result<Ack> {
        let entry = self.entry(asset_id)?;
        let mut slot = entry.slot.lock().await;
        settle(asset_id, &mut slot, &entry.status).await?;
        match &mut *slot {
            Slot::Idle(executor) => {
                executor.reset()?;
                *entry.status.write() = executor.status();
            }
            Slot::Running { .. } | Slot::Empty => {
                return Err(RegistryError::InvalidState {
                    asset_id: asset_id.to_owned(),
                    state: entry.status.read().state,
                    operation: "reset",
                });
            }
        }
        drop(slot);

        info!(asset_id = %asset_id, "scenario reset");
        self.publish(asset_id, ControlAction::Reset, None);
        Ok(Ack {
            asset_id: asset_id.to_owned(),
            action: ControlAction::Reset,
            state: ExecutorState::Loaded,
        })
    }

    /// Status of one asset, or of all assets ordered by id.
    pub fn status(&self, asset_id: Option<&str>) -> Result<Vec<AssetStatus>> {
        match asset_id {
            Some(id) => Ok(vec![self.entry(id)?.status.read().clone()]),
            None => {
                let mut all: Vec<AssetStatus> = self
                    .assets
                    .lock()
                    .values()
                    .map(|entry| entry.status.read().clone())
                    .collect();
                all.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
                Ok(all)
            }
        }
    }

    pub fn asset_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.assets.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every running executor; used at shutdown.
    pub async fn stop_all(&self) {
        for asset_id in self.asset_ids() {
            if let Err(err) = self.stop(&asset_id).await {
                warn!(asset_id = %asset_id, error = %err, "failed to stop executor");
            }
        }
    }

    fn publish(&self, asset_id: &str, action: ControlAction, scenario: Option<String>) {
        let event = ControlEvent {
            ts: Utc::now(),
            asset_id: asset_id.to_owned(),
            action,
            scenario,
        };
        if let Err(err) = self.bus.publish_control(event) {
            warn!(asset_id = %asset_id, action = %action, error = %err, "control publish failed");
        }
    }
}

async fn join(asset_id: &str, task: JoinHandle<ScenarioExecutor>) -> Result<ScenarioExecutor> {
    task.await.map_err(|err| RegistryError::ExecutorLost {
        asset_id: asset_id.to_owned(),
        reason: err.to_string(),
    })
}

/// Reap a driver task that already finished on its own.
async fn settle(asset_id: &str, slot: &mut Slot, status: &StatusCell) -> Result<()> {
    let finished = matches!(slot, Slot::Running { task, .. } if task.is_finished());
    if !finished {
        return Ok(());
    }
    if let Slot::Running { task, .. } = std::mem::replace(slot, Slot::Empty) {
        let executor = join(asset_id, task).await?;
        *status.write() = executor.status();
        *slot = Slot::Idle(Box::new(executor));
    }
    Ok(())
}

/// Cancel and join a driver task. Returns whether it was still running.
async fn halt(asset_id: &str, slot: &mut Slot) -> Result<bool> {
    match std::mem::replace(slot, Slot::Empty) {
        Slot::Running { cancel, task } => {
            let _ = cancel.send(true);
            let executor = join(asset_id, task).await?;
            let stopped = executor.state() == ExecutorState::Stopped;
            *slot = Slot::Idle(Box::new(executor));
            Ok(stopped)
        }
        other => {
            *slot = other;
            Ok(false)
        }
    }
}
