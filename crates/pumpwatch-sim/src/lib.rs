//! ---
//! pw_section: "11-simulation"
//! pw_subsection: "01-bootstrap"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Seeded pump simulation: physics, faults, executors and registry."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
//! Deterministic pump simulation with fault injection.
//!
//! A [`ScenarioDefinition`] describes one asset run. A [`ScenarioExecutor`]
//! owns that asset's [`InternalState`] and turns it into telemetry one tick
//! at a time, and the [`SimulationRegistry`] runs many executors side by
//! side behind the control operations.

pub mod error;
pub mod executor;
pub mod faults;
pub mod model;
pub mod registry;
pub mod scenario;
pub mod state;

pub use error::{RegistryError, Result, ValidationError};
pub use executor::{
    drive, AssetStatus, DriveContext, ExecutorSettings, ExecutorState, ScenarioExecutor,
    StatusCell,
};
pub use faults::FaultInjector;
pub use model::{
    iso_vibration_grade, NoiseProfile, OperatingPoint, PhysicalStateModel, PumpParameters,
    SetpointSchedule, VibrationGrade,
};
pub use registry::{Ack, SimulationRegistry};
pub use scenario::{
    ClogProfile, FaultEvent, FaultKind, InitialConditions, ScenarioDefinition, Setpoint,
    SetpointField, SkippedFault, MAX_DURATION_SEC,
};
pub use state::InternalState;
