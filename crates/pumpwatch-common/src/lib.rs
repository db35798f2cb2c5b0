//! ---
//! pw_section: "01-core-functionality"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Shared primitives and utilities for the pumpwatch runtime."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
//! Core shared primitives for the pumpwatch workspace.
//! This crate exposes daemon configuration loading, tracing setup and the
//! virtual-clock helpers used by both the simulator and the detector.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    ApiConfig, AppConfig, BusConfig, DetectionConfig, LabelPolicy, LoggingConfig, MetricsConfig,
    SimulationConfig,
};
pub use logging::{init_tracing, LogFormat};
