//! ---
//! pw_section: "01-core-functionality"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Runtime helpers supporting the simulator and daemon."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
//! Scheduling helpers for the pumpwatch runtime.

pub mod scheduling;

pub use scheduling::{FixedRateTicker, ServiceGroup, Tick};
