//! ---
//! pw_section: "11-simulation"
//! pw_subsection: "02-engine"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Error types for scenario validation and registry control."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use thiserror::Error;

use crate::executor::ExecutorState;

/// Scenario documents that cannot be installed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("scenario document is malformed: {0}")]
    Malformed(String),
    #[error("scenario is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("scenario field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("fault #{index} is invalid: {reason}")]
    InvalidFault { index: usize, reason: String },
    #[error("setpoint #{index} is invalid: {reason}")]
    InvalidSetpoint { index: usize, reason: String },
    #[error("unable to read scenario {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

impl ValidationError {
    pub(crate) fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Control-surface failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("asset '{asset_id}' has no scenario loaded")]
    NotFound { asset_id: String },
    #[error("asset '{asset_id}' is {state}; cannot {operation}")]
    InvalidState {
        asset_id: String,
        state: ExecutorState,
        operation: &'static str,
    },
    #[error("executor task for asset '{asset_id}' failed: {reason}")]
    ExecutorLost { asset_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, RegistryError>;
