//! Orchestrator error surface.

use crate::dag::{Attempt, ExecutionDag};
use aurarouter_core::{AssetError, ConfigError, RoleError};
use thiserror::Error;

/// The closed set of pipeline-level failures.
#[derive(Debug, Error)]
pub enum FabricError {
    /// The requested role is neither canonical nor a known synonym.
    #[error("role_unknown: '{0}'")]
    RoleUnknown(String),

    /// A role the pipeline needs has no (non-empty) chain configured.
    #[error("role_missing: '{0}'")]
    RoleMissing(String),

    /// A stage exhausted its fallback chain. The attempt log explains what
    /// happened to each model.
    #[error("all_failed at stage '{stage}' after {} attempts", attempts.len())]
    AllFailed { stage: String, attempts: Vec<Attempt> },

    /// Privacy skipping eliminated every model in the stage's chain.
    #[error("pii_no_viable_model at stage '{0}'")]
    PiiNoViableModel(String),

    /// The caller's cancellation signal fired.
    #[error("cancelled at stage '{0}'")]
    Cancelled(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Asset(#[from] AssetError),
}

impl FabricError {
    /// The stable error-kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            FabricError::RoleUnknown(_) => "role_unknown",
            FabricError::RoleMissing(_) => "role_missing",
            FabricError::AllFailed { .. } => "all_failed",
            FabricError::PiiNoViableModel(_) => "pii_no_viable_model",
            FabricError::Cancelled(_) => "cancelled",
            FabricError::Config(_) => "config_invalid",
            FabricError::Asset(_) => "asset",
        }
    }
}

impl From<RoleError> for FabricError {
    fn from(error: RoleError) -> Self {
        match error {
            RoleError::Unknown(name) => FabricError::RoleUnknown(name),
        }
    }
}

/// A pipeline failure carrying whatever DAG was built before the pipeline
/// stopped, so operators can see where execution halted.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct FabricFailure {
    pub error: FabricError,
    pub dag: ExecutionDag,
}

impl FabricFailure {
    pub fn new(error: impl Into<FabricError>, dag: ExecutionDag) -> Self {
        Self { error: error.into(), dag }
    }
}
