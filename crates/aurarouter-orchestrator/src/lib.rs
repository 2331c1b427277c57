//! Routing pipeline and public surface for AuraRouter.
//!
//! The pipeline is a small state machine per request: **Classify** decides
//! between a direct call and a planned multi-step run, **Plan** expands
//! multi-step tasks, and every stage walks its role's fallback chain with
//! privacy-, health-, and budget-aware skipping. Each request returns (or
//! fails with) the DAG of stage nodes it built along the way.

mod dag;
mod error;
mod executor;
mod fabric;
mod health;
mod pipeline;

pub use dag::{
    Attempt, AttemptOutcome, Classification, DagNode, ExecutionDag, ExecutionResult, NodeStatus,
};
pub use error::{FabricError, FabricFailure};
pub use executor::{BudgetHook, HealthGate, SkipPolicy};
pub use fabric::{Fabric, ModelRunReport};
pub use health::{HealthProber, HealthReport, ProbeOutcome, ServiceState, ServiceStateFn};
