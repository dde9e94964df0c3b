//! Planning module for stack changes.
//!
//! This module compares the desired dependency graph with recorded state,
//! turns the differences into an ordered plan and applies that plan
//! through a resource provider.

mod diff;
mod plan;
mod executor;

pub use diff::{resolve_properties, DiffEngine, DiffResult, DiffType, PropertyChange, ResourceDiff};
pub use plan::{ChangeAction, ChangeEntry, Plan};
pub use executor::{ApplyReport, EntryOutcome, PlanExecutor, DEFAULT_CONCURRENCY};

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::model::ResourceTypeRegistry;
use crate::state::{ApplyOperation, StateSnapshot};

/// Plans the changes that converge `prior` to `graph`.
///
/// # Errors
///
/// Returns `PlanError::UnsafeReplace` if a replacement would strand a
/// surviving resource.
pub fn plan(
    graph: &DependencyGraph,
    prior: &StateSnapshot,
    registry: &ResourceTypeRegistry,
    config_hash: &str,
) -> Result<Plan> {
    let diff = DiffEngine::new().compute_diff(graph, prior, registry)?;
    if diff.is_empty() && prior.deposed.is_empty() {
        return Ok(Plan::empty(prior, config_hash));
    }
    Ok(Plan::from_diff(&diff, graph, prior, config_hash, ApplyOperation::Apply))
}

/// Plans deletion of everything recorded in `prior`.
///
/// # Errors
///
/// Never fails in practice; shares the error type of [`plan`].
pub fn plan_destroy(prior: &StateSnapshot) -> Result<Plan> {
    let graph = DependencyGraph::empty();
    let diff = DiffEngine::new().compute_diff(&graph, prior, &ResourceTypeRegistry::empty())?;
    Ok(Plan::from_diff(&diff, &graph, prior, "", ApplyOperation::Destroy))
}
