//! Plan executor for applying plans through a resource provider.
//!
//! Entries start once every entry they depend on has completed; ready
//! entries are started lowest index first, at most `concurrency` at a time.
//! A failure or a cancellation stops new entries from starting while the
//! ones already in flight run to completion. Nothing is rolled back: the
//! snapshot returned (directly or inside the error) records exactly the
//! entries that succeeded.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{ApplyError, PlanError, Result, StackformError};
use crate::model::{ResolvedProperties, ResourceNode};
use crate::provider::ResourceProvider;
use crate::state::{ApplyHistoryEntry, ResourceState, StateSnapshot};

use super::diff::resolve_properties;
use super::plan::{ChangeAction, ChangeEntry, Plan};

/// Concurrency used when none is configured.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Executor for plans.
pub struct PlanExecutor {
    /// Resource provider.
    provider: Arc<dyn ResourceProvider>,
    /// Maximum number of entries in flight.
    concurrency: usize,
    /// Cancellation signal; `true` means stop starting entries.
    cancel: Option<watch::Receiver<bool>>,
}

/// Result of executing a single entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryOutcome {
    /// Entry index in the plan.
    pub index: usize,
    /// Action that was executed.
    pub action: ChangeAction,
    /// Resource id.
    pub resource: String,
    /// Provider id created, updated or deleted.
    pub provider_id: String,
    /// False when nothing needed to be sent to the provider.
    pub provider_called: bool,
}

/// Result of executing an entire plan.
#[derive(Debug)]
pub struct ApplyReport {
    /// Resulting state.
    pub snapshot: StateSnapshot,
    /// Completed entries in completion order.
    pub outcomes: Vec<EntryOutcome>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("provider", &self.provider.name())
            .field("concurrency", &self.concurrency)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl PlanExecutor {
    /// Creates a new plan executor.
    #[must_use]
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            provider,
            concurrency: DEFAULT_CONCURRENCY,
            cancel: None,
        }
    }

    /// Sets the maximum number of entries in flight (at least 1).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Stops starting entries once `cancel` turns `true`.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Applies `plan` on top of `prior`.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::StalePlan` if `prior` is not the state the plan
    /// was computed against, `ApplyError::PartialApply` if an entry fails
    /// and `ApplyError::Cancelled` if the run was cancelled before every
    /// entry started. Both apply errors carry the resulting snapshot.
    pub async fn apply(&self, plan: &Plan, prior: &StateSnapshot) -> Result<ApplyReport> {
        if plan.stack != prior.stack {
            return Err(StackformError::internal(format!(
                "plan for stack '{}' applied to state of '{}'",
                plan.stack, prior.stack
            )));
        }
        if plan.prior_serial != prior.serial {
            return Err(PlanError::StalePlan {
                stack: plan.stack.clone(),
                planned: plan.prior_serial,
                current: prior.serial,
            }
            .into());
        }

        let started_at = Instant::now();
        if plan.is_empty() {
            info!("Plan for {} is empty, nothing to apply", plan.stack);
            return Ok(ApplyReport {
                snapshot: prior.clone(),
                outcomes: vec![],
                duration: started_at.elapsed(),
            });
        }

        let total = plan.entries.len();
        info!(
            "Applying {total} entries to {} via {} provider (concurrency {})",
            plan.stack,
            self.provider.name(),
            self.concurrency
        );

        let snapshot = Arc::new(Mutex::new(prior.clone()));
        let mut waiting: Vec<BTreeSet<usize>> = plan
            .entries
            .iter()
            .map(|e| e.depends_on.iter().copied().collect())
            .collect();
        let mut ready: BTreeSet<usize> = (0..total).filter(|i| waiting[*i].is_empty()).collect();
        let mut started: BTreeSet<usize> = BTreeSet::new();
        let mut outcomes: Vec<EntryOutcome> = Vec::with_capacity(total);
        let mut failures: BTreeMap<usize, StackformError> = BTreeMap::new();
        let mut cancel = self.cancel.clone();
        let mut cancelled = false;
        let mut tasks: JoinSet<(usize, Result<EntryOutcome>)> = JoinSet::new();

        loop {
            if !cancelled && cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
                cancelled = true;
                warn!("Apply cancelled before all entries started");
            }

            let halted = cancelled || !failures.is_empty();
            while !halted && tasks.len() < self.concurrency {
                let Some(index) = ready.pop_first() else {
                    break;
                };
                let entry = plan.entries[index].clone();
                let provider = Arc::clone(&self.provider);
                let snapshot = Arc::clone(&snapshot);

                info!("Starting entry {}: {}", index + 1, entry.description());
                started.insert(index);
                tasks.spawn(async move {
                    let result = apply_entry(provider.as_ref(), &snapshot, index, &entry).await;
                    (index, result)
                });
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                () = wait_for_cancel(&mut cancel), if !cancelled => {
                    cancelled = true;
                    warn!("Cancellation requested, waiting for {} in-flight entries", tasks.len());
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, Ok(outcome)))) => {
                        debug!("Entry {} completed", index + 1);
                        for (next, deps) in waiting.iter_mut().enumerate() {
                            if deps.remove(&index) && deps.is_empty() && !started.contains(&next) {
                                ready.insert(next);
                            }
                        }
                        outcomes.push(outcome);
                    }
                    Some(Ok((index, Err(e)))) => {
                        error!("Entry {} ({}) failed: {e}", index + 1, plan.entries[index].resource);
                        failures.insert(index, e);
                    }
                    Some(Err(join_error)) => {
                        error!("Entry task aborted: {join_error}");
                    }
                    None => {}
                },
            }
        }

        // A task that panicked left neither an outcome nor an error.
        for index in &started {
            if !failures.contains_key(index) && !outcomes.iter().any(|o| o.index == *index) {
                failures.insert(
                    *index,
                    StackformError::internal(format!("entry {} did not complete", index + 1)),
                );
            }
        }

        let mut snapshot = snapshot.lock().await.clone();
        let completed = outcomes.len();
        let touched: Vec<String> = outcomes.iter().map(|o| o.resource.clone()).collect();
        snapshot.serial = prior.serial + 1;

        if let Some((index, cause)) = failures.into_iter().next() {
            snapshot.add_history(ApplyHistoryEntry::failed(
                plan.operation,
                &plan.config_hash,
                snapshot.serial,
                touched,
                &cause.to_string(),
            ));
            return Err(ApplyError::PartialApply {
                position: index + 1,
                resource: plan.entries[index].resource.clone(),
                source: Box::new(cause),
                snapshot: Box::new(snapshot),
            }
            .into());
        }

        if completed < total && !cancelled {
            return Err(StackformError::internal(format!(
                "{} of {total} entries never became ready",
                total - completed
            )));
        }

        if completed < total {
            snapshot.add_history(ApplyHistoryEntry::failed(
                plan.operation,
                &plan.config_hash,
                snapshot.serial,
                touched,
                "cancelled",
            ));
            return Err(ApplyError::Cancelled {
                completed,
                total,
                snapshot: Box::new(snapshot),
            }
            .into());
        }

        snapshot.config_hash.clone_from(&plan.config_hash);
        snapshot.add_history(ApplyHistoryEntry::new(
            plan.operation,
            &plan.config_hash,
            snapshot.serial,
            touched,
        ));

        let duration = started_at.elapsed();
        info!(
            "Applied {completed} entries to {} in {:.1}s",
            plan.stack,
            duration.as_secs_f64()
        );
        Ok(ApplyReport {
            snapshot,
            outcomes,
            duration,
        })
    }
}

/// Resolves once the cancellation flag is set. Never resolves without a
/// receiver or once the sender is gone.
async fn wait_for_cancel(cancel: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Executes one entry and records its effect in `snapshot`.
async fn apply_entry(
    provider: &dyn ResourceProvider,
    snapshot: &Mutex<StateSnapshot>,
    index: usize,
    entry: &ChangeEntry,
) -> Result<EntryOutcome> {
    let outcome = |provider_id: &str, provider_called: bool| EntryOutcome {
        index,
        action: entry.action,
        resource: entry.resource.clone(),
        provider_id: provider_id.to_string(),
        provider_called,
    };

    match entry.action {
        ChangeAction::Create | ChangeAction::ReplaceCreate => {
            let node = desired_node(entry)?;
            let resolved = resolve_at_start(node, snapshot).await?;

            let created = provider.create(&node.resource_type, &resolved).await?;
            info!(
                "Created {} '{}' as {}",
                node.resource_type, node.id, created.provider_id
            );

            let mut record = ResourceState::new(&node.id, &node.resource_type, &created.provider_id);
            fill_record(&mut record, node, entry, resolved);
            record.outputs = created.outputs;

            let mut state = snapshot.lock().await;
            let superseded = state
                .get(&node.id)
                .filter(|previous| previous.provider_id != created.provider_id)
                .map(ResourceState::depose);
            if let Some(deposed) = superseded {
                debug!("Deposing {} instance {}", node.id, deposed.provider_id);
                state.add_deposed(deposed);
            }
            state.set_resource(record);
            Ok(outcome(&created.provider_id, true))
        }

        ChangeAction::Update => {
            let node = desired_node(entry)?;
            let resolved = resolve_at_start(node, snapshot).await?;

            let mut record = snapshot
                .lock()
                .await
                .get(&node.id)
                .cloned()
                .ok_or_else(|| {
                    StackformError::internal(format!("update of '{}' without a record", node.id))
                })?;

            let changed = changed_properties(&record.resolved, &resolved);
            let provider_called = !changed.is_empty();
            if provider_called {
                let returned = provider
                    .update(&node.resource_type, &record.provider_id, &changed)
                    .await?;
                // Unreported outputs are kept unless their property was removed.
                for (key, value) in &changed {
                    if value.is_null() && !returned.contains_key(key) {
                        record.outputs.remove(key);
                    }
                }
                record.outputs.extend(returned);
                info!(
                    "Updated {} '{}' ({} properties)",
                    node.resource_type,
                    node.id,
                    changed.len()
                );
            } else {
                debug!("{} already matches, recording declaration only", node.id);
            }

            fill_record(&mut record, node, entry, resolved);
            record.updated_at = chrono::Utc::now();
            let provider_id = record.provider_id.clone();
            snapshot.lock().await.set_resource(record);
            Ok(outcome(&provider_id, provider_called))
        }

        ChangeAction::Delete | ChangeAction::ReplaceDelete => {
            let provider_id = entry.provider_id.as_deref().ok_or_else(|| {
                StackformError::internal(format!("delete of '{}' without a provider id", entry.resource))
            })?;

            match provider.delete(&entry.resource_type, provider_id).await {
                Ok(()) => info!("Deleted {} '{}' ({provider_id})", entry.resource_type, entry.resource),
                Err(e) if e.is_not_found() => {
                    info!("{} ({provider_id}) was already deleted", entry.resource);
                }
                Err(e) => return Err(e),
            }

            let mut state = snapshot.lock().await;
            state.remove_resource(&entry.resource, provider_id);
            state.remove_deposed(provider_id);
            Ok(outcome(provider_id, true))
        }
    }
}

fn desired_node(entry: &ChangeEntry) -> Result<&ResourceNode> {
    entry.node.as_ref().ok_or_else(|| {
        StackformError::internal(format!("{} of '{}' without a declaration", entry.action, entry.resource))
    })
}

/// Resolves references against the snapshot as it is when the entry starts.
async fn resolve_at_start(node: &ResourceNode, snapshot: &Mutex<StateSnapshot>) -> Result<ResolvedProperties> {
    let state = snapshot.lock().await;
    resolve_properties(&node.properties, &state).map_err(|missing| {
        ApplyError::UnresolvedReference {
            resource: node.id.clone(),
            target: missing.resource,
            output: missing.output,
        }
        .into()
    })
}

fn fill_record(record: &mut ResourceState, node: &ResourceNode, entry: &ChangeEntry, resolved: ResolvedProperties) {
    record.properties = node.properties.clone();
    record.resolved = resolved;
    record.dependencies = node.dependency_ids().into_iter().map(String::from).collect();
    record.config_hash = entry.new_hash.clone().unwrap_or_default();
}

/// Keys whose resolved value changed; removed keys map to null.
fn changed_properties(previous: &ResolvedProperties, desired: &ResolvedProperties) -> ResolvedProperties {
    let mut changed: ResolvedProperties = desired
        .iter()
        .filter(|(key, value)| previous.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    for key in previous.keys() {
        if !desired.contains_key(key) {
            changed.insert(key.clone(), serde_json::Value::Null);
        }
    }
    changed
}

impl ApplyReport {
    /// Returns the number of completed entries.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns the number of entries that reached the provider.
    #[must_use]
    pub fn provider_calls(&self) -> usize {
        self.outcomes.iter().filter(|o| o.provider_called).count()
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Apply complete: {} entries, {} provider calls, {} resources in state ({:.1}s)",
            self.completed(),
            self.provider_calls(),
            self.snapshot.len(),
            self.duration.as_secs_f64()
        )
    }
}
