//! Deployer tying declaration, planning, execution and state together.
//!
//! A run builds the dependency graph from the stack file, loads recorded
//! state, plans, and applies under the state lock. Whatever the executor
//! managed to do is saved, including after a partial or cancelled apply.
//! The lock is refreshed while the executor runs.
//!
//! Simulated runs use an in-memory provider. Their state is marked as
//! simulated and is never mixed with the state of real runs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, ConfigParser, StackConfig, StateBackend};
use crate::error::{ApplyError, ConfigError, PlanError, Result, StackformError, StateError};
use crate::graph::DependencyGraph;
use crate::planner::{self, ApplyReport, ChangeAction, Plan, PlanExecutor};
use crate::provider::{HttpProvider, HttpProviderOptions, MemoryProvider, ResourceProvider};
use crate::state::{
    generate_holder_id, LocalStateStore, S3StateStore, StateSnapshot, StateStore, LOCK_EXPIRY_SECS,
    STATE_DIR,
};

/// How often the lock is refreshed during an apply.
const LOCK_REFRESH_SECS: u64 = LOCK_EXPIRY_SECS.unsigned_abs() / 3;

/// Deployer for one stack.
pub struct Deployer<'a, S: StateStore> {
    /// Configuration.
    config: &'a StackConfig,
    /// State store.
    state_store: &'a S,
    /// Resource provider.
    provider: Arc<dyn ResourceProvider>,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Maximum number of entries in flight.
    concurrency: usize,
    /// Cancellation signal passed to the executor.
    cancel: Option<watch::Receiver<bool>>,
    /// Lock holder id.
    holder: String,
    /// Interval between lock refreshes while applying.
    lock_refresh: Duration,
    /// True when the provider is an in-memory simulation.
    simulated: bool,
}

/// Result of an apply or destroy run.
#[derive(Debug, serde::Serialize)]
pub struct DeployResult {
    /// Stack identifier.
    pub stack: String,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated.
    pub updated: usize,
    /// Number of resources replaced.
    pub replaced: usize,
    /// Number of instances deleted, superseded ones included.
    pub deleted: usize,
    /// Serial of the saved state.
    pub serial: u64,
    /// Wall-clock duration in seconds.
    pub duration_secs: f64,
    /// Final state after the run.
    #[serde(skip)]
    pub final_state: Option<StateSnapshot>,
}

impl<'a, S: StateStore> Deployer<'a, S> {
    /// Creates a new deployer.
    #[must_use]
    pub fn new(config: &'a StackConfig, state_store: &'a S, provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            config,
            state_store,
            provider,
            hasher: ConfigHasher::new(),
            concurrency: config.executor.concurrency,
            cancel: None,
            holder: generate_holder_id(),
            lock_refresh: Duration::from_secs(LOCK_REFRESH_SECS),
            simulated: false,
        }
    }

    /// Overrides the configured concurrency.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the cancellation signal.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sets the lock holder id.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Sets how often the lock is refreshed while applying.
    #[must_use]
    pub fn with_lock_refresh(mut self, interval: Duration) -> Self {
        self.lock_refresh = interval;
        self
    }

    /// Marks the run as simulated. Saved state is flagged accordingly.
    #[must_use]
    pub const fn simulated(mut self, simulated: bool) -> Self {
        self.simulated = simulated;
        self
    }

    /// Declares every resource and builds the dependency graph.
    ///
    /// # Errors
    ///
    /// Returns a graph error for duplicate ids, self-references, unknown
    /// references or cycles.
    pub fn build_graph(&self) -> Result<DependencyGraph> {
        let nodes = self.config.declare()?;
        let graph = DependencyGraph::build(nodes)?;
        debug!(
            "Built graph for {} with {} nodes and {} edges",
            self.config.stack_id(),
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Loads recorded state, or an empty snapshot for a new stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read, and
    /// `StateError::SimulationMismatch` when recorded resources were
    /// written by a simulated run and this one is real, or the reverse.
    pub async fn load_state(&self) -> Result<StateSnapshot> {
        let mut snapshot = self
            .state_store
            .load()
            .await?
            .unwrap_or_else(|| StateSnapshot::new(&self.config.stack_id()));

        if snapshot.simulated != self.simulated {
            if !snapshot.is_empty() {
                let kind = |simulated: bool| if simulated { "simulated" } else { "real" };
                return Err(StateError::SimulationMismatch {
                    stack: snapshot.stack,
                    recorded: kind(snapshot.simulated),
                    requested: kind(self.simulated),
                }
                .into());
            }
            snapshot.simulated = self.simulated;
        }
        Ok(snapshot)
    }

    /// Plans the changes needed to converge the stack.
    ///
    /// # Errors
    ///
    /// Returns graph and planning errors, or state read errors.
    pub async fn plan(&self) -> Result<Plan> {
        let graph = self.build_graph()?;
        let prior = self.load_state().await?;
        let plan = planner::plan(
            &graph,
            &prior,
            &self.config.registry(),
            &self.hasher.hash_stack(self.config),
        )?;

        info!(
            "Plan for {}: {} to create, {} to update, {} to replace, {} to delete",
            plan.stack,
            plan.create_count(),
            plan.update_count(),
            plan.replace_count(),
            plan.delete_count()
        );
        Ok(plan)
    }

    /// Plans deletion of every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    pub async fn plan_destroy(&self) -> Result<Plan> {
        let prior = self.load_state().await?;
        planner::plan_destroy(&prior)
    }

    /// Plans and applies in one go.
    ///
    /// # Errors
    ///
    /// See [`Deployer::plan`] and [`Deployer::apply_plan`].
    pub async fn apply(&self) -> Result<DeployResult> {
        let plan = self.plan().await?;
        self.apply_plan(&plan).await
    }

    /// Plans and applies deletion of every recorded resource.
    ///
    /// # Errors
    ///
    /// See [`Deployer::apply_plan`].
    pub async fn destroy(&self) -> Result<DeployResult> {
        let plan = self.plan_destroy().await?;
        self.apply_plan(&plan).await
    }

    /// Applies a previously computed plan under the state lock.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::StalePlan` if state moved since the plan was
    /// computed, lock errors, and executor errors. State is saved before a
    /// partial or cancelled apply is reported.
    pub async fn apply_plan(&self, plan: &Plan) -> Result<DeployResult> {
        if plan.is_empty() {
            info!("No changes required - {} is converged", plan.stack);
            let prior = self.load_state().await?;
            return Ok(DeployResult {
                stack: plan.stack.clone(),
                created: 0,
                updated: 0,
                replaced: 0,
                deleted: 0,
                serial: prior.serial,
                duration_secs: 0.0,
                final_state: Some(prior),
            });
        }

        let lock = self.state_store.acquire_lock(&self.holder).await?;
        let outcome = self.apply_locked(plan, &lock.lock_id).await;

        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }

        outcome
    }

    async fn apply_locked(&self, plan: &Plan, lock_id: &str) -> Result<DeployResult> {
        let prior = self.load_state().await?;
        if prior.serial != plan.prior_serial {
            return Err(PlanError::StalePlan {
                stack: plan.stack.clone(),
                planned: plan.prior_serial,
                current: prior.serial,
            }
            .into());
        }

        let mut executor = PlanExecutor::new(Arc::clone(&self.provider)).with_concurrency(self.concurrency);
        if let Some(cancel) = &self.cancel {
            executor = executor.with_cancellation(cancel.clone());
        }

        let mut run = std::pin::pin!(executor.apply(plan, &prior));
        let mut refresh = tokio::time::interval(self.lock_refresh.max(Duration::from_millis(10)));
        refresh.tick().await;
        let applied = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = refresh.tick() => match self.state_store.refresh_lock(lock_id).await {
                    Ok(lock) => debug!("State lock {lock_id} held until {}", lock.expires_at),
                    Err(e) => warn!("Failed to refresh state lock {lock_id}: {e}"),
                },
            }
        };

        match applied {
            Ok(report) => {
                self.state_store.save(&report.snapshot).await?;
                Ok(DeployResult::from_report(plan, report))
            }
            Err(e) => {
                if let Some(snapshot) = partial_snapshot(&e) {
                    warn!(
                        "Saving partial state for {} ({} resources recorded)",
                        snapshot.stack,
                        snapshot.len()
                    );
                    self.state_store.save(snapshot).await?;
                }
                Err(e)
            }
        }
    }
}

/// Returns the snapshot carried by a partial or cancelled apply.
#[must_use]
pub fn partial_snapshot(err: &StackformError) -> Option<&StateSnapshot> {
    match err {
        StackformError::Apply(
            ApplyError::PartialApply { snapshot, .. } | ApplyError::Cancelled { snapshot, .. },
        ) => Some(snapshot.as_ref()),
        _ => None,
    }
}

impl DeployResult {
    fn from_report(plan: &Plan, report: ApplyReport) -> Self {
        let count = |actions: &[ChangeAction]| {
            report
                .outcomes
                .iter()
                .filter(|o| actions.contains(&o.action))
                .count()
        };
        Self {
            stack: plan.stack.clone(),
            created: count(&[ChangeAction::Create]),
            updated: count(&[ChangeAction::Update]),
            replaced: count(&[ChangeAction::ReplaceCreate]),
            deleted: count(&[ChangeAction::Delete, ChangeAction::ReplaceDelete]),
            serial: report.snapshot.serial,
            duration_secs: report.duration.as_secs_f64(),
            final_state: Some(report.snapshot),
        }
    }
}

impl std::fmt::Display for DeployResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} created, {} updated, {} replaced, {} deleted (serial {})",
            self.stack, self.created, self.updated, self.replaced, self.deleted, self.serial
        )
    }
}

/// Opens the state store configured for the stack.
///
/// A relative local state path is resolved against `config_dir`, the
/// directory holding the stack file.
///
/// # Errors
///
/// Returns an error if the S3 backend has no bucket.
pub async fn open_state_store(config: &StackConfig, config_dir: &Path) -> Result<Box<dyn StateStore>> {
    let stack = config.stack_id();
    match config.state.backend {
        StateBackend::Local => {
            let base_dir = config
                .state
                .path
                .as_ref()
                .map_or_else(|| config_dir.join(STATE_DIR), |path| config_dir.join(path));
            debug!("Using local state under {}", base_dir.display());
            Ok(Box::new(LocalStateStore::with_base_dir(base_dir, &stack)))
        }
        StateBackend::S3 => {
            let bucket = config.state.bucket.as_deref().ok_or_else(|| {
                StackformError::Config(ConfigError::validation(
                    "S3 bucket name is required when using S3 backend",
                    "state.bucket",
                ))
            })?;
            let store = S3StateStore::new(
                bucket,
                config.state.prefix.as_deref(),
                config.state.region.as_deref().or(config.stack.region.as_deref()),
                &stack,
            )
            .await;
            Ok(Box::new(store))
        }
    }
}

/// Builds the resource provider configured for the stack.
///
/// With `simulate` the run uses an in-memory provider seeded from `prior`.
///
/// # Errors
///
/// Returns a configuration error if a real run has no endpoint or a
/// simulated run would write to shared state, and an error if the
/// provider token is missing or the HTTP client cannot be created.
pub fn open_provider(
    config: &StackConfig,
    prior: &StateSnapshot,
    simulate: bool,
) -> Result<Arc<dyn ResourceProvider>> {
    if simulate {
        if config.state.backend != StateBackend::Local {
            return Err(ConfigError::validation(
                "simulated runs only write local state",
                "state.backend",
            )
            .into());
        }
        info!("Simulating changes in memory");
        return Ok(Arc::new(MemoryProvider::from_snapshot(prior)));
    }

    let Some(endpoint) = &config.provider.endpoint else {
        return Err(ConfigError::validation(
            "provider.endpoint is not set; pass --simulate to run against an in-memory provider",
            "provider.endpoint",
        )
        .into());
    };

    let token = ConfigParser::provider_token()?;
    let options = HttpProviderOptions {
        timeout: Duration::from_secs(config.provider.timeout_secs),
        max_retries: config.provider.max_retries,
        retry_delay: Duration::from_millis(config.provider.retry_delay_ms),
        ..HttpProviderOptions::default()
    };
    Ok(Arc::new(HttpProvider::with_options(endpoint, &token, options)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LockInfo;
    use tempfile::TempDir;

    const STACK: &str = r"
stack:
  name: web
resources:
  - id: vpc
    type: ec2:vpc
    properties:
      cidr_block: 10.0.0.0/16
  - id: sg
    type: ec2:security-group
    properties:
      vpc_id: { ref: vpc }
      name: web
";

    fn config(yaml: &str) -> StackConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[tokio::test]
    async fn test_apply_saves_state_and_converges() {
        let temp = TempDir::new().unwrap();
        let config = config(STACK);
        let store = LocalStateStore::with_base_dir(temp.path(), &config.stack_id());
        let provider = Arc::new(MemoryProvider::new());
        let deployer = Deployer::new(&config, &store, provider.clone());

        let result = deployer.apply().await.unwrap();
        assert_eq!(result.created, 2);
        assert_eq!(result.serial, 1);

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.resource_ids(), vec!["sg", "vpc"]);
        assert!(!store.is_locked().await.unwrap());

        assert!(deployer.plan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let temp = TempDir::new().unwrap();
        let config = config(STACK);
        let store = LocalStateStore::with_base_dir(temp.path(), &config.stack_id());
        let provider = Arc::new(MemoryProvider::new());
        let deployer = Deployer::new(&config, &store, provider.clone());

        tokio_test::assert_ok!(deployer.apply().await);
        let result = tokio_test::assert_ok!(deployer.destroy().await);

        assert_eq!(result.deleted, 2);
        assert_eq!(provider.resource_count().await, 0);
        assert!(store.load().await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_plan_is_refused() {
        let temp = TempDir::new().unwrap();
        let config = config(STACK);
        let store = LocalStateStore::with_base_dir(temp.path(), &config.stack_id());
        let deployer = Deployer::new(&config, &store, Arc::new(MemoryProvider::new()));

        let stale = deployer.plan().await.unwrap();
        deployer.apply().await.unwrap();

        let err = deployer.apply_plan(&stale).await.unwrap_err();
        assert!(matches!(
            err,
            StackformError::Plan(PlanError::StalePlan { planned: 0, current: 1, .. })
        ));
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_locked_state_blocks_apply() {
        let temp = TempDir::new().unwrap();
        let config = config(STACK);
        let store = LocalStateStore::with_base_dir(temp.path(), &config.stack_id());
        let held: LockInfo = store.acquire_lock("someone-else").await.unwrap();

        let deployer = Deployer::new(&config, &store, Arc::new(MemoryProvider::new()));
        let err = deployer.apply().await.unwrap_err();
        assert!(matches!(
            err,
            StackformError::State(crate::error::StateError::LockedByOther { .. })
        ));
        store.release_lock(&held.lock_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_graph_errors_surface_before_state() {
        let config = config(
            r"
stack:
  name: web
resources:
  - id: a
    type: custom:thing
    depends_on: [b]
  - id: b
    type: custom:thing
    depends_on: [a]
",
        );
        let temp = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(temp.path(), &config.stack_id());
        let deployer = Deployer::new(&config, &store, Arc::new(MemoryProvider::new()));

        let err = deployer.plan().await.unwrap_err();
        let mut ids = err.resource_ids();
        ids.sort();
        assert_eq!(ids, vec![String::from("a"), String::from("b")]);
    }

    #[tokio::test]
    async fn test_reference_template_applies_in_simulation() {
        let temp = TempDir::new().unwrap();
        let config = config(include_str!("../templates/stackform.yaml"));
        crate::config::ConfigValidator::new().validate(&config).unwrap();

        let store = LocalStateStore::with_base_dir(temp.path(), &config.stack_id());
        let provider = open_provider(&config, &StateSnapshot::new(&config.stack_id()), true).unwrap();
        let deployer = Deployer::new(&config, &store, provider).simulated(true);

        let plan = deployer.plan().await.unwrap();
        let order: Vec<&str> = plan.entries.iter().map(|e| e.resource.as_str()).collect();
        let position = |id: &str| order.iter().position(|r| *r == id).unwrap();
        assert!(position("vpc") < position("public_subnet_a"));
        assert!(position("target_group") < position("asg"));
        assert!(position("alb_sg") < position("web_sg_from_alb"));
        assert!(position("alb") < position("https_listener"));
        assert!(position("https_listener") < position("fleet_rule"));
        assert!(position("alb") < position("alias_record"));

        let result = deployer.apply_plan(&plan).await.unwrap();
        assert_eq!(result.created, 17);
        assert!(store.load().await.unwrap().unwrap().simulated);
        assert!(deployer.plan().await.unwrap().is_empty());

        let state = deployer.load_state().await.unwrap();
        let action = &state.get("https_listener").unwrap().resolved["default_action"];
        assert_eq!(action["message_body"], "Hello from the load balancer!");
        assert_eq!(action["status_code"], 200);
    }

    #[tokio::test]
    async fn test_local_state_resolves_against_config_dir() {
        let temp = TempDir::new().unwrap();
        let config = config(STACK);
        let store = open_state_store(&config, temp.path()).await.unwrap();

        assert_eq!(store.backend_type(), "local");
        store.save(&StateSnapshot::new("web-dev")).await.unwrap();
        assert!(temp.path().join(STATE_DIR).join("web-dev.json").exists());
    }

    #[tokio::test]
    async fn test_simulation_is_opt_in() {
        let config = config(STACK);
        let prior = StateSnapshot::new("web-dev");
        let provider = open_provider(&config, &prior, true).unwrap();
        assert_eq!(provider.name(), "memory");

        let err = open_provider(&config, &prior, false).err().unwrap();
        assert!(matches!(
            err,
            StackformError::Config(ConfigError::ValidationError { field: Some(ref f), .. })
                if f == "provider.endpoint"
        ));
    }

    #[tokio::test]
    async fn test_simulation_refuses_shared_backend() {
        let config = config(
            r"
stack:
  name: web
state:
  backend: s3
  bucket: shared-state
",
        );
        let err = open_provider(&config, &StateSnapshot::new("web-dev"), true).err().unwrap();
        assert!(matches!(
            err,
            StackformError::Config(ConfigError::ValidationError { field: Some(ref f), .. })
                if f == "state.backend"
        ));
    }

    #[tokio::test]
    async fn test_simulated_state_is_kept_apart() {
        let temp = TempDir::new().unwrap();
        let config = config(STACK);
        let store = LocalStateStore::with_base_dir(temp.path(), &config.stack_id());

        let simulated = Deployer::new(&config, &store, Arc::new(MemoryProvider::new())).simulated(true);
        simulated.apply().await.unwrap();
        assert!(store.load().await.unwrap().unwrap().simulated);

        let real = Deployer::new(&config, &store, Arc::new(MemoryProvider::new()));
        let err = real.plan().await.unwrap_err();
        assert!(matches!(
            err,
            StackformError::State(StateError::SimulationMismatch {
                recorded: "simulated",
                requested: "real",
                ..
            })
        ));

        // Once the simulated resources are gone the state is reusable.
        simulated.destroy().await.unwrap();
        let result = real.apply().await.unwrap();
        assert_eq!(result.created, 2);
        assert!(!store.load().await.unwrap().unwrap().simulated);
    }

    #[tokio::test]
    async fn test_lock_is_refreshed_during_apply() {
        let temp = TempDir::new().unwrap();
        let config = config(STACK);
        let store = LocalStateStore::with_base_dir(temp.path(), &config.stack_id());
        let provider = Arc::new(MemoryProvider::new().with_latency(Duration::from_millis(100)));
        let deployer = Deployer::new(&config, &store, provider).with_lock_refresh(Duration::from_millis(20));

        let observe = async {
            tokio::time::sleep(Duration::from_millis(120)).await;
            store.get_lock_info().await.unwrap()
        };
        let (result, lock) = tokio::join!(deployer.apply(), observe);

        result.unwrap();
        let lock = lock.unwrap();
        assert!(lock.expires_at > lock.acquired_at + chrono::Duration::seconds(LOCK_EXPIRY_SECS));
        assert!(!store.is_locked().await.unwrap());
    }
}
