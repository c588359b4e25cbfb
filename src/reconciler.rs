//! Reconciler orchestrating plan and apply runs.
//!
//! Ties the pipeline together: configuration to registry, registry to
//! dependency graph, graph plus recorded state to diff, diff to plan, plan
//! to executor. Apply runs hold the state lock for their full duration, and
//! a run never reports success unless the final state save succeeded.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, StackConfig};
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::planner::{DiffEngine, DiffResult, ExecutionPlan, ExecutionReport, PlanExecutor};
use crate::provider::Provider;
use crate::registry::ResourceRegistry;
use crate::state::{RunHistoryEntry, RunOperation, StateFile, StateStore, generate_holder_id};

/// Orchestrates plan and apply runs against a single stack.
pub struct Reconciler<'a, S: StateStore> {
    /// Stack configuration.
    config: &'a StackConfig,
    /// State store.
    state_store: &'a S,
    /// Provider for all resource operations.
    provider: Arc<dyn Provider>,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
}

/// A computed plan together with its diff summary.
pub struct PlannedChanges {
    /// The execution plan.
    pub plan: ExecutionPlan,
    /// The diff the plan was built from.
    pub diff: DiffResult,
}

/// Outcome of an apply or destroy run.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// Per-action execution report.
    pub report: ExecutionReport,
    /// Number of resources left recorded in state.
    pub recorded: usize,
    /// State serial after the run.
    pub serial: u64,
}

/// Report of drift detection.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// Resources whose provider reality differs from the record.
    pub drifted: Vec<DriftEntry>,
    /// Total number of recorded resources checked.
    pub total_records: usize,
}

/// A single drifted resource.
#[derive(Debug, serde::Serialize)]
pub struct DriftEntry {
    /// `kind.name` address.
    pub address: String,
    /// What drifted.
    pub detail: String,
}

impl<'a, S: StateStore> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(
        config: &'a StackConfig,
        state_store: &'a S,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            config,
            state_store,
            provider,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
        }
    }

    /// Computes the plan for the current configuration without applying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the graph is
    /// cyclic, or the plan is contradictory.
    pub async fn plan(&self) -> Result<PlannedChanges> {
        let registry = ResourceRegistry::from_config(self.config)?;
        let graph = DependencyGraph::build(&registry)?;
        let state = self.state_store.load().await?;

        let diff =
            self.diff_engine
                .compute_diff(&registry, state.as_ref(), self.provider.as_ref())?;

        info!(
            "Diff: {} creates, {} updates, {} replaces, {} destroys, {} unchanged",
            diff.creates, diff.updates, diff.replaces, diff.destroys, diff.unchanged
        );

        let config_hash = self.hasher.hash_stack(self.config);
        let plan = ExecutionPlan::from_diff(&diff, &registry, &graph, &config_hash)?;

        Ok(PlannedChanges { plan, diff })
    }

    /// Plans and applies in one run, holding the state lock throughout.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired, planning fails, or
    /// the final state save fails. Individual action failures are reported
    /// through the outcome, not as errors.
    pub async fn apply(&self, cancel: &CancellationToken) -> Result<ApplyOutcome> {
        let lock = self.state_store.acquire_lock(&generate_holder_id()).await?;
        let result = self.apply_locked(cancel).await;

        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock: {e}");
        }

        result
    }

    async fn apply_locked(&self, cancel: &CancellationToken) -> Result<ApplyOutcome> {
        info!(
            "Applying {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let registry = ResourceRegistry::from_config(self.config)?;
        let graph = DependencyGraph::build(&registry)?;

        let mut state = self.state_store.load().await?.unwrap_or_else(|| {
            StateFile::new(&self.config.project.name, &self.config.project.environment)
        });

        let diff =
            self.diff_engine
                .compute_diff(&registry, Some(&state), self.provider.as_ref())?;
        let config_hash = self.hasher.hash_stack(self.config);
        let plan = ExecutionPlan::from_diff(&diff, &registry, &graph, &config_hash)?;

        if plan.is_empty() {
            debug!("Nothing to apply, configuration is converged");
        }

        let report = self.execute(&plan, &mut state, cancel).await?;
        self.finish_run(&plan, &report, RunOperation::Apply, &mut state)
            .await?;

        Ok(ApplyOutcome {
            recorded: state.records.len(),
            serial: state.serial,
            report,
        })
    }

    /// Destroys every recorded resource, dependents before dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired or the final state
    /// save fails.
    pub async fn destroy(&self, cancel: &CancellationToken) -> Result<ApplyOutcome> {
        let lock = self.state_store.acquire_lock(&generate_holder_id()).await?;
        let result = self.destroy_locked(cancel).await;

        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock: {e}");
        }

        result
    }

    async fn destroy_locked(&self, cancel: &CancellationToken) -> Result<ApplyOutcome> {
        info!(
            "Destroying {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let mut state = self.state_store.load().await?.unwrap_or_else(|| {
            StateFile::new(&self.config.project.name, &self.config.project.environment)
        });

        // With an empty registry every record diffs to a destroy, ordered
        // by the dependencies captured at apply time
        let registry = ResourceRegistry::new();
        let graph = DependencyGraph::build(&registry)?;
        let diff =
            self.diff_engine
                .compute_diff(&registry, Some(&state), self.provider.as_ref())?;
        let config_hash = self.hasher.hash_stack(self.config);
        let plan = ExecutionPlan::from_diff(&diff, &registry, &graph, &config_hash)?;

        let report = self.execute(&plan, &mut state, cancel).await?;
        self.finish_run(&plan, &report, RunOperation::Destroy, &mut state)
            .await?;

        Ok(ApplyOutcome {
            recorded: state.records.len(),
            serial: state.serial,
            report,
        })
    }

    async fn execute(
        &self,
        plan: &ExecutionPlan,
        state: &mut StateFile,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        let executor = PlanExecutor::new(
            Arc::clone(&self.provider),
            self.config.settings.parallelism,
        )
        .with_continue_on_error(self.config.settings.continue_on_error);

        executor.execute(plan, state, cancel).await
    }

    /// Records history and persists state. Failure to save is an error:
    /// the run must not be reported as successful with an unsaved state.
    async fn finish_run(
        &self,
        plan: &ExecutionPlan,
        report: &ExecutionReport,
        operation: RunOperation,
        state: &mut StateFile,
    ) -> Result<()> {
        let resources: Vec<String> = plan
            .actions
            .iter()
            .filter(|a| a.action_type != crate::planner::ActionType::Noop)
            .map(|a| a.address.clone())
            .collect();

        let entry = if report.all_applied() {
            RunHistoryEntry::new(operation, &plan.config_hash, resources)
        } else {
            RunHistoryEntry::failed(
                operation,
                &plan.config_hash,
                resources,
                &format!("{} of {} actions failed", report.failed, report.outcomes.len()),
            )
        };
        state.add_history(entry);
        state.bump_serial();

        self.state_store.save(state).await
    }

    /// Checks recorded resources against provider reality without applying
    /// any changes.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded or a provider read fails
    /// with a non-transient error.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!(
            "Checking drift for {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let Some(state) = self.state_store.load().await? else {
            return Ok(DriftReport {
                drifted: vec![],
                total_records: 0,
            });
        };

        let mut drifted = Vec::new();

        for (address, record) in &state.records {
            let observed = self
                .provider
                .read(&record.kind, &record.provider_id)
                .await?;

            match observed {
                None => {
                    drifted.push(DriftEntry {
                        address: address.clone(),
                        detail: String::from("resource no longer exists"),
                    });
                }
                Some(attributes) => {
                    let changed: Vec<&str> = record
                        .attributes
                        .iter()
                        .filter(|(name, value)| attributes.get(*name) != Some(value))
                        .map(|(name, _)| name.as_str())
                        .collect();
                    if !changed.is_empty() {
                        drifted.push(DriftEntry {
                            address: address.clone(),
                            detail: format!("attributes changed: {}", changed.join(", ")),
                        });
                    }
                }
            }
        }

        Ok(DriftReport {
            total_records: state.records.len(),
            drifted,
        })
    }
}

impl DriftReport {
    /// Returns true if no drift was found.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        self.drifted.is_empty()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_converged() {
            write!(
                f,
                "No drift detected across {} recorded resources",
                self.total_records
            )
        } else {
            writeln!(f, "Drift detected:")?;
            for entry in &self.drifted {
                writeln!(f, "  - {}: {}", entry.address, entry.detail)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::provider::MemoryProvider;
    use crate::state::LocalStateStore;
    use tempfile::TempDir;

    const STACK: &str = r"
project:
  name: web-stack
resources:
  - kind: network
    name: main
    attributes:
      cidr_block: 10.0.0.0/16
  - kind: subnet
    name: public
    attributes:
      network_id: ${network.main.id}
      cidr_block: 10.0.1.0/24
";

    fn setup() -> (StackConfig, TempDir) {
        let config = ConfigParser::new()
            .parse_yaml(STACK, None)
            .expect("valid yaml");
        let temp = TempDir::new().expect("temp dir");
        (config, temp)
    }

    #[tokio::test]
    async fn test_apply_then_plan_is_converged() {
        let (config, temp) = setup();
        let store = LocalStateStore::with_base_dir(temp.path());
        let provider = Arc::new(MemoryProvider::new());
        let reconciler = Reconciler::new(&config, &store, provider.clone());

        let outcome = reconciler
            .apply(&CancellationToken::new())
            .await
            .expect("apply succeeds");
        assert!(outcome.report.all_applied());
        assert_eq!(outcome.recorded, 2);
        assert_eq!(outcome.serial, 1);

        // Second plan: nothing to do
        let changes = reconciler.plan().await.expect("plan succeeds");
        assert!(changes.plan.is_empty());
        assert_eq!(changes.diff.unchanged, 2);
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let (config, temp) = setup();
        let store = LocalStateStore::with_base_dir(temp.path());
        let provider = Arc::new(MemoryProvider::new());
        let reconciler = Reconciler::new(&config, &store, provider.clone());

        reconciler
            .apply(&CancellationToken::new())
            .await
            .expect("first apply");
        reconciler
            .apply(&CancellationToken::new())
            .await
            .expect("second apply");

        assert_eq!(provider.resource_count().await, 2);
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let (config, temp) = setup();
        let store = LocalStateStore::with_base_dir(temp.path());
        let provider = Arc::new(MemoryProvider::new());
        let reconciler = Reconciler::new(&config, &store, provider.clone());

        reconciler
            .apply(&CancellationToken::new())
            .await
            .expect("apply succeeds");

        let outcome = reconciler
            .destroy(&CancellationToken::new())
            .await
            .expect("destroy succeeds");

        assert!(outcome.report.all_applied());
        assert_eq!(outcome.recorded, 0);
        assert_eq!(provider.resource_count().await, 0);
    }

    #[tokio::test]
    async fn test_cyclic_stack_fails_before_any_provider_call() {
        let cyclic = r"
project:
  name: web-stack
resources:
  - kind: network
    name: a
    attributes:
      cidr_block: ${network.b.id}
  - kind: network
    name: b
    attributes:
      cidr_block: ${network.a.id}
";
        let config = ConfigParser::new()
            .parse_yaml(cyclic, None)
            .expect("valid yaml");
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let provider = Arc::new(MemoryProvider::new());
        let reconciler = Reconciler::new(&config, &store, provider.clone());

        let result = reconciler.apply(&CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(crate::error::TerraplaneError::Config(
                crate::error::ConfigError::CyclicDependency { .. }
            ))
        ));
        assert_eq!(provider.resource_count().await, 0);
    }

    #[tokio::test]
    async fn test_drift_detects_missing_resource() {
        let (config, temp) = setup();
        let store = LocalStateStore::with_base_dir(temp.path());
        let provider = Arc::new(MemoryProvider::new());
        let reconciler = Reconciler::new(&config, &store, provider.clone());

        reconciler
            .apply(&CancellationToken::new())
            .await
            .expect("apply succeeds");

        let report = reconciler.check_drift().await.expect("drift check");
        assert!(report.is_converged());

        // Delete the subnet behind the engine's back
        let state = store.load().await.expect("load").expect("state exists");
        let subnet_id = state
            .get_record("subnet.public")
            .expect("recorded")
            .provider_id
            .clone();
        provider
            .destroy("subnet", &subnet_id)
            .await
            .expect("out-of-band destroy");

        let report = reconciler.check_drift().await.expect("drift check");
        assert!(!report.is_converged());
        assert_eq!(report.drifted[0].address, "subnet.public");
    }
}
