//! Plan executor.
//!
//! Executes planned actions with bounded parallelism. A scheduler loop owns
//! all state mutation: worker tasks only talk to the provider and report
//! back, so records are updated by exactly one writer. Transient provider
//! failures are retried with exponential backoff, gated on the kind's
//! request-token support for mutating calls. Cancellation stops new work
//! while in-flight actions drain to completion.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigHasher, Reference, Value};
use crate::error::{ExecError, ProviderError, Result, TerraplaneError};
use crate::provider::{Provider, RetryPolicy};
use crate::state::{StateFile, StateRecord};

use super::plan::{ActionType, ExecutionPlan, PlannedAction};

/// Executor for plans.
pub struct PlanExecutor {
    /// Provider all actions go through.
    provider: Arc<dyn Provider>,
    /// Maximum concurrently running actions.
    parallelism: usize,
    /// Whether to keep going after a failure.
    continue_on_error: bool,
}

/// Terminal state of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// Not yet started.
    Pending,
    /// Handed to a worker.
    Applying,
    /// Completed successfully.
    Applied,
    /// Failed after retries were exhausted.
    Failed,
    /// Never ran because a dependency failed or the run was cancelled.
    Skipped,
}

/// Outcome of a single action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Action index in the plan.
    pub index: usize,
    /// `kind.name` address.
    pub address: String,
    /// Action type.
    pub action_type: ActionType,
    /// Terminal state.
    pub state: ActionState,
    /// Provider identifier, for creates and updates.
    pub provider_id: Option<String>,
    /// Error message, if failed.
    pub error: Option<String>,
    /// Number of provider attempts made.
    pub attempts: u32,
}

/// Report for an executed plan, enumerating every action.
#[derive(Debug)]
pub struct ExecutionReport {
    /// Per-action outcomes in plan order.
    pub outcomes: Vec<ActionOutcome>,
    /// Number of applied actions, noops included.
    pub applied: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Number of skipped actions.
    pub skipped: usize,
    /// Whether the run was cut short by cancellation.
    pub cancelled: bool,
}

/// What a worker sends back to the scheduler.
struct WorkerResult {
    index: usize,
    attempts: u32,
    result: Result<ActionSuccess>,
}

/// Provider-side result of a successful action.
struct ActionSuccess {
    provider_id: Option<String>,
    attributes: BTreeMap<String, Value>,
}

/// Everything a worker needs, detached from the scheduler's borrows.
struct ActionContext {
    index: usize,
    action_type: ActionType,
    kind: String,
    address: String,
    provider_id: Option<String>,
    attributes: BTreeMap<String, Value>,
    request_token: String,
    retryable: bool,
    policy: RetryPolicy,
}

impl PlanExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, parallelism: usize) -> Self {
        Self {
            provider,
            parallelism: parallelism.max(1),
            continue_on_error: true,
        }
    }

    /// Sets whether to keep going after a failure.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Executes a plan, mutating `state` as actions complete.
    ///
    /// The report enumerates every action; callers decide whether a failed
    /// or cancelled run is an error. State reflects exactly the actions
    /// that completed, so a partial run is safe to re-plan from.
    ///
    /// # Errors
    ///
    /// Returns an error only for internal scheduling faults, never for
    /// individual action failures.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        state: &mut StateFile,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        info!("Executing plan with {} actions", plan.actions.len());

        let total = plan.actions.len();
        let mut states: Vec<ActionState> = vec![ActionState::Pending; total];
        let mut outcomes: Vec<ActionOutcome> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| ActionOutcome {
                index,
                address: action.address.clone(),
                action_type: action.action_type,
                state: ActionState::Pending,
                provider_id: action.provider_id.clone(),
                error: None,
                attempts: 0,
            })
            .collect();

        let mut remaining_deps: Vec<HashSet<usize>> = plan
            .actions
            .iter()
            .map(|a| a.dependencies.iter().copied().collect())
            .collect();

        // Attribute outputs of resources applied this run, for reference
        // resolution in dependent actions
        let mut outputs: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();

        let mut ready: Vec<usize> = (0..total)
            .filter(|&i| remaining_deps[i].is_empty())
            .collect();
        let mut tasks: JoinSet<WorkerResult> = JoinSet::new();
        let mut in_flight = 0_usize;
        let mut stop_scheduling = false;

        loop {
            // Dispatch while there is capacity and work
            while !stop_scheduling && in_flight < self.parallelism {
                if cancel.is_cancelled() {
                    warn!("Cancellation requested, no new actions will start");
                    stop_scheduling = true;
                    break;
                }
                let Some(index) = ready.pop() else { break };

                let action = &plan.actions[index];

                // Noops complete inline; their outputs come from state
                if action.action_type == ActionType::Noop {
                    states[index] = ActionState::Applied;
                    outcomes[index].state = ActionState::Applied;
                    if let Some(record) = state.get_record(&action.address) {
                        outputs.insert(action.address.clone(), record.attributes.clone());
                    }
                    Self::release_dependents(plan, index, &mut remaining_deps, &mut ready);
                    continue;
                }

                match self.prepare_context(plan, index, &outputs, state) {
                    Ok(ctx) => {
                        states[index] = ActionState::Applying;
                        outcomes[index].state = ActionState::Applying;
                        let provider = Arc::clone(&self.provider);
                        let worker_cancel = cancel.clone();
                        tasks.spawn(run_action(provider, ctx, worker_cancel));
                        in_flight += 1;
                    }
                    Err(e) => {
                        error!("Cannot execute {}: {e}", plan.actions[index].address);
                        states[index] = ActionState::Failed;
                        outcomes[index].state = ActionState::Failed;
                        outcomes[index].error = Some(e.to_string());
                        if !self.continue_on_error {
                            stop_scheduling = true;
                        }
                    }
                }
            }

            if in_flight == 0 {
                break;
            }

            // Single writer: all state mutation happens here
            let Some(joined) = tasks.join_next().await else {
                break;
            };
            in_flight -= 1;

            let worker = joined
                .map_err(|e| TerraplaneError::internal(format!("Worker task panicked: {e}")))?;
            let index = worker.index;
            let action = &plan.actions[index];
            outcomes[index].attempts = worker.attempts;

            match worker.result {
                Ok(success) => {
                    info!("Applied {}: {}", action.action_type, action.address);
                    states[index] = ActionState::Applied;
                    outcomes[index].state = ActionState::Applied;
                    outcomes[index].provider_id.clone_from(&success.provider_id);

                    Self::commit(plan, index, &success, state);
                    if action.action_type != ActionType::Destroy {
                        outputs.insert(action.address.clone(), success.attributes);
                    }
                    Self::release_dependents(plan, index, &mut remaining_deps, &mut ready);
                }
                Err(e) => {
                    error!("Action failed for {}: {e}", action.address);
                    states[index] = ActionState::Failed;
                    outcomes[index].state = ActionState::Failed;
                    outcomes[index].error = Some(e.to_string());
                    // Stop scheduling without touching the cancellation
                    // token: a failed run is not a cancelled run
                    if !self.continue_on_error {
                        stop_scheduling = true;
                    }
                }
            }
        }

        // Everything that never ran is skipped: either its dependency
        // failed or the run was cancelled
        for index in 0..total {
            if matches!(states[index], ActionState::Pending | ActionState::Applying) {
                debug!("Skipping {}", plan.actions[index].address);
                states[index] = ActionState::Skipped;
                outcomes[index].state = ActionState::Skipped;
            }
        }

        let applied = count(&outcomes, ActionState::Applied);
        let failed = count(&outcomes, ActionState::Failed);
        let skipped = count(&outcomes, ActionState::Skipped);

        Ok(ExecutionReport {
            outcomes,
            applied,
            failed,
            skipped,
            cancelled: cancel.is_cancelled(),
        })
    }

    /// Builds the detached context a worker runs with. References are
    /// resolved here, against this run's outputs first and recorded state
    /// second.
    fn prepare_context(
        &self,
        plan: &ExecutionPlan,
        index: usize,
        outputs: &BTreeMap<String, BTreeMap<String, Value>>,
        state: &StateFile,
    ) -> Result<ActionContext> {
        let action = &plan.actions[index];
        let schema = self.provider.schema(&action.kind)?;

        let lookup = |reference: &Reference| -> Option<Value> {
            let address = reference.address();
            outputs
                .get(&address)
                .or_else(|| state.get_record(&address).map(|r| &r.attributes))
                .and_then(|attrs| attrs.get(&reference.attribute))
                .cloned()
        };

        let mut resolved = BTreeMap::new();
        for (name, value) in &action.attributes {
            let value = value.resolve(&lookup).map_err(|reference| {
                TerraplaneError::Exec(ExecError::UnresolvedReference {
                    expression: reference.expression(),
                    address: action.address.clone(),
                })
            })?;
            resolved.insert(name.clone(), value);
        }

        Ok(ActionContext {
            index,
            action_type: action.action_type,
            kind: action.kind.clone(),
            address: action.address.clone(),
            provider_id: action.provider_id.clone(),
            attributes: resolved,
            request_token: Uuid::new_v4().to_string(),
            retryable: schema.supports_request_tokens,
            policy: self.provider.retry_policy(),
        })
    }

    /// Applies a completed action to the state file.
    fn commit(plan: &ExecutionPlan, index: usize, success: &ActionSuccess, state: &mut StateFile) {
        let action = &plan.actions[index];
        match action.action_type {
            ActionType::Create => {
                let Some(provider_id) = &success.provider_id else {
                    return;
                };
                let hash = ConfigHasher::new().hash_attributes(&action.attributes);
                let mut record =
                    StateRecord::new(&action.kind, &action.name, provider_id, &hash);
                record.attributes.clone_from(&success.attributes);
                record.dependencies = Self::dependency_addresses(plan, action);
                state.set_record(record);
            }
            ActionType::Update => {
                let hash = ConfigHasher::new().hash_attributes(&action.attributes);
                if let Some(existing) = state.get_record(&action.address) {
                    let mut record = existing.clone();
                    record.attributes.clone_from(&success.attributes);
                    record.attr_hash = hash;
                    record.dependencies = Self::dependency_addresses(plan, action);
                    record.updated_at = chrono::Utc::now();
                    state.set_record(record);
                }
            }
            ActionType::Destroy => {
                state.remove_record(&action.address);
            }
            ActionType::Noop => {}
        }
    }

    /// Addresses of the resources an action's dependencies point at,
    /// recorded for later destroy ordering. The destroy half of a replace
    /// is not a dependency on another resource and is excluded.
    fn dependency_addresses(plan: &ExecutionPlan, action: &PlannedAction) -> Vec<String> {
        let mut addresses: Vec<String> = action
            .dependencies
            .iter()
            .map(|&dep| &plan.actions[dep])
            .filter(|dep| {
                dep.action_type != ActionType::Destroy && dep.address != action.address
            })
            .map(|dep| dep.address.clone())
            .collect();
        addresses.sort_unstable();
        addresses.dedup();
        addresses
    }

    /// Marks `index` complete in dependents and enqueues any now ready.
    fn release_dependents(
        plan: &ExecutionPlan,
        index: usize,
        remaining_deps: &mut [HashSet<usize>],
        ready: &mut Vec<usize>,
    ) {
        for (dependent, _) in plan.dependent_actions(index) {
            if remaining_deps[dependent].remove(&index) && remaining_deps[dependent].is_empty() {
                ready.push(dependent);
            }
        }
    }
}

/// Runs one action against the provider, with retry on transient failures.
async fn run_action(
    provider: Arc<dyn Provider>,
    ctx: ActionContext,
    cancel: CancellationToken,
) -> WorkerResult {
    let max_attempts = if ctx.retryable { ctx.policy.max_attempts } else { 1 };
    let mut attempts = 0;

    let result = loop {
        attempts += 1;
        let attempt_result = call_provider(provider.as_ref(), &ctx).await;

        match attempt_result {
            Ok(success) => break Ok(success),
            Err(e) if e.is_retryable() && attempts < max_attempts => {
                // An explicit provider hint wins over the policy backoff
                let delay = match &e {
                    TerraplaneError::Provider(ProviderError::Transient {
                        retry_after_secs: Some(secs),
                        ..
                    }) => std::time::Duration::from_secs(*secs),
                    _ => ctx.policy.delay_for_attempt(attempts),
                };
                warn!(
                    "Transient failure for {} (attempt {attempts}/{max_attempts}), retrying in {delay:?}: {e}",
                    ctx.address
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => break Err(e),
                }
            }
            // A transient failure that ate the whole retry budget escalates
            Err(e) if e.is_retryable() && max_attempts > 1 => {
                break Err(TerraplaneError::Provider(ProviderError::RetriesExhausted {
                    attempts,
                    message: e.to_string(),
                }));
            }
            Err(e) => break Err(e),
        }
    };

    WorkerResult {
        index: ctx.index,
        attempts,
        result,
    }
}

async fn call_provider(provider: &dyn Provider, ctx: &ActionContext) -> Result<ActionSuccess> {
    match ctx.action_type {
        ActionType::Create => {
            let response = provider
                .create(&ctx.kind, &ctx.attributes, &ctx.request_token)
                .await?;
            Ok(ActionSuccess {
                provider_id: Some(response.provider_id),
                attributes: response.attributes,
            })
        }
        ActionType::Update => {
            let provider_id = ctx.provider_id.clone().ok_or_else(|| {
                TerraplaneError::internal(format!("Update without provider id: {}", ctx.address))
            })?;
            let attributes = provider
                .update(&ctx.kind, &provider_id, &ctx.attributes)
                .await?;
            Ok(ActionSuccess {
                provider_id: Some(provider_id),
                attributes,
            })
        }
        ActionType::Destroy => {
            let provider_id = ctx.provider_id.clone().ok_or_else(|| {
                TerraplaneError::internal(format!("Destroy without provider id: {}", ctx.address))
            })?;
            provider.destroy(&ctx.kind, &provider_id).await?;
            Ok(ActionSuccess {
                provider_id: Some(provider_id),
                attributes: BTreeMap::new(),
            })
        }
        ActionType::Noop => Ok(ActionSuccess {
            provider_id: ctx.provider_id.clone(),
            attributes: ctx.attributes.clone(),
        }),
    }
}

fn count(outcomes: &[ActionOutcome], state: ActionState) -> usize {
    outcomes.iter().filter(|o| o.state == state).count()
}

impl ExecutionReport {
    /// Returns true if every action applied cleanly.
    #[must_use]
    pub const fn all_applied(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && !self.cancelled
    }
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} applied, {} failed, {} skipped",
            self.applied, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Reference;
    use crate::graph::DependencyGraph;
    use crate::planner::diff::DiffEngine;
    use crate::provider::MemoryProvider;
    use crate::registry::ResourceRegistry;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
            .collect()
    }

    fn three_tier_registry() -> ResourceRegistry {
        let mut registry = ResourceRegistry::new();
        registry
            .register("network", "main", attrs(&[("cidr_block", "10.0.0.0/16")]))
            .expect("unique");

        let mut subnet_attrs = attrs(&[("cidr_block", "10.0.1.0/24")]);
        subnet_attrs.insert(
            String::from("network_id"),
            Value::Reference(Reference::parse("network.main.id").expect("valid")),
        );
        registry
            .register("subnet", "public", subnet_attrs)
            .expect("unique");

        let mut instance_attrs = attrs(&[("image", "ubuntu-24.04")]);
        instance_attrs.insert(
            String::from("subnet_id"),
            Value::Reference(Reference::parse("subnet.public.id").expect("valid")),
        );
        registry
            .register("instance", "web", instance_attrs)
            .expect("unique");

        registry
    }

    fn plan_for(registry: &ResourceRegistry, state: &StateFile, provider: &MemoryProvider) -> ExecutionPlan {
        let graph = DependencyGraph::build(registry).expect("acyclic");
        let diff = DiffEngine::new()
            .compute_diff(registry, Some(state), provider)
            .expect("diff succeeds");
        ExecutionPlan::from_diff(&diff, registry, &graph, "hash").expect("valid plan")
    }

    #[tokio::test]
    async fn test_full_create_resolves_references() {
        let registry = three_tier_registry();
        let provider = Arc::new(MemoryProvider::new());
        let mut state = StateFile::new("p", "dev");
        let plan = plan_for(&registry, &state, &provider);

        let executor = PlanExecutor::new(provider.clone(), 4);
        let report = executor
            .execute(&plan, &mut state, &CancellationToken::new())
            .await
            .expect("execution runs");

        assert!(report.all_applied());
        assert_eq!(state.records.len(), 3);

        // The subnet's network_id must be the network's real id
        let network = state.get_record("network.main").expect("recorded");
        let subnet = state.get_record("subnet.public").expect("recorded");
        assert_eq!(
            subnet.attribute("network_id"),
            Some(&Value::String(network.provider_id.clone()))
        );
        assert_eq!(subnet.dependencies, vec![String::from("network.main")]);
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependents() {
        let registry = three_tier_registry();
        let provider = Arc::new(MemoryProvider::new());
        // More failures than retry attempts
        provider.inject_transient_failures("network", 10).await;

        let mut state = StateFile::new("p", "dev");
        let plan = plan_for(&registry, &state, &provider);

        let executor = PlanExecutor::new(provider.clone(), 4);
        let report = executor
            .execute(&plan, &mut state, &CancellationToken::new())
            .await
            .expect("execution runs");

        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 2);
        assert!(state.records.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_retried_to_success() {
        let mut registry = ResourceRegistry::new();
        registry
            .register("network", "main", attrs(&[("cidr_block", "10.0.0.0/16")]))
            .expect("unique");

        let provider = Arc::new(
            MemoryProvider::new().with_retry_policy(RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
            }),
        );
        provider.inject_transient_failures("network", 1).await;

        let mut state = StateFile::new("p", "dev");
        let plan = plan_for(&registry, &state, &provider);

        let executor = PlanExecutor::new(provider.clone(), 1);
        let report = executor
            .execute(&plan, &mut state, &CancellationToken::new())
            .await
            .expect("execution runs");

        assert!(report.all_applied());
        assert_eq!(report.outcomes[0].attempts, 2);
        assert_eq!(state.records.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_escalate() {
        let mut registry = ResourceRegistry::new();
        registry
            .register("network", "main", attrs(&[("cidr_block", "10.0.0.0/16")]))
            .expect("unique");

        let provider = Arc::new(
            MemoryProvider::new().with_retry_policy(RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
            }),
        );
        // More failures than the retry budget allows
        provider.inject_transient_failures("network", 10).await;

        let mut state = StateFile::new("p", "dev");
        let plan = plan_for(&registry, &state, &provider);

        let executor = PlanExecutor::new(provider.clone(), 1);
        let report = executor
            .execute(&plan, &mut state, &CancellationToken::new())
            .await
            .expect("execution runs");

        assert_eq!(report.failed, 1);
        assert_eq!(report.outcomes[0].attempts, 3);
        let error = report.outcomes[0].error.as_deref().expect("error recorded");
        assert!(error.contains("after 3 attempts"), "got: {error}");
    }

    #[tokio::test]
    async fn test_stop_on_error_is_failure_not_cancellation() {
        let registry = three_tier_registry();
        let provider = Arc::new(
            MemoryProvider::new().with_retry_policy(RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 5,
            }),
        );
        provider.inject_transient_failures("network", 10).await;

        let mut state = StateFile::new("p", "dev");
        let plan = plan_for(&registry, &state, &provider);

        let cancel = CancellationToken::new();
        let executor = PlanExecutor::new(provider.clone(), 4).with_continue_on_error(false);
        let report = executor
            .execute(&plan, &mut state, &cancel)
            .await
            .expect("execution runs");

        // Stopping on a failure must not masquerade as a cancelled run
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 2);
        assert!(!report.cancelled);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_skips_pending_work() {
        let registry = three_tier_registry();
        let provider = Arc::new(MemoryProvider::new());
        let mut state = StateFile::new("p", "dev");
        let plan = plan_for(&registry, &state, &provider);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let executor = PlanExecutor::new(provider.clone(), 4);
        let report = executor
            .execute(&plan, &mut state, &cancel)
            .await
            .expect("execution runs");

        assert!(report.cancelled);
        assert_eq!(report.skipped, 3);
        assert!(state.records.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_removes_record() {
        let registry = ResourceRegistry::new();
        let provider = Arc::new(MemoryProvider::new());

        // Seed provider and state with one resource
        let response = provider
            .create("network", &attrs(&[]), "seed-token")
            .await
            .expect("seed create");
        let mut state = StateFile::new("p", "dev");
        state.set_record(StateRecord::new(
            "network",
            "old",
            &response.provider_id,
            "hash",
        ));

        let plan = plan_for(&registry, &state, &provider);
        assert_eq!(plan.destroy_count(), 1);

        let executor = PlanExecutor::new(provider.clone(), 4);
        let report = executor
            .execute(&plan, &mut state, &CancellationToken::new())
            .await
            .expect("execution runs");

        assert!(report.all_applied());
        assert!(state.records.is_empty());
        assert_eq!(provider.resource_count().await, 0);
    }
}
