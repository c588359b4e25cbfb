//! Execution plan types and construction.
//!
//! A plan is an ordered list of actions with index-based dependencies.
//! Creates and updates follow the dependency graph; destroys run in reverse.
//! A replace is lowered to a destroy followed by a create with an explicit
//! ordering edge between the pair.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::config::Value;
use crate::error::{PlanError, Result, TerraplaneError};
use crate::graph::DependencyGraph;
use crate::registry::{ResourceId, ResourceRegistry};

use super::diff::{DiffResult, DiffType, ResourceDiff};

/// A complete execution plan.
#[derive(Debug)]
pub struct ExecutionPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Stack configuration hash this plan is based on.
    pub config_hash: String,
    /// Planned actions; dependencies are indices into this list.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// `kind.name` address.
    pub address: String,
    /// Resource kind.
    pub kind: String,
    /// Resource name.
    pub name: String,
    /// Declared attributes; may still contain references, resolved at
    /// execution time.
    pub attributes: BTreeMap<String, Value>,
    /// Provider identifier, required for update and destroy.
    pub provider_id: Option<String>,
    /// Reason for this action.
    pub reason: String,
    /// Action indices that must complete first.
    pub dependencies: Vec<usize>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Destroy an existing resource.
    Destroy,
    /// No operation; kept so reports enumerate every resource.
    Noop,
}

impl ExecutionPlan {
    /// Builds a plan from a diff result.
    ///
    /// # Errors
    ///
    /// Returns `MissingProviderId` if a destroy or update has no recorded
    /// provider identifier, or `Conflict` for contradictory actions.
    pub fn from_diff(
        diff: &DiffResult,
        registry: &ResourceRegistry,
        graph: &DependencyGraph,
        config_hash: &str,
    ) -> Result<Self> {
        let mut actions = Vec::new();

        // Destroy index per address, filled in during phase one
        let mut destroy_index: BTreeMap<String, usize> = BTreeMap::new();

        // Phase one: destroys. Orphans first (address order), then the
        // destroy half of every replace in reverse dependency order.
        let orphans: Vec<&ResourceDiff> = diff
            .diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Destroy)
            .collect();

        for orphan in &orphans {
            destroy_index.insert(orphan.address.clone(), actions.len());
            actions.push(PlannedAction {
                action_type: ActionType::Destroy,
                address: orphan.address.clone(),
                kind: orphan.kind.clone(),
                name: orphan.name.clone(),
                attributes: BTreeMap::new(),
                provider_id: orphan.provider_id.clone(),
                reason: String::from("Declaration removed from configuration"),
                dependencies: vec![],
            });
        }

        let replace_diffs: BTreeMap<&str, &ResourceDiff> = diff
            .diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Replace)
            .map(|d| (d.address.as_str(), d))
            .collect();

        for id in graph.reverse_order() {
            if let Some(replaced) = replace_diffs.get(id.address().as_str()) {
                destroy_index.insert(replaced.address.clone(), actions.len());
                actions.push(PlannedAction {
                    action_type: ActionType::Destroy,
                    address: replaced.address.clone(),
                    kind: replaced.kind.clone(),
                    name: replaced.name.clone(),
                    attributes: BTreeMap::new(),
                    provider_id: replaced.provider_id.clone(),
                    reason: replace_reason(replaced),
                    dependencies: vec![],
                });
            }
        }

        // Destroy ordering: a resource is destroyed only after everything
        // that depends on it is destroyed.
        Self::wire_destroy_edges(&mut actions, &destroy_index, &orphans, graph);

        // Phase two: declared resources in dependency order.
        let declared_diffs: BTreeMap<&str, &ResourceDiff> = diff
            .diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::Destroy)
            .map(|d| (d.address.as_str(), d))
            .collect();

        // Terminal action per address: the index whose completion makes the
        // resource available to its dependents.
        let mut terminal_index: BTreeMap<String, usize> = BTreeMap::new();

        for id in graph.topo_order() {
            let address = id.address();
            let Some(resource_diff) = declared_diffs.get(address.as_str()) else {
                continue;
            };

            let mut dependencies: Vec<usize> = Self::dependency_indices(graph, &id, &terminal_index);

            let action = match resource_diff.diff_type {
                DiffType::Create => PlannedAction {
                    action_type: ActionType::Create,
                    address: address.clone(),
                    kind: resource_diff.kind.clone(),
                    name: resource_diff.name.clone(),
                    attributes: declared_attributes(registry, &id),
                    provider_id: None,
                    reason: String::from("Not recorded in state"),
                    dependencies,
                },
                DiffType::Update => PlannedAction {
                    action_type: ActionType::Update,
                    address: address.clone(),
                    kind: resource_diff.kind.clone(),
                    name: resource_diff.name.clone(),
                    attributes: declared_attributes(registry, &id),
                    provider_id: resource_diff.provider_id.clone(),
                    reason: update_reason(resource_diff),
                    dependencies,
                },
                DiffType::Replace => {
                    // The create half waits for its own destroy
                    if let Some(&destroy_idx) = destroy_index.get(&address) {
                        dependencies.push(destroy_idx);
                    }
                    PlannedAction {
                        action_type: ActionType::Create,
                        address: address.clone(),
                        kind: resource_diff.kind.clone(),
                        name: resource_diff.name.clone(),
                        attributes: declared_attributes(registry, &id),
                        provider_id: None,
                        reason: replace_reason(resource_diff),
                        dependencies,
                    }
                }
                DiffType::NoChange => PlannedAction {
                    action_type: ActionType::Noop,
                    address: address.clone(),
                    kind: resource_diff.kind.clone(),
                    name: resource_diff.name.clone(),
                    attributes: declared_attributes(registry, &id),
                    provider_id: resource_diff.provider_id.clone(),
                    reason: String::from("Up to date"),
                    dependencies,
                },
                DiffType::Destroy => unreachable!("destroys handled in phase one"),
            };

            terminal_index.insert(address, actions.len());
            actions.push(action);
        }

        let plan = Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Creates an empty plan.
    #[must_use]
    pub fn empty(config_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions: vec![],
        }
    }

    /// Wires ordering edges between destroy actions so dependents go first.
    fn wire_destroy_edges(
        actions: &mut [PlannedAction],
        destroy_index: &BTreeMap<String, usize>,
        orphans: &[&ResourceDiff],
        graph: &DependencyGraph,
    ) {
        // Orphan records carry their dependency addresses from apply time
        for orphan in orphans {
            let Some(&dependent_idx) = destroy_index.get(&orphan.address) else {
                continue;
            };
            for dep_address in &orphan.recorded_dependencies {
                if let Some(&dep_idx) = destroy_index.get(dep_address) {
                    actions[dep_idx].dependencies.push(dependent_idx);
                }
            }
        }

        // Replace destroys follow the live graph
        for (address, &idx) in destroy_index {
            let Ok(id) = address.parse::<ResourceId>() else {
                continue;
            };
            for dependent in graph.dependents_of(&id) {
                if let Some(&dependent_idx) = destroy_index.get(&dependent.address()) {
                    actions[idx].dependencies.push(dependent_idx);
                }
            }
        }

        for action in actions {
            action.dependencies.sort_unstable();
            action.dependencies.dedup();
        }
    }

    /// Returns the terminal action indices for a resource's dependencies.
    fn dependency_indices(
        graph: &DependencyGraph,
        id: &ResourceId,
        terminal_index: &BTreeMap<String, usize>,
    ) -> Vec<usize> {
        graph
            .dependencies_of(id)
            .into_iter()
            .filter_map(|dep| terminal_index.get(&dep.address()).copied())
            .collect()
    }

    /// Rejects contradictory or under-specified plans.
    ///
    /// # Errors
    ///
    /// Returns `MissingProviderId` for a destroy or update without a
    /// provider identifier, and `Conflict` when the same address is both
    /// destroyed and created with no ordering edge between the pair.
    pub fn validate(&self) -> Result<()> {
        for action in &self.actions {
            if matches!(action.action_type, ActionType::Destroy | ActionType::Update)
                && action.provider_id.is_none()
            {
                return Err(TerraplaneError::Plan(PlanError::MissingProviderId {
                    action: action.action_type.to_string(),
                    address: action.address.clone(),
                }));
            }
        }

        for (destroy_idx, destroy) in self.actions.iter().enumerate() {
            if destroy.action_type != ActionType::Destroy {
                continue;
            }
            for create in &self.actions {
                if create.action_type == ActionType::Create
                    && create.address == destroy.address
                    && !create.dependencies.contains(&destroy_idx)
                {
                    return Err(TerraplaneError::Plan(PlanError::Conflict {
                        address: destroy.address.clone(),
                        message: String::from(
                            "destroy and create for the same resource have no ordering edge",
                        ),
                    }));
                }
            }
        }

        Ok(())
    }

    /// Returns true if the plan has no actionable work.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions
            .iter()
            .all(|a| a.action_type == ActionType::Noop)
    }

    /// Returns the number of actions, including noops.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of create actions.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(ActionType::Create)
    }

    /// Returns the number of update actions.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count(ActionType::Update)
    }

    /// Returns the number of destroy actions.
    #[must_use]
    pub fn destroy_count(&self) -> usize {
        self.count(ActionType::Destroy)
    }

    fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    /// Returns actions that can be executed immediately.
    #[must_use]
    pub fn ready_actions(&self) -> Vec<&PlannedAction> {
        self.actions
            .iter()
            .filter(|a| a.dependencies.is_empty())
            .collect()
    }

    /// Gets actions that depend on a specific action index.
    #[must_use]
    pub fn dependent_actions(&self, action_idx: usize) -> Vec<(usize, &PlannedAction)> {
        self.actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.dependencies.contains(&action_idx))
            .collect()
    }
}

fn declared_attributes(registry: &ResourceRegistry, id: &ResourceId) -> BTreeMap<String, Value> {
    registry
        .get_by_id(id)
        .map(|r| r.attributes.clone())
        .unwrap_or_default()
}

fn update_reason(diff: &ResourceDiff) -> String {
    let fields: Vec<&str> = diff.details.iter().map(|d| d.field.as_str()).collect();
    format!("Attribute changes: {}", fields.join(", "))
}

fn replace_reason(diff: &ResourceDiff) -> String {
    let fields: Vec<&str> = diff
        .details
        .iter()
        .filter(|d| d.forces_replace)
        .map(|d| d.field.as_str())
        .collect();
    format!("Immutable attribute changed: {}", fields.join(", "))
}

impl PlannedAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("Create {}", self.address),
            ActionType::Update => format!("Update {}", self.address),
            ActionType::Destroy => format!("Destroy {}", self.address),
            ActionType::Noop => format!("No change for {}", self.address),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
            Self::Noop => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.address)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Execution plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigHasher, Reference};
    use crate::planner::diff::DiffEngine;
    use crate::provider::MemoryProvider;
    use crate::state::{StateFile, StateRecord};

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
            .collect()
    }

    fn plan_for(
        registry: &ResourceRegistry,
        state: Option<&StateFile>,
    ) -> ExecutionPlan {
        let graph = DependencyGraph::build(registry).expect("acyclic");
        let provider = MemoryProvider::new();
        let diff = DiffEngine::new()
            .compute_diff(registry, state, &provider)
            .expect("diff succeeds");
        ExecutionPlan::from_diff(&diff, registry, &graph, "hash").expect("valid plan")
    }

    #[test]
    fn test_creates_follow_dependency_order() {
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

        let plan = plan_for(&registry, None);

        assert_eq!(plan.create_count(), 2);
        let network_idx = plan
            .actions
            .iter()
            .position(|a| a.address == "network.main")
            .expect("network planned");
        let subnet = plan
            .actions
            .iter()
            .find(|a| a.address == "subnet.public")
            .expect("subnet planned");
        assert!(subnet.dependencies.contains(&network_idx));
    }

    #[test]
    fn test_replace_is_destroy_then_create_with_edge() {
        let mut registry = ResourceRegistry::new();
        registry
            .register("network", "main", attrs(&[("cidr_block", "10.1.0.0/16")]))
            .expect("unique");

        let mut state = StateFile::new("p", "dev");
        let mut record = StateRecord::new("network", "main", "net-old", "stale");
        record.attributes = attrs(&[("cidr_block", "10.0.0.0/16")]);
        state.set_record(record);

        let plan = plan_for(&registry, Some(&state));

        assert_eq!(plan.destroy_count(), 1);
        assert_eq!(plan.create_count(), 1);

        let destroy_idx = plan
            .actions
            .iter()
            .position(|a| a.action_type == ActionType::Destroy)
            .expect("destroy planned");
        let create = plan
            .actions
            .iter()
            .find(|a| a.action_type == ActionType::Create)
            .expect("create planned");
        assert!(create.dependencies.contains(&destroy_idx));
    }

    #[test]
    fn test_orphan_destroys_in_reverse_dependency_order() {
        let registry = ResourceRegistry::new();

        let mut state = StateFile::new("p", "dev");
        let mut network = StateRecord::new("network", "main", "net-1", "h1");
        network.attributes = attrs(&[]);
        state.set_record(network);
        let mut subnet = StateRecord::new("subnet", "public", "sub-1", "h2");
        subnet.dependencies = vec![String::from("network.main")];
        state.set_record(subnet);

        let plan = plan_for(&registry, Some(&state));

        assert_eq!(plan.destroy_count(), 2);
        let network_destroy = plan
            .actions
            .iter()
            .find(|a| a.address == "network.main")
            .expect("network destroy planned");
        let subnet_idx = plan
            .actions
            .iter()
            .position(|a| a.address == "subnet.public")
            .expect("subnet destroy planned");
        assert!(network_destroy.dependencies.contains(&subnet_idx));
    }

    #[test]
    fn test_unchanged_resources_are_noops() {
        let declared = attrs(&[("cidr_block", "10.0.0.0/16")]);
        let hash = ConfigHasher::new().hash_attributes(&declared);

        let mut registry = ResourceRegistry::new();
        registry
            .register("network", "main", declared.clone())
            .expect("unique");

        let mut state = StateFile::new("p", "dev");
        let mut record = StateRecord::new("network", "main", "net-1", &hash);
        record.attributes = declared;
        state.set_record(record);

        let plan = plan_for(&registry, Some(&state));

        assert_eq!(plan.action_count(), 1);
        assert_eq!(plan.actions[0].action_type, ActionType::Noop);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_missing_provider_id_rejected() {
        let plan = ExecutionPlan {
            created_at: Utc::now(),
            config_hash: String::from("hash"),
            actions: vec![PlannedAction {
                action_type: ActionType::Destroy,
                address: String::from("network.main"),
                kind: String::from("network"),
                name: String::from("main"),
                attributes: BTreeMap::new(),
                provider_id: None,
                reason: String::new(),
                dependencies: vec![],
            }],
        };

        assert!(matches!(
            plan.validate(),
            Err(TerraplaneError::Plan(PlanError::MissingProviderId { .. }))
        ));
    }

    #[test]
    fn test_conflicting_destroy_create_rejected() {
        let plan = ExecutionPlan {
            created_at: Utc::now(),
            config_hash: String::from("hash"),
            actions: vec![
                PlannedAction {
                    action_type: ActionType::Destroy,
                    address: String::from("network.main"),
                    kind: String::from("network"),
                    name: String::from("main"),
                    attributes: BTreeMap::new(),
                    provider_id: Some(String::from("net-1")),
                    reason: String::new(),
                    dependencies: vec![],
                },
                PlannedAction {
                    action_type: ActionType::Create,
                    address: String::from("network.main"),
                    kind: String::from("network"),
                    name: String::from("main"),
                    attributes: BTreeMap::new(),
                    provider_id: None,
                    reason: String::new(),
                    dependencies: vec![],
                },
            ],
        };

        assert!(matches!(
            plan.validate(),
            Err(TerraplaneError::Plan(PlanError::Conflict { .. }))
        ));
    }
}
