//! Diff engine for comparing declared resources against recorded state.
//!
//! Each declared resource is classified as create, update, replace, or
//! no-change by comparing its declared attribute hash against the recorded
//! hash. Records with no surviving declaration become destroys.

use tracing::debug;

use crate::config::{ConfigHasher, Reference, Value};
use crate::error::Result;
use crate::provider::Provider;
use crate::registry::{Resource, ResourceRegistry};
use crate::state::{StateFile, StateRecord};

/// Engine for computing diffs between declarations and recorded state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// `kind.name` address.
    pub address: String,
    /// Resource kind.
    pub kind: String,
    /// Resource name.
    pub name: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Per-attribute details.
    pub details: Vec<DiffDetail>,
    /// Recorded hash, if a record exists.
    pub old_hash: Option<String>,
    /// Declared hash, if a declaration exists.
    pub new_hash: Option<String>,
    /// Provider identifier, if a record exists.
    pub provider_id: Option<String>,
    /// Recorded dependency addresses, for destroy ordering.
    pub recorded_dependencies: Vec<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource can be updated in place.
    Update,
    /// An immutable attribute changed: destroy then create.
    Replace,
    /// Record exists but the declaration is gone.
    Destroy,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a single attribute difference.
#[derive(Debug, Clone)]
pub struct DiffDetail {
    /// Attribute that differs.
    pub field: String,
    /// Recorded value.
    pub old_value: Option<String>,
    /// Declared value; references unresolvable before apply show as
    /// "(known after apply)".
    pub new_value: Option<String>,
    /// Whether this attribute forces a replace.
    pub forces_replace: bool,
}

/// Complete diff result.
#[derive(Debug)]
pub struct DiffResult {
    /// All resource diffs, declarations first, then orphans.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to destroy.
    pub destroys: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the diff between the registry and the recorded state.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider does not support a declared kind.
    pub fn compute_diff(
        &self,
        registry: &ResourceRegistry,
        state: Option<&StateFile>,
        provider: &dyn Provider,
    ) -> Result<DiffResult> {
        let mut diffs = Vec::new();

        for resource in registry.iter() {
            let new_hash = self.hasher.hash_attributes(&resource.attributes);
            let record = state.and_then(|s| s.get_record(&resource.id.address()));
            diffs.push(Self::diff_resource(resource, record, state, provider, &new_hash)?);
        }

        // Records whose declaration is gone become destroys
        if let Some(state) = state {
            for (address, record) in &state.records {
                let declared = address
                    .parse()
                    .is_ok_and(|id| registry.contains(&id));
                if !declared {
                    debug!("Found orphaned record: {address}");
                    diffs.push(ResourceDiff {
                        address: address.clone(),
                        kind: record.kind.clone(),
                        name: record.name.clone(),
                        diff_type: DiffType::Destroy,
                        details: vec![],
                        old_hash: Some(record.attr_hash.clone()),
                        new_hash: None,
                        provider_id: Some(record.provider_id.clone()),
                        recorded_dependencies: record.dependencies.clone(),
                    });
                }
            }
        }

        let creates = count(&diffs, DiffType::Create);
        let updates = count(&diffs, DiffType::Update);
        let replaces = count(&diffs, DiffType::Replace);
        let destroys = count(&diffs, DiffType::Destroy);
        let unchanged = count(&diffs, DiffType::NoChange);

        Ok(DiffResult {
            diffs,
            creates,
            updates,
            replaces,
            destroys,
            unchanged,
        })
    }

    /// Classifies a single declared resource against its record.
    fn diff_resource(
        resource: &Resource,
        record: Option<&StateRecord>,
        state: Option<&StateFile>,
        provider: &dyn Provider,
        new_hash: &str,
    ) -> Result<ResourceDiff> {
        let address = resource.id.address();

        let Some(record) = record else {
            debug!("Resource {address} needs to be created");
            return Ok(ResourceDiff {
                address,
                kind: resource.id.kind.clone(),
                name: resource.id.name.clone(),
                diff_type: DiffType::Create,
                details: vec![],
                old_hash: None,
                new_hash: Some(new_hash.to_string()),
                provider_id: None,
                recorded_dependencies: vec![],
            });
        };

        if record.attr_hash == new_hash {
            debug!("Resource {address} is up to date");
            return Ok(ResourceDiff {
                address,
                kind: resource.id.kind.clone(),
                name: resource.id.name.clone(),
                diff_type: DiffType::NoChange,
                details: vec![],
                old_hash: Some(record.attr_hash.clone()),
                new_hash: Some(new_hash.to_string()),
                provider_id: Some(record.provider_id.clone()),
                recorded_dependencies: record.dependencies.clone(),
            });
        }

        let schema = provider.schema(&resource.id.kind)?;
        let details = Self::attribute_details(resource, record, state, |attr| {
            schema.is_immutable(attr)
        });

        let forces_replace = details.iter().any(|d| d.forces_replace);
        let diff_type = if forces_replace {
            DiffType::Replace
        } else {
            DiffType::Update
        };

        debug!("Resource {address} needs {diff_type}");
        Ok(ResourceDiff {
            address,
            kind: resource.id.kind.clone(),
            name: resource.id.name.clone(),
            diff_type,
            details,
            old_hash: Some(record.attr_hash.clone()),
            new_hash: Some(new_hash.to_string()),
            provider_id: Some(record.provider_id.clone()),
            recorded_dependencies: record.dependencies.clone(),
        })
    }

    /// Compares declared attributes against the recorded resolved values.
    ///
    /// Reference values are resolved from other records where possible; a
    /// reference whose target has no recorded value counts as changed,
    /// since its value is only known after apply.
    fn attribute_details(
        resource: &Resource,
        record: &StateRecord,
        state: Option<&StateFile>,
        is_immutable: impl Fn(&str) -> bool,
    ) -> Vec<DiffDetail> {
        let mut details = Vec::new();

        for (attr, declared) in &resource.attributes {
            let recorded = record.attribute(attr);
            let resolved = resolve_from_state(declared, state);

            let changed = match (&resolved, recorded) {
                (Some(value), Some(old)) => value != old,
                (Some(_), None) | (None, _) => true,
            };

            if changed {
                details.push(DiffDetail {
                    field: attr.clone(),
                    old_value: recorded.map(ToString::to_string),
                    new_value: Some(resolved.as_ref().map_or_else(
                        || String::from("(known after apply)"),
                        ToString::to_string,
                    )),
                    forces_replace: is_immutable(attr),
                });
            }
        }

        // Attributes removed from the declaration also count as changes.
        // Provider-computed attributes such as `id` are not declared and
        // are skipped.
        for (attr, old) in &record.attributes {
            if attr != "id" && !resource.attributes.contains_key(attr) {
                details.push(DiffDetail {
                    field: attr.clone(),
                    old_value: Some(old.to_string()),
                    new_value: None,
                    forces_replace: is_immutable(attr),
                });
            }
        }

        details
    }
}

/// Resolves a declared value using recorded state, returning `None` when any
/// contained reference has no recorded value yet.
fn resolve_from_state(value: &Value, state: Option<&StateFile>) -> Option<Value> {
    let lookup = |reference: &Reference| -> Option<Value> {
        state?
            .get_record(&reference.address())?
            .attribute(&reference.attribute)
            .cloned()
    };
    value.resolve(&lookup).ok()
}

fn count(diffs: &[ResourceDiff], diff_type: DiffType) -> usize {
    diffs.iter().filter(|d| d.diff_type == diff_type).count()
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.replaces > 0 || self.destroys > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.destroys
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Destroy => "destroy",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.address, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
