//! Resource registry: the in-memory data model for a single run.
//!
//! The registry owns one [`Resource`] per declared `(kind, name)` identity.
//! It is built from the parsed configuration, handed to the reference
//! resolver, and consulted by the planner. There is no process-wide
//! singleton; every component receives the registry it should operate on.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{ResourceSpec, StackConfig, Value};
use crate::error::{ConfigError, Result, TerraplaneError};

/// Identity of a resource: unique `(kind, name)` pair within a configuration.
///
/// Ordering is kind-first, then name, which is the deterministic tie-break
/// used everywhere independent resources need a stable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource kind.
    pub kind: String,
    /// Resource name.
    pub name: String,
}

impl ResourceId {
    /// Creates a new resource identity.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Returns the `kind.name` address string.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = TerraplaneError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(2, '.');
        let kind = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();

        if kind.is_empty() || name.is_empty() {
            return Err(TerraplaneError::Config(ConfigError::InvalidReference {
                expression: s.to_string(),
                message: String::from("expected format: kind.name"),
            }));
        }

        Ok(Self::new(kind, name))
    }
}

/// A single registered resource declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Identity of the resource.
    pub id: ResourceId,
    /// Declared attributes; values may contain references.
    pub attributes: BTreeMap<String, Value>,
    /// Explicit ordering hints, resolved to identities.
    pub depends_on: Vec<ResourceId>,
}

/// Registry of declared resources for a single run.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    /// Resources keyed by identity.
    resources: BTreeMap<ResourceId, Resource>,
}

impl ResourceRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            resources: BTreeMap::new(),
        }
    }

    /// Builds a registry from a parsed stack configuration.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateResource` if two declarations share an identity, or
    /// a parse error for malformed `depends_on` addresses.
    pub fn from_config(config: &StackConfig) -> Result<Self> {
        let mut registry = Self::new();

        for spec in &config.resources {
            let depends_on = spec
                .depends_on
                .iter()
                .map(|addr| addr.parse())
                .collect::<Result<Vec<ResourceId>>>()?;

            registry.register_spec(spec, depends_on)?;
        }

        Ok(registry)
    }

    /// Registers a resource declaration.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateResource` if the identity is already registered in
    /// this run.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
        attributes: BTreeMap<String, Value>,
    ) -> Result<&Resource> {
        let id = ResourceId::new(kind, name);
        self.insert(Resource {
            id: id.clone(),
            attributes,
            depends_on: vec![],
        })?;
        Ok(&self.resources[&id])
    }

    fn register_spec(&mut self, spec: &ResourceSpec, depends_on: Vec<ResourceId>) -> Result<()> {
        self.insert(Resource {
            id: ResourceId::new(spec.kind.clone(), spec.name.clone()),
            attributes: spec.attributes.clone(),
            depends_on,
        })
    }

    fn insert(&mut self, resource: Resource) -> Result<()> {
        let address = resource.id.address();
        if self.resources.contains_key(&resource.id) {
            return Err(TerraplaneError::Config(ConfigError::DuplicateResource {
                address,
            }));
        }
        self.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// Gets a resource by kind and name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if the identity is not registered.
    pub fn get(&self, kind: &str, name: &str) -> Result<&Resource> {
        let id = ResourceId::new(kind, name);
        self.get_by_id(&id)
    }

    /// Gets a resource by identity.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if the identity is not registered.
    pub fn get_by_id(&self, id: &ResourceId) -> Result<&Resource> {
        self.resources.get(id).ok_or_else(|| {
            TerraplaneError::Config(ConfigError::UnknownResource {
                address: id.address(),
                referrer: None,
            })
        })
    }

    /// Returns true if the identity is registered.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    /// Iterates resources in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Returns all identities in order.
    #[must_use]
    pub fn ids(&self) -> Vec<&ResourceId> {
        self.resources.keys().collect()
    }

    /// Returns the number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let mut registry = ResourceRegistry::new();
        registry
            .register("network", "main", BTreeMap::new())
            .expect("first registration succeeds");

        let resource = registry.get("network", "main").expect("resource exists");
        assert_eq!(resource.id.address(), "network.main");
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ResourceRegistry::new();
        registry
            .register("network", "main", BTreeMap::new())
            .expect("first registration succeeds");

        let result = registry.register("network", "main", BTreeMap::new());
        assert!(matches!(
            result,
            Err(TerraplaneError::Config(ConfigError::DuplicateResource { .. }))
        ));
    }

    #[test]
    fn test_unknown_resource() {
        let registry = ResourceRegistry::new();
        let result = registry.get("network", "missing");
        assert!(matches!(
            result,
            Err(TerraplaneError::Config(ConfigError::UnknownResource { .. }))
        ));
    }

    #[test]
    fn test_id_ordering_kind_then_name() {
        let a = ResourceId::new("network", "z");
        let b = ResourceId::new("subnet", "a");
        assert!(a < b);

        let c = ResourceId::new("network", "a");
        assert!(c < a);
    }

    #[test]
    fn test_id_parse_roundtrip() {
        let id: ResourceId = "subnet.public".parse().expect("valid address");
        assert_eq!(id.kind, "subnet");
        assert_eq!(id.name, "public");
        assert_eq!(id.to_string(), "subnet.public");

        assert!("subnet".parse::<ResourceId>().is_err());
        assert!(".".parse::<ResourceId>().is_err());
    }
}
