//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of declared attributes to
//! detect changes between runs and enable idempotent operations. Hashes are
//! computed over a canonical byte encoding, so map ordering and formatting
//! never affect the result.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::spec::{ResourceSpec, StackConfig};
use super::value::Value;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash over a declared attribute map.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &BTreeMap<String, Value>) -> String {
        let mut buf = Vec::new();
        Value::Map(attributes.clone()).canonical_bytes(&mut buf);

        let mut hasher = Sha256::new();
        hasher.update(&buf);
        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource declaration.
    ///
    /// Covers identity, attributes, and ordering hints, so any edit to the
    /// declaration changes the hash.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceSpec) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(resource.name.as_bytes());
        hasher.update([0u8]);

        let mut buf = Vec::new();
        Value::Map(resource.attributes.clone()).canonical_bytes(&mut buf);
        hasher.update(&buf);

        // depends_on is sorted so hint ordering is immaterial
        let mut deps = resource.depends_on.clone();
        deps.sort_unstable();
        for dep in deps {
            hasher.update(dep.as_bytes());
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of the entire stack configuration.
    ///
    /// This hash changes when any declared resource changes.
    #[must_use]
    pub fn hash_stack(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());

        // Resources hashed in address order for determinism
        let mut resources: Vec<&ResourceSpec> = config.resources.iter().collect();
        resources.sort_by_key(|r| r.address());
        for resource in resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::value::Reference;

    fn test_resource(name: &str) -> ResourceSpec {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            String::from("cidr_block"),
            Value::String(String::from("10.0.0.0/16")),
        );
        ResourceSpec {
            kind: String::from("network"),
            name: name.to_string(),
            attributes,
            depends_on: vec![],
        }
    }

    #[test]
    fn test_resource_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let resource = test_resource("main");

        assert_eq!(hasher.hash_resource(&resource), hasher.hash_resource(&resource));
    }

    #[test]
    fn test_different_resources_different_hash() {
        let hasher = ConfigHasher::new();
        assert_ne!(
            hasher.hash_resource(&test_resource("a")),
            hasher.hash_resource(&test_resource("b"))
        );
    }

    #[test]
    fn test_attribute_change_changes_hash() {
        let hasher = ConfigHasher::new();
        let before = test_resource("main");
        let mut after = before.clone();
        after.attributes.insert(
            String::from("cidr_block"),
            Value::String(String::from("10.1.0.0/16")),
        );

        assert_ne!(hasher.hash_resource(&before), hasher.hash_resource(&after));
    }

    #[test]
    fn test_reference_retarget_changes_hash() {
        let hasher = ConfigHasher::new();
        let mut before = test_resource("main");
        before.attributes.insert(
            String::from("network_id"),
            Value::Reference(Reference::parse("network.a.id").expect("valid")),
        );
        let mut after = before.clone();
        after.attributes.insert(
            String::from("network_id"),
            Value::Reference(Reference::parse("network.b.id").expect("valid")),
        );

        assert_ne!(hasher.hash_resource(&before), hasher.hash_resource(&after));
    }

    #[test]
    fn test_depends_on_order_immaterial() {
        let hasher = ConfigHasher::new();
        let mut a = test_resource("main");
        a.depends_on = vec![String::from("network.x"), String::from("network.y")];
        let mut b = test_resource("main");
        b.depends_on = vec![String::from("network.y"), String::from("network.x")];

        assert_eq!(hasher.hash_resource(&a), hasher.hash_resource(&b));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}
