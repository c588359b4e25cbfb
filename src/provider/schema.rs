//! Builtin kind schemas.
//!
//! These cover the standard infrastructure kinds the in-memory provider
//! handles. Real providers may declare additional kinds with their own
//! immutability rules.

use super::types::KindSchema;

/// Builtin kinds and their immutable attributes.
const BUILTIN_KINDS: &[(&str, &[&str])] = &[
    ("network", &["cidr_block"]),
    ("subnet", &["network_id", "cidr_block", "availability_zone"]),
    ("route_table", &["network_id"]),
    ("security_group", &["network_id"]),
    ("public_ip", &[]),
    ("instance", &["subnet_id", "image", "architecture"]),
];

/// Returns the builtin schema for a kind, if one exists.
#[must_use]
pub fn builtin_schema(kind: &str) -> Option<KindSchema> {
    BUILTIN_KINDS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(k, immutable)| KindSchema::new(*k).with_immutable(immutable))
}

/// Returns all builtin kind names.
#[must_use]
pub fn builtin_kinds() -> Vec<&'static str> {
    BUILTIN_KINDS.iter().map(|(k, _)| *k).collect()
}
