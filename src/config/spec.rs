//! Configuration specification types for the reconciliation engine.
//!
//! This module defines the structs that map to the `terraplane.stack.yaml`
//! file. These types are declarative and fully describe the desired state of
//! a stack: a set of typed resources plus project and run settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::value::Value;

/// The root configuration structure for a Terraplane stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Run settings (parallelism and error behavior).
    #[serde(default)]
    pub settings: RunSettings,
    /// Declared resources.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// State directory or file path (for the local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
}

/// Run settings controlling execution behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSettings {
    /// Maximum number of resource actions applied concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Whether execution continues through independent branches after a
    /// resource fails. Dependents of a failed resource are always skipped.
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            continue_on_error: default_continue_on_error(),
        }
    }
}

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    /// Resource kind (e.g., "network", "subnet", "instance").
    pub kind: String,
    /// Resource name, unique per kind within the stack.
    pub name: String,
    /// Declared attributes. Values may reference other resources.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Explicit ordering hints, as `kind.name` addresses. These become graph
    /// edges even when no attribute reference exists.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

// Default value functions

const fn default_parallelism() -> usize {
    4
}

const fn default_continue_on_error() -> bool {
    true
}

fn default_environment() -> String {
    String::from("dev")
}

impl StackConfig {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns the addresses of all declared resources, in declaration order.
    #[must_use]
    pub fn resource_addresses(&self) -> Vec<String> {
        self.resources.iter().map(ResourceSpec::address).collect()
    }

    /// Looks up a declared resource by kind and name.
    #[must_use]
    pub fn find_resource(&self, kind: &str, name: &str) -> Option<&ResourceSpec> {
        self.resources
            .iter()
            .find(|r| r.kind == kind && r.name == name)
    }
}

impl ResourceSpec {
    /// Returns the `kind.name` address of this resource.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }
}
