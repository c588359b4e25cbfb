//! State types for tracking applied resources.
//!
//! These types represent the recorded state of a stack, used for diffing,
//! idempotent operations, and destroy ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Value;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of retained run history entries.
const MAX_HISTORY: usize = 100;

/// The complete recorded state of a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Monotonic serial, incremented on every save.
    pub serial: u64,
    /// Records keyed by `kind.name` address.
    pub records: BTreeMap<String, StateRecord>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent run history.
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// Recorded state of a single applied resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Resource kind.
    pub kind: String,
    /// Resource name.
    pub name: String,
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Fully resolved attributes as of the last apply.
    pub attributes: BTreeMap<String, Value>,
    /// Hash of the declared attributes when applied.
    pub attr_hash: String,
    /// Addresses this resource depended on when applied. Drives destroy
    /// ordering for orphans whose declarations are gone.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a recorded run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// A plan was applied.
    Apply,
    /// The stack was destroyed.
    Destroy,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: RunOperation,
    /// Stack configuration hash at the time of the run.
    pub config_hash: String,
    /// Addresses affected by the run.
    pub resources: Vec<String>,
    /// Whether every action succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

impl StateFile {
    /// Creates a new empty state file.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            serial: 0,
            records: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a record by address.
    #[must_use]
    pub fn get_record(&self, address: &str) -> Option<&StateRecord> {
        self.records.get(address)
    }

    /// Adds or replaces a record.
    pub fn set_record(&mut self, record: StateRecord) {
        self.records.insert(record.address(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record by address.
    pub fn remove_record(&mut self, address: &str) -> Option<StateRecord> {
        let result = self.records.remove(address);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Returns all recorded addresses in order.
    #[must_use]
    pub fn addresses(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    /// Bumps the serial before a save.
    pub fn bump_serial(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }

    /// Adds a history entry, discarding the oldest past the cap.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl StateRecord {
    /// Creates a new record for a freshly created resource.
    #[must_use]
    pub fn new(kind: &str, name: &str, provider_id: &str, attr_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            provider_id: provider_id.to_string(),
            attributes: BTreeMap::new(),
            attr_hash: attr_hash.to_string(),
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the `kind.name` address.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }

    /// Looks up a resolved attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

impl RunHistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: RunOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: RunOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let mut state = StateFile::new("web-stack", "dev");
        let record = StateRecord::new("network", "main", "net-123", "abc");
        state.set_record(record.clone());

        assert_eq!(state.get_record("network.main"), Some(&record));
        assert_eq!(state.addresses(), vec!["network.main"]);

        let removed = state.remove_record("network.main");
        assert_eq!(removed, Some(record));
        assert!(state.records.is_empty());
    }

    #[test]
    fn test_history_bounded() {
        let mut state = StateFile::new("web-stack", "dev");
        for _ in 0..150 {
            state.add_history(RunHistoryEntry::new(RunOperation::Apply, "hash", vec![]));
        }
        assert_eq!(state.history.len(), 100);
    }

    #[test]
    fn test_serial_bumps() {
        let mut state = StateFile::new("web-stack", "dev");
        assert_eq!(state.serial, 0);
        state.bump_serial();
        state.bump_serial();
        assert_eq!(state.serial, 2);
    }
}
