//! State types for tracking applied resources.
//!
//! The snapshot records what the last apply actually produced, so the
//! planner can diff against it and the executor can resolve references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Properties, ResolvedProperties, ID_OUTPUT};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept in a snapshot.
pub const MAX_HISTORY: usize = 100;

/// Persisted state of one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// State format version.
    pub version: String,
    /// Stack identifier (`<name>-<environment>`).
    pub stack: String,
    /// Incremented on every save made by an apply.
    #[serde(default)]
    pub serial: u64,
    /// Hash of the stack definition at the last apply.
    #[serde(default)]
    pub config_hash: String,
    /// Applied resources keyed by resource id.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// Superseded instances of replaced resources awaiting deletion.
    #[serde(default)]
    pub deposed: Vec<DeposedResource>,
    /// True when the provider ids come from an in-memory simulation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub simulated: bool,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Apply history (recent entries).
    #[serde(default)]
    pub history: Vec<ApplyHistoryEntry>,
}

/// Last-applied state of a single resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource identifier from the stack definition.
    pub id: String,
    /// Resource type tag.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Identifier assigned by the provider.
    pub provider_id: String,
    /// Declared properties, references kept symbolic.
    #[serde(default)]
    pub properties: Properties,
    /// Properties as sent to the provider, references resolved.
    #[serde(default)]
    pub resolved: ResolvedProperties,
    /// Outputs reported by the provider.
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Resources this one depended on when it was applied.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Hash of the declared node when it was applied.
    #[serde(default)]
    pub config_hash: String,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last changed.
    pub updated_at: DateTime<Utc>,
}

/// An old instance left behind by a replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeposedResource {
    /// Resource identifier the instance belonged to.
    pub id: String,
    /// Resource type tag.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Provider identifier of the old instance.
    pub provider_id: String,
    /// Dependencies recorded for the old instance.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// When the instance was superseded.
    pub deposed_at: DateTime<Utc>,
}

/// A single entry in the apply history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyHistoryEntry {
    /// When the apply finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: ApplyOperation,
    /// Configuration hash the plan was computed from.
    pub config_hash: String,
    /// Serial written by this apply.
    pub serial: u64,
    /// Resources touched.
    pub resources: Vec<String>,
    /// Whether every entry succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of apply operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOperation {
    /// Converge the stack to its definition.
    Apply,
    /// Remove every resource of the stack.
    Destroy,
}

impl StateSnapshot {
    /// Creates a new empty snapshot for a stack.
    #[must_use]
    pub fn new(stack: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            stack: stack.to_string(),
            serial: 0,
            config_hash: String::new(),
            resources: BTreeMap::new(),
            deposed: Vec::new(),
            simulated: false,
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    /// Returns true if the resource is recorded.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    /// Adds or updates a resource.
    pub fn set_resource(&mut self, resource: ResourceState) {
        self.resources.insert(resource.id.clone(), resource);
        self.last_updated = Utc::now();
    }

    /// Removes a resource, but only if it still carries `provider_id`.
    ///
    /// A replacement may already have recorded a newer instance under the
    /// same id; that record must survive deletion of the old instance.
    pub fn remove_resource(&mut self, id: &str, provider_id: &str) -> Option<ResourceState> {
        let matches = self
            .resources
            .get(id)
            .is_some_and(|r| r.provider_id == provider_id);
        if !matches {
            return None;
        }
        let removed = self.resources.remove(id);
        self.last_updated = Utc::now();
        removed
    }

    /// Records a superseded instance.
    pub fn add_deposed(&mut self, deposed: DeposedResource) {
        self.deposed.push(deposed);
        self.last_updated = Utc::now();
    }

    /// Forgets a superseded instance once it has been deleted.
    pub fn remove_deposed(&mut self, provider_id: &str) -> Option<DeposedResource> {
        let position = self
            .deposed
            .iter()
            .position(|d| d.provider_id == provider_id)?;
        self.last_updated = Utc::now();
        Some(self.deposed.remove(position))
    }

    /// Looks up an output of a recorded resource.
    ///
    /// The `id` output always resolves to the provider identifier.
    #[must_use]
    pub fn output(&self, resource: &str, output: &str) -> Option<serde_json::Value> {
        let record = self.resources.get(resource)?;
        if output == ID_OUTPUT {
            return Some(serde_json::Value::String(record.provider_id.clone()));
        }
        record.outputs.get(output).cloned()
    }

    /// Adds a history entry, keeping only the last [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: ApplyHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }

    /// Returns all resource ids in sorted order.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns true if nothing is recorded, deposed instances included.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.deposed.is_empty()
    }

    /// Returns the number of recorded resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }
}

impl ResourceState {
    /// Creates a record for a freshly created resource.
    #[must_use]
    pub fn new(id: &str, resource_type: &str, provider_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            resource_type: resource_type.to_string(),
            provider_id: provider_id.to_string(),
            properties: Properties::new(),
            resolved: ResolvedProperties::new(),
            outputs: BTreeMap::new(),
            dependencies: Vec::new(),
            config_hash: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if `provider_id` appears anywhere in the resolved properties.
    #[must_use]
    pub fn mentions(&self, provider_id: &str) -> bool {
        self.resolved.values().any(|v| value_mentions(v, provider_id))
    }

    /// Turns this record into a deposed instance.
    #[must_use]
    pub fn depose(&self) -> DeposedResource {
        DeposedResource {
            id: self.id.clone(),
            resource_type: self.resource_type.clone(),
            provider_id: self.provider_id.clone(),
            dependencies: self.dependencies.clone(),
            deposed_at: Utc::now(),
        }
    }
}

fn value_mentions(value: &serde_json::Value, needle: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s == needle,
        serde_json::Value::Array(items) => items.iter().any(|v| value_mentions(v, needle)),
        serde_json::Value::Object(map) => map.values().any(|v| value_mentions(v, needle)),
        _ => false,
    }
}

impl ApplyHistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(
        operation: ApplyOperation,
        config_hash: &str,
        serial: u64,
        resources: Vec<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            serial,
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: ApplyOperation,
        config_hash: &str,
        serial: u64,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, config_hash, serial, resources)
        }
    }
}

impl std::fmt::Display for ApplyOperation {
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
    fn test_id_output_is_provider_id() {
        let mut snapshot = StateSnapshot::new("web-prod");
        let mut vpc = ResourceState::new("vpc", "ec2:vpc", "vpc-1234");
        vpc.outputs
            .insert(String::from("cidr_block"), serde_json::json!("10.0.0.0/16"));
        snapshot.set_resource(vpc);

        assert_eq!(snapshot.output("vpc", "id"), Some(serde_json::json!("vpc-1234")));
        assert_eq!(
            snapshot.output("vpc", "cidr_block"),
            Some(serde_json::json!("10.0.0.0/16"))
        );
        assert_eq!(snapshot.output("vpc", "missing"), None);
        assert_eq!(snapshot.output("ghost", "id"), None);
    }

    #[test]
    fn test_remove_resource_checks_provider_id() {
        let mut snapshot = StateSnapshot::new("web-prod");
        snapshot.set_resource(ResourceState::new("vpc", "ec2:vpc", "vpc-new"));

        assert!(snapshot.remove_resource("vpc", "vpc-old").is_none());
        assert!(snapshot.contains("vpc"));
        assert!(snapshot.remove_resource("vpc", "vpc-new").is_some());
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_deposed_roundtrip() {
        let mut snapshot = StateSnapshot::new("web-prod");
        let record = ResourceState::new("sg", "ec2:security-group", "sg-1");
        snapshot.add_deposed(record.depose());
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.remove_deposed("sg-1").map(|d| d.id), Some(String::from("sg")));
        assert!(snapshot.remove_deposed("sg-1").is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut snapshot = StateSnapshot::new("web-prod");
        for serial in 0..(MAX_HISTORY as u64 + 5) {
            snapshot.add_history(ApplyHistoryEntry::new(ApplyOperation::Apply, "h", serial, vec![]));
        }
        assert_eq!(snapshot.history.len(), MAX_HISTORY);
        assert_eq!(snapshot.history.first().map(|h| h.serial), Some(5));
    }

    #[test]
    fn test_mentions_nested_values() {
        let mut record = ResourceState::new("lt", "ec2:launch-template", "lt-1");
        record.resolved.insert(
            String::from("security_group_ids"),
            serde_json::json!(["sg-1", "sg-2"]),
        );
        assert!(record.mentions("sg-2"));
        assert!(!record.mentions("sg-3"));
    }

    #[test]
    fn test_snapshot_serde_defaults() {
        let json = r#"{"version":"1.0","stack":"web-prod","last_updated":"2024-01-01T00:00:00Z"}"#;
        let snapshot: StateSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.serial, 0);
        assert!(snapshot.is_empty());
    }
}
