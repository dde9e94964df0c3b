//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of stack configurations and
//! individual resource declarations. Node hashes are stored with each
//! resource record for bookkeeping; the planner compares properties itself.

use sha2::{Digest, Sha256};

use super::spec::StackConfig;
use crate::model::ResourceNode;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the whole stack declaration.
    ///
    /// Resources are hashed in declaration order; reordering them changes
    /// the hash even though the plan would not change.
    #[must_use]
    pub fn hash_stack(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.stack.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(config.stack.environment.as_bytes());
        hasher.update([0u8]);
        if let Some(region) = &config.stack.region {
            hasher.update(region.as_bytes());
        }
        hasher.update([0u8]);

        for (resource_type, fields) in &config.replace_on {
            hasher.update(resource_type.as_bytes());
            for field in fields {
                hasher.update([0u8]);
                hasher.update(field.as_bytes());
            }
            hasher.update([1u8]);
        }

        for node in &config.resources {
            hasher.update(self.hash_node(node).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource declaration.
    ///
    /// Properties and explicit dependencies are already kept sorted, so the
    /// hash does not depend on the order they were written in.
    #[must_use]
    pub fn hash_node(&self, node: &ResourceNode) -> String {
        let mut hasher = Sha256::new();

        hasher.update(node.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(node.resource_type.as_bytes());
        hasher.update([0u8]);

        // JSON keeps keys quoted and integers apart from floats.
        match serde_json::to_vec(&node.properties) {
            Ok(encoded) => hasher.update(encoded),
            Err(_) => hasher.update(format!("{:?}", node.properties).as_bytes()),
        }

        hasher.update([1u8]);
        for dependency in &node.depends_on {
            hasher.update(dependency.as_bytes());
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Properties, PropertyValue};

    fn node(id: &str, props: &[(&str, PropertyValue)]) -> ResourceNode {
        ResourceNode {
            id: id.to_string(),
            resource_type: String::from("ec2:vpc"),
            properties: props
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect::<Properties>(),
            depends_on: std::collections::BTreeSet::new(),
        }
    }

    #[test]
    fn test_node_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let n = node("vpc", &[("cidr_block", PropertyValue::from("10.0.0.0/16"))]);
        assert_eq!(hasher.hash_node(&n), hasher.hash_node(&n.clone()));
    }

    #[test]
    fn test_property_change_changes_hash() {
        let hasher = ConfigHasher::new();
        let a = node("vpc", &[("cidr_block", PropertyValue::from("10.0.0.0/16"))]);
        let b = node("vpc", &[("cidr_block", PropertyValue::from("10.1.0.0/16"))]);
        assert_ne!(hasher.hash_node(&a), hasher.hash_node(&b));
    }

    #[test]
    fn test_reference_differs_from_literal() {
        let hasher = ConfigHasher::new();
        let literal = node("sg", &[("vpc_id", PropertyValue::from("vpc"))]);
        let reference = node("sg", &[("vpc_id", PropertyValue::reference("vpc", "id"))]);
        assert_ne!(hasher.hash_node(&literal), hasher.hash_node(&reference));
    }

    #[test]
    fn test_map_keys_cannot_collide() {
        let hasher = ConfigHasher::new();
        let map = |pairs: &[(&str, i64)]| {
            PropertyValue::Map(
                pairs
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), PropertyValue::Integer(*v)))
                    .collect(),
            )
        };
        let a = node("vpc", &[("tags", map(&[("a", 1), ("b", 2)]))]);
        let b = node("vpc", &[("tags", map(&[("a: 1, b", 2)]))]);
        assert_ne!(hasher.hash_node(&a), hasher.hash_node(&b));
    }

    #[test]
    fn test_number_kind_changes_hash() {
        let hasher = ConfigHasher::new();
        let a = node("asg", &[("min_size", PropertyValue::Integer(2))]);
        let b = node("asg", &[("min_size", PropertyValue::Float(2.0))]);
        assert_ne!(hasher.hash_node(&a), hasher.hash_node(&b));
    }
}
