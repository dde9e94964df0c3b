//! Replacement triggers keyed by resource type.
//!
//! Some properties cannot be changed in place: the provider has to build a
//! new instance. Which properties behave that way is data, looked up per
//! resource type, so new types register their triggers without touching
//! the planner.

use std::collections::{BTreeMap, BTreeSet};

/// Built-in replacement triggers for the reference load-balanced stack.
const BUILTIN_TYPES: &[(&str, &[&str])] = &[
    ("ec2:vpc", &["cidr_block", "instance_tenancy"]),
    ("ec2:subnet", &["vpc_id", "cidr_block", "availability_zone"]),
    ("ec2:security-group", &["vpc_id", "name", "description"]),
    ("ec2:security-group-ingress", &["security_group_id", "protocol", "from_port", "to_port", "source"]),
    ("iam:role", &["name", "path", "assumed_by"]),
    ("ec2:launch-template", &["name"]),
    ("autoscaling:group", &["name", "vpc_id"]),
    ("elbv2:load-balancer", &["name", "scheme", "load_balancer_type", "vpc_id"]),
    ("elbv2:listener", &["load_balancer_arn"]),
    ("elbv2:listener-rule", &["listener_arn"]),
    ("elbv2:target-group", &["name", "port", "protocol", "vpc_id", "target_type"]),
    ("route53:hosted-zone", &["domain_name", "private_zone"]),
    ("route53:record", &["zone_id", "record_name", "record_type"]),
];

/// Lookup table of replace-on properties per resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTypeRegistry {
    types: BTreeMap<String, BTreeSet<String>>,
}

impl ResourceTypeRegistry {
    /// Creates a registry with no entries. Every property is then mutable.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with the built-in resource types.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (resource_type, fields) in BUILTIN_TYPES {
            registry.register(*resource_type, fields.iter().copied());
        }
        registry
    }

    /// Registers (or extends) the replace-on fields of a resource type.
    pub fn register<I, S>(&mut self, resource_type: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types
            .entry(resource_type.into())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
    }

    /// Applies every entry of `overrides` on top of the current table.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, Vec<String>>) -> Self {
        for (resource_type, fields) in overrides {
            self.register(resource_type.clone(), fields.iter().cloned());
        }
        self
    }

    /// Returns true if changing `property` on a `resource_type` forces replacement.
    #[must_use]
    pub fn is_replace_on(&self, resource_type: &str, property: &str) -> bool {
        self.types
            .get(resource_type)
            .is_some_and(|fields| fields.contains(property))
    }

    /// Returns true if the type has an entry.
    #[must_use]
    pub fn is_registered(&self, resource_type: &str) -> bool {
        self.types.contains_key(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let registry = ResourceTypeRegistry::builtin();
        assert!(registry.is_replace_on("ec2:vpc", "cidr_block"));
        assert!(!registry.is_replace_on("ec2:vpc", "tags"));
        assert!(registry.is_replace_on("elbv2:target-group", "port"));
        assert!(!registry.is_replace_on("unknown:type", "anything"));
    }

    #[test]
    fn test_overrides_extend_table() {
        let mut overrides = BTreeMap::new();
        overrides.insert(String::from("custom:bucket"), vec![String::from("region")]);
        overrides.insert(String::from("ec2:vpc"), vec![String::from("ipv6")]);

        let registry = ResourceTypeRegistry::builtin().with_overrides(&overrides);
        assert!(registry.is_replace_on("custom:bucket", "region"));
        assert!(registry.is_replace_on("ec2:vpc", "ipv6"));
        assert!(registry.is_replace_on("ec2:vpc", "cidr_block"));
    }
}
