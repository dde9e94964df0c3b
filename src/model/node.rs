//! Declared resource nodes and the declaration session that produces them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::GraphError;

use super::value::{OutputRef, Properties};

/// Maximum length of a resource identifier.
const MAX_ID_LEN: usize = 128;

/// One declared infrastructure object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Identifier, unique within a stack.
    pub id: String,
    /// Resource type tag (for example `ec2:vpc`).
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Declared properties, possibly containing references.
    #[serde(default)]
    pub properties: Properties,
    /// Explicit dependencies on other resources.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

impl ResourceNode {
    /// Returns every reference embedded in the node's properties, in property order.
    #[must_use]
    pub fn references(&self) -> Vec<&OutputRef> {
        let mut out = Vec::new();
        for value in self.properties.values() {
            value.collect_refs(&mut out);
        }
        out
    }

    /// Returns the identifiers this node must come after: referenced
    /// resources and explicit dependencies.
    #[must_use]
    pub fn dependency_ids(&self) -> BTreeSet<&str> {
        let mut ids: BTreeSet<&str> = self
            .references()
            .into_iter()
            .map(|r| r.resource.as_str())
            .collect();
        ids.extend(self.depends_on.iter().map(String::as_str));
        ids
    }

    /// Returns true if the node names itself as a dependency or reference.
    #[must_use]
    pub fn is_self_referencing(&self) -> bool {
        self.dependency_ids().contains(self.id.as_str())
    }
}

/// Validates the shape of a resource identifier.
///
/// # Errors
///
/// Returns `GraphError::InvalidId` if the identifier is empty, too long or
/// contains characters other than ASCII alphanumerics, `-` and `_`.
pub fn validate_id(id: &str) -> Result<(), GraphError> {
    let reason = if id.is_empty() {
        Some(String::from("must not be empty"))
    } else if id.len() > MAX_ID_LEN {
        Some(format!("must be at most {MAX_ID_LEN} characters"))
    } else if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Some(String::from(
            "must contain only ASCII letters, digits, '-' and '_'",
        ))
    } else {
        None
    };

    reason.map_or(Ok(()), |reason| {
        Err(GraphError::InvalidId {
            id: id.to_string(),
            reason,
        })
    })
}

/// A single graph-building session.
///
/// Nodes are declared one at a time; the context rejects duplicates and
/// self-references as they arrive and hands the nodes over in declaration
/// order when the session ends.
#[derive(Debug, Default)]
pub struct DeclarationContext {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
}

impl DeclarationContext {
    /// Starts an empty declaration session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a resource.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::DuplicateId` if `id` was already declared in
    /// this session, `GraphError::InvalidId` for a malformed identifier and
    /// `GraphError::SelfReference` if the node refers to itself.
    pub fn declare<I, S>(
        &mut self,
        id: &str,
        resource_type: &str,
        properties: Properties,
        depends_on: I,
    ) -> Result<&ResourceNode, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_id(id)?;

        if self.index.contains_key(id) {
            return Err(GraphError::DuplicateId { id: id.to_string() });
        }

        if resource_type.trim().is_empty() {
            return Err(GraphError::InvalidId {
                id: id.to_string(),
                reason: String::from("resource type must not be empty"),
            });
        }

        let node = ResourceNode {
            id: id.to_string(),
            resource_type: resource_type.to_string(),
            properties,
            depends_on: depends_on.into_iter().map(Into::into).collect(),
        };

        if node.is_self_referencing() {
            return Err(GraphError::SelfReference { id: id.to_string() });
        }

        debug!(
            "Declared resource '{}' ({}) with {} dependencies",
            node.id,
            node.resource_type,
            node.dependency_ids().len()
        );

        let position = self.nodes.len();
        self.index.insert(node.id.clone(), position);
        self.nodes.push(node);
        Ok(&self.nodes[position])
    }

    /// Declares an already-built node.
    ///
    /// # Errors
    ///
    /// Same as [`DeclarationContext::declare`].
    pub fn declare_node(&mut self, node: ResourceNode) -> Result<&ResourceNode, GraphError> {
        let ResourceNode {
            id,
            resource_type,
            properties,
            depends_on,
        } = node;
        self.declare(&id, &resource_type, properties, depends_on)
    }

    /// Returns true if `id` has been declared.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the number of declared nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing has been declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ends the session, returning nodes in declaration order.
    #[must_use]
    pub fn finish(self) -> Vec<ResourceNode> {
        self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyValue;

    fn props(pairs: &[(&str, PropertyValue)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_declare_preserves_order() {
        let mut ctx = DeclarationContext::new();
        ctx.declare("b", "test:thing", Properties::new(), Vec::<String>::new())
            .unwrap();
        ctx.declare("a", "test:thing", Properties::new(), Vec::<String>::new())
            .unwrap();

        let ids: Vec<String> = ctx.finish().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut ctx = DeclarationContext::new();
        ctx.declare("vpc", "ec2:vpc", Properties::new(), Vec::<String>::new())
            .unwrap();
        let err = ctx
            .declare("vpc", "ec2:vpc", Properties::new(), Vec::<String>::new())
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateId { id } if id == "vpc"));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut ctx = DeclarationContext::new();
        let err = ctx
            .declare(
                "sg",
                "ec2:security-group",
                props(&[("peer", PropertyValue::reference("sg", "id"))]),
                Vec::<String>::new(),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::SelfReference { .. }));

        let err = ctx
            .declare("sg", "ec2:security-group", Properties::new(), ["sg"])
            .unwrap_err();
        assert!(matches!(err, GraphError::SelfReference { .. }));
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_invalid_ids() {
        assert!(validate_id("web-server_1").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("has space").is_err());
        assert!(validate_id("dot.ted").is_err());
        assert!(validate_id(&"x".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_dependency_ids_union_refs_and_explicit() {
        let mut ctx = DeclarationContext::new();
        let node = ctx
            .declare(
                "asg",
                "autoscaling:group",
                props(&[
                    ("vpc_id", PropertyValue::reference("vpc", "id")),
                    (
                        "launch_template",
                        PropertyValue::reference("launch-template", "id"),
                    ),
                ]),
                ["role"],
            )
            .unwrap();

        let deps: Vec<&str> = node.dependency_ids().into_iter().collect();
        assert_eq!(deps, vec!["launch-template", "role", "vpc"]);
    }
}
