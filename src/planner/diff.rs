//! Diff engine for comparing the desired graph against recorded state.
//!
//! Every declared node is classified as create, update, replace or no
//! change, and every recorded resource missing from the graph as delete.
//! Nodes are visited in topological order so that a replacement is known
//! before any node that references the replaced resource is classified.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::ConfigHasher;
use crate::error::PlanError;
use crate::graph::DependencyGraph;
use crate::model::{OutputRef, PropertyValue, ResolvedProperties, ResourceNode, ResourceTypeRegistry, ID_OUTPUT};
use crate::state::{ResourceState, StateSnapshot};

/// Engine for computing diffs between desired and recorded states.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDiff {
    /// Resource id.
    pub id: String,
    /// Resource type (desired type when the node is declared).
    pub resource_type: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Property-level changes.
    pub changes: Vec<PropertyChange>,
    /// Why the resource is in the diff.
    pub reason: String,
    /// Provider id of the recorded instance, if any.
    pub provider_id: Option<String>,
    /// Hash of the desired declaration, if any.
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource can be changed in place.
    Update,
    /// Resource must be recreated.
    Replace,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// A single property difference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyChange {
    /// Property name.
    pub name: String,
    /// Recorded value.
    pub old: Option<PropertyValue>,
    /// Desired value.
    pub new: Option<PropertyValue>,
    /// True if the change cannot be applied in place.
    pub forces_replacement: bool,
}

/// Complete diff result.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Declared resources in topological order, then deletions in id order.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
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

    /// Computes the diff between the desired graph and recorded state.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::UnsafeReplace` if a replacement would leave a
    /// surviving resource pointing at the deleted instance.
    pub fn compute_diff(
        &self,
        graph: &DependencyGraph,
        prior: &StateSnapshot,
        registry: &ResourceTypeRegistry,
    ) -> Result<DiffResult, PlanError> {
        let mut diffs = Vec::with_capacity(graph.len());
        let mut kinds: BTreeMap<&str, DiffType> = BTreeMap::new();
        let mut updated: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();

        for node in graph.iter_ordered() {
            let diff = match prior.get(&node.id) {
                None => {
                    debug!("{} needs to be created", node.id);
                    ResourceDiff {
                        id: node.id.clone(),
                        resource_type: node.resource_type.clone(),
                        diff_type: DiffType::Create,
                        changes: added_properties(node, registry),
                        reason: String::from("declared but not in state"),
                        provider_id: None,
                        new_hash: Some(self.hasher.hash_node(node)),
                    }
                }
                Some(record) => {
                    self.compute_node_diff(node, record, prior, registry, &kinds, &updated)
                }
            };
            if diff.diff_type == DiffType::Update {
                updated.insert(
                    node.id.as_str(),
                    diff.changes.iter().map(|c| c.name.clone()).collect(),
                );
            }
            kinds.insert(node.id.as_str(), diff.diff_type);
            diffs.push(diff);
        }

        check_replacements(graph, prior, registry, &kinds)?;

        for (id, record) in &prior.resources {
            if !graph.contains(id) {
                debug!("{id} was removed from the declaration");
                diffs.push(ResourceDiff {
                    id: id.clone(),
                    resource_type: record.resource_type.clone(),
                    diff_type: DiffType::Delete,
                    changes: Vec::new(),
                    reason: String::from("no longer declared"),
                    provider_id: Some(record.provider_id.clone()),
                    new_hash: None,
                });
            }
        }

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        Ok(DiffResult {
            creates: count(DiffType::Create),
            updates: count(DiffType::Update),
            replaces: count(DiffType::Replace),
            deletes: count(DiffType::Delete),
            unchanged: count(DiffType::NoChange),
            diffs,
        })
    }

    /// Classifies one declared node that already has a record.
    fn compute_node_diff(
        &self,
        node: &ResourceNode,
        record: &ResourceState,
        prior: &StateSnapshot,
        registry: &ResourceTypeRegistry,
        kinds: &BTreeMap<&str, DiffType>,
        updated: &BTreeMap<&str, BTreeSet<String>>,
    ) -> ResourceDiff {
        let new_hash = self.hasher.hash_node(node);
        let mut diff = ResourceDiff {
            id: node.id.clone(),
            resource_type: node.resource_type.clone(),
            diff_type: DiffType::NoChange,
            changes: Vec::new(),
            reason: String::new(),
            provider_id: Some(record.provider_id.clone()),
            new_hash: Some(new_hash.clone()),
        };

        if record.resource_type != node.resource_type {
            debug!(
                "{} changes type from {} to {}",
                node.id, record.resource_type, node.resource_type
            );
            diff.diff_type = DiffType::Replace;
            diff.changes = property_changes(node, &record.properties, registry);
            diff.reason = format!("type changes from {}", record.resource_type);
            return diff;
        }

        diff.changes = property_changes(node, &record.properties, registry);

        // Immutable properties that point at a replaced resource, or at a
        // changing property of an updated one, will carry a new value once
        // that change is applied.
        let mut cascaded: Vec<&str> = Vec::new();
        for (name, value) in &node.properties {
            if !registry.is_replace_on(&node.resource_type, name) {
                continue;
            }
            for target in value.refs() {
                let replaced = kinds.get(target.resource.as_str()) == Some(&DiffType::Replace);
                let output_changes = target.output != ID_OUTPUT
                    && updated
                        .get(target.resource.as_str())
                        .is_some_and(|names| names.contains(&target.output));
                if replaced || output_changes {
                    cascaded.push(target.resource.as_str());
                    if !diff.changes.iter().any(|c| &c.name == name) {
                        diff.changes.push(PropertyChange {
                            name: name.clone(),
                            old: Some(value.clone()),
                            new: Some(value.clone()),
                            forces_replacement: true,
                        });
                    }
                }
            }
        }

        if !cascaded.is_empty() {
            cascaded.sort_unstable();
            cascaded.dedup();
            diff.diff_type = DiffType::Replace;
            diff.reason = format!("references changing {}", cascaded.join(", "));
        } else if diff.changes.iter().any(|c| c.forces_replacement) {
            diff.diff_type = DiffType::Replace;
            diff.reason = format!("{} cannot change in place", forced_names(&diff.changes));
        } else if !diff.changes.is_empty() {
            diff.diff_type = DiffType::Update;
            diff.reason = String::from("declared properties changed");
        } else if let Some(stale) = stale_properties(node, record, prior) {
            diff.changes = stale
                .into_iter()
                .map(|name| PropertyChange {
                    forces_replacement: registry.is_replace_on(&node.resource_type, &name),
                    old: node.properties.get(&name).cloned(),
                    new: node.properties.get(&name).cloned(),
                    name,
                })
                .collect();
            if diff.changes.iter().any(|c| c.forces_replacement) {
                diff.diff_type = DiffType::Replace;
            } else {
                diff.diff_type = DiffType::Update;
            }
            diff.reason = String::from("referenced outputs changed since last apply");
        } else if let Some(targets) = updated_output_refs(node, registry, kinds) {
            diff.diff_type = DiffType::Update;
            diff.reason = format!("references outputs of updated {targets}");
        } else if !same_dependencies(node, record) {
            diff.diff_type = DiffType::Update;
            diff.reason = String::from("explicit dependencies changed");
        }

        if diff.diff_type == DiffType::NoChange {
            debug!("{} is up to date", node.id);
        } else {
            debug!("{} needs {:?}: {}", node.id, diff.diff_type, diff.reason);
        }
        diff
    }
}

/// Builds change entries for every property of a new node.
fn added_properties(node: &ResourceNode, registry: &ResourceTypeRegistry) -> Vec<PropertyChange> {
    node.properties
        .iter()
        .map(|(name, value)| PropertyChange {
            name: name.clone(),
            old: None,
            new: Some(value.clone()),
            forces_replacement: registry.is_replace_on(&node.resource_type, name),
        })
        .collect()
}

/// Compares declared properties against the recorded declaration.
fn property_changes(
    node: &ResourceNode,
    recorded: &BTreeMap<String, PropertyValue>,
    registry: &ResourceTypeRegistry,
) -> Vec<PropertyChange> {
    let names: BTreeSet<&String> = node.properties.keys().chain(recorded.keys()).collect();

    names
        .into_iter()
        .filter_map(|name| {
            let new = node.properties.get(name);
            let old = recorded.get(name);
            (new != old).then(|| PropertyChange {
                name: name.clone(),
                old: old.cloned(),
                new: new.cloned(),
                forces_replacement: registry.is_replace_on(&node.resource_type, name),
            })
        })
        .collect()
}

fn forced_names(changes: &[PropertyChange]) -> String {
    changes
        .iter()
        .filter(|c| c.forces_replacement)
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Re-resolves declared properties against recorded outputs and returns
/// the names whose value no longer matches what was sent to the provider.
fn stale_properties(
    node: &ResourceNode,
    record: &ResourceState,
    prior: &StateSnapshot,
) -> Option<Vec<String>> {
    let lookup = |r: &OutputRef| prior.output(&r.resource, &r.output).ok_or(());

    let stale: Vec<String> = node
        .properties
        .iter()
        .filter(|(_, value)| !value.refs().is_empty())
        .filter(|(name, value)| {
            value
                .resolve(&lookup)
                .map_or(true, |resolved| record.resolved.get(*name) != Some(&resolved))
        })
        .map(|(name, _)| name.clone())
        .collect();

    (!stale.is_empty()).then_some(stale)
}

/// Returns the updated resources whose non-id outputs feed a mutable
/// property of `node`.
fn updated_output_refs(
    node: &ResourceNode,
    registry: &ResourceTypeRegistry,
    kinds: &BTreeMap<&str, DiffType>,
) -> Option<String> {
    let targets: BTreeSet<&str> = node
        .properties
        .iter()
        .filter(|(name, _)| !registry.is_replace_on(&node.resource_type, name))
        .flat_map(|(_, value)| value.refs())
        .filter(|r| r.output != ID_OUTPUT)
        .filter(|r| kinds.get(r.resource.as_str()) == Some(&DiffType::Update))
        .map(|r| r.resource.as_str())
        .collect();

    (!targets.is_empty()).then(|| targets.into_iter().collect::<Vec<_>>().join(", "))
}

fn same_dependencies(node: &ResourceNode, record: &ResourceState) -> bool {
    let recorded: BTreeSet<&str> = record.dependencies.iter().map(String::as_str).collect();
    recorded == node.dependency_ids()
}

/// Rejects replacements that would strand a surviving resource.
///
/// A survivor is a declared resource that already exists and is neither
/// replaced nor deleted by this plan. It blocks a replacement when it refers
/// to the replaced resource through a mutable property, or when the replaced
/// instance's provider id appears in what was last sent for it.
fn check_replacements(
    graph: &DependencyGraph,
    prior: &StateSnapshot,
    registry: &ResourceTypeRegistry,
    kinds: &BTreeMap<&str, DiffType>,
) -> Result<(), PlanError> {
    for replaced in graph.order_ids() {
        if kinds.get(replaced) != Some(&DiffType::Replace) {
            continue;
        }
        let old_provider_id = prior.get(replaced).map(|r| r.provider_id.as_str());

        let blocking: Vec<String> = graph
            .iter_ordered()
            .filter(|n| n.id != replaced)
            .filter(|n| matches!(kinds.get(n.id.as_str()), Some(DiffType::Update | DiffType::NoChange)))
            .filter(|n| {
                let by_reference = n.properties.iter().any(|(name, value)| {
                    !registry.is_replace_on(&n.resource_type, name) && value.references(replaced)
                });
                let by_provider_id = old_provider_id
                    .zip(prior.get(&n.id))
                    .is_some_and(|(pid, record)| record.mentions(pid));
                by_reference || by_provider_id
            })
            .map(|n| n.id.clone())
            .collect();

        if !blocking.is_empty() {
            return Err(PlanError::UnsafeReplace {
                resource: replaced.to_string(),
                dependents: blocking,
            });
        }
    }
    Ok(())
}

/// Resolves `properties` against `snapshot` outputs.
///
/// # Errors
///
/// Returns the first reference that cannot be satisfied.
pub fn resolve_properties(
    properties: &BTreeMap<String, PropertyValue>,
    snapshot: &StateSnapshot,
) -> Result<ResolvedProperties, OutputRef> {
    let lookup = |r: &OutputRef| snapshot.output(&r.resource, &r.output).ok_or_else(|| r.clone());
    properties
        .iter()
        .map(|(name, value)| Ok((name.clone(), value.resolve(&lookup)?)))
        .collect()
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PropertyChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.old, &self.new) {
            (None, Some(new)) => write!(f, "+ {} = {new}", self.name)?,
            (Some(old), None) => write!(f, "- {} = {old}", self.name)?,
            (Some(old), Some(new)) if old == new => write!(f, "~ {} = {new} (re-resolved)", self.name)?,
            (Some(old), Some(new)) => write!(f, "~ {}: {old} -> {new}", self.name)?,
            (None, None) => write!(f, "~ {}", self.name)?,
        }
        if self.forces_replacement {
            write!(f, " (forces replacement)")?;
        }
        Ok(())
    }
}

impl DiffResult {
    /// Returns true if no resource changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.creates + self.updates + self.replaces + self.deletes == 0
    }

    /// Returns the diff for a resource id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| d.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeclarationContext, Properties};
    use serde_json::json;

    fn props(pairs: &[(&str, PropertyValue)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn graph(decls: &[(&str, &str, Properties)]) -> DependencyGraph {
        let mut ctx = DeclarationContext::new();
        for (id, ty, p) in decls {
            ctx.declare(*id, *ty, p.clone(), Vec::<String>::new()).unwrap();
        }
        DependencyGraph::build(ctx.finish()).unwrap()
    }

    /// Records every node of `graph` as if it had just been applied.
    fn applied(graph: &DependencyGraph) -> StateSnapshot {
        let hasher = ConfigHasher::new();
        let mut snapshot = StateSnapshot::new("web-dev");
        for node in graph.iter_ordered() {
            let mut record = ResourceState::new(&node.id, &node.resource_type, &format!("{}-0001", node.id));
            record.properties = node.properties.clone();
            record.resolved = resolve_properties(&node.properties, &snapshot).unwrap();
            record.dependencies = node.dependency_ids().into_iter().map(String::from).collect();
            record.config_hash = hasher.hash_node(node);
            snapshot.set_resource(record);
        }
        snapshot
    }

    fn vpc(cidr: &str) -> (&'static str, &'static str, Properties) {
        ("vpc", "ec2:vpc", props(&[("cidr_block", PropertyValue::from(cidr))]))
    }

    #[test]
    fn test_empty_state_creates_everything() {
        let g = graph(&[
            vpc("10.0.0.0/16"),
            ("sg", "ec2:security-group", props(&[("vpc_id", PropertyValue::reference("vpc", "id"))])),
        ]);
        let result = DiffEngine::new()
            .compute_diff(&g, &StateSnapshot::new("web-dev"), &ResourceTypeRegistry::builtin())
            .unwrap();

        assert_eq!(result.creates, 2);
        assert_eq!(result.diffs[0].id, "vpc");
        assert_eq!(result.diffs[1].id, "sg");
    }

    #[test]
    fn test_identical_state_is_unchanged() {
        let g = graph(&[
            vpc("10.0.0.0/16"),
            ("sg", "ec2:security-group", props(&[("vpc_id", PropertyValue::reference("vpc", "id"))])),
        ]);
        let prior = applied(&g);
        let result = DiffEngine::new()
            .compute_diff(&g, &prior, &ResourceTypeRegistry::builtin())
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(result.unchanged, 2);
    }

    #[test]
    fn test_mutable_change_is_update() {
        let before = graph(&[("vpc", "ec2:vpc", props(&[("name", PropertyValue::from("a"))]))]);
        let prior = applied(&before);
        let after = graph(&[("vpc", "ec2:vpc", props(&[("name", PropertyValue::from("b"))]))]);

        let result = DiffEngine::new()
            .compute_diff(&after, &prior, &ResourceTypeRegistry::builtin())
            .unwrap();
        let diff = result.get("vpc").unwrap();
        assert_eq!(diff.diff_type, DiffType::Update);
        assert_eq!(diff.changes.len(), 1);
        assert!(!diff.changes[0].forces_replacement);
    }

    #[test]
    fn test_immutable_change_with_reference_is_unsafe() {
        let tg = |cidr: &str| {
            graph(&[
                vpc(cidr),
                (
                    "tg",
                    "elbv2:target-group",
                    props(&[("tags", PropertyValue::reference("vpc", "arn"))]),
                ),
            ])
        };
        let mut prior = applied(&graph(&[vpc("10.0.0.0/16")]));
        let mut record = ResourceState::new("tg", "elbv2:target-group", "tg-0001");
        record.properties = props(&[("tags", PropertyValue::reference("vpc", "arn"))]);
        prior.resources.get_mut("vpc").unwrap().outputs.insert(String::from("arn"), json!("arn:vpc"));
        record.resolved.insert(String::from("tags"), json!("arn:vpc"));
        record.dependencies = vec![String::from("vpc")];
        record.config_hash = ConfigHasher::new().hash_node(tg("10.0.0.0/16").get("tg").unwrap());
        prior.set_resource(record);

        let err = DiffEngine::new()
            .compute_diff(&tg("10.1.0.0/16"), &prior, &ResourceTypeRegistry::builtin())
            .unwrap_err();
        match err {
            PlanError::UnsafeReplace { resource, dependents } => {
                assert_eq!(resource, "vpc");
                assert_eq!(dependents, vec![String::from("tg")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_immutable_reference_cascades() {
        let declare = |cidr: &str| {
            graph(&[
                vpc(cidr),
                ("sg", "ec2:security-group", props(&[("vpc_id", PropertyValue::reference("vpc", "id"))])),
            ])
        };
        let prior = applied(&declare("10.0.0.0/16"));

        let result = DiffEngine::new()
            .compute_diff(&declare("10.1.0.0/16"), &prior, &ResourceTypeRegistry::builtin())
            .unwrap();
        assert_eq!(result.get("vpc").unwrap().diff_type, DiffType::Replace);
        let sg = result.get("sg").unwrap();
        assert_eq!(sg.diff_type, DiffType::Replace);
        assert!(sg.reason.contains("vpc"));
        assert_eq!(result.replaces, 2);
    }

    #[test]
    fn test_removed_resource_is_deleted() {
        let full = graph(&[
            vpc("10.0.0.0/16"),
            ("sg", "ec2:security-group", props(&[("vpc_id", PropertyValue::reference("vpc", "id"))])),
        ]);
        let prior = applied(&full);
        let result = DiffEngine::new()
            .compute_diff(&graph(&[vpc("10.0.0.0/16")]), &prior, &ResourceTypeRegistry::builtin())
            .unwrap();

        assert_eq!(result.deletes, 1);
        assert_eq!(result.unchanged, 1);
        let sg = result.get("sg").unwrap();
        assert_eq!(sg.provider_id.as_deref(), Some("sg-0001"));
    }

    #[test]
    fn test_stale_reference_is_update() {
        let g = graph(&[
            vpc("10.0.0.0/16"),
            ("lt", "ec2:launch-template", props(&[("network", PropertyValue::reference("vpc", "id"))])),
        ]);
        let mut prior = applied(&g);
        prior.resources.get_mut("lt").unwrap().resolved.insert(String::from("network"), json!("vpc-old"));

        let result = DiffEngine::new()
            .compute_diff(&g, &prior, &ResourceTypeRegistry::builtin())
            .unwrap();
        let lt = result.get("lt").unwrap();
        assert_eq!(lt.diff_type, DiffType::Update);
        assert_eq!(lt.changes[0].name, "network");
    }

    #[test]
    fn test_changed_map_with_recorded_hash_is_update() {
        let tags = |pairs: &[(&str, i64)]| {
            PropertyValue::Map(
                pairs
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), PropertyValue::Integer(*v)))
                    .collect(),
            )
        };
        let before = graph(&[("vpc", "ec2:vpc", props(&[("tags", tags(&[("a", 1), ("b", 2)]))]))]);
        let after = graph(&[("vpc", "ec2:vpc", props(&[("tags", tags(&[("a: 1, b", 2)]))]))]);
        let mut prior = applied(&before);
        // A record whose stored hash already matches the new declaration.
        prior.resources.get_mut("vpc").unwrap().config_hash =
            ConfigHasher::new().hash_node(after.get("vpc").unwrap());

        let result = DiffEngine::new()
            .compute_diff(&after, &prior, &ResourceTypeRegistry::builtin())
            .unwrap();
        let diff = result.get("vpc").unwrap();
        assert_eq!(diff.diff_type, DiffType::Update);
        assert_eq!(diff.changes[0].name, "tags");
    }

    #[test]
    fn test_integer_to_float_is_update() {
        let before = graph(&[("asg", "autoscaling:group", props(&[("min_size", PropertyValue::Integer(2))]))]);
        let after = graph(&[("asg", "autoscaling:group", props(&[("min_size", PropertyValue::Float(2.5))]))]);
        let result = DiffEngine::new()
            .compute_diff(&after, &applied(&before), &ResourceTypeRegistry::builtin())
            .unwrap();
        assert_eq!(result.get("asg").unwrap().diff_type, DiffType::Update);
    }

    #[test]
    fn test_provider_id_in_survivor_is_unsafe() {
        let declare = |cidr: &str| {
            graph(&[
                vpc(cidr),
                ("peer", "custom:peering", props(&[("remote", PropertyValue::from("vpc-0001"))])),
            ])
        };
        let prior = applied(&declare("10.0.0.0/16"));

        let err = DiffEngine::new()
            .compute_diff(&declare("10.1.0.0/16"), &prior, &ResourceTypeRegistry::builtin())
            .unwrap_err();
        match err {
            PlanError::UnsafeReplace { resource, dependents } => {
                assert_eq!(resource, "vpc");
                assert_eq!(dependents, vec![String::from("peer")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_immutable_ref_to_updated_output_cascades() {
        let declare = |name: &str| {
            graph(&[
                ("a", "custom:thing", props(&[("name", PropertyValue::from(name))])),
                ("sg", "ec2:security-group", props(&[("name", PropertyValue::reference("a", "name"))])),
            ])
        };
        let mut prior = applied(&graph(&[("a", "custom:thing", props(&[("name", PropertyValue::from("x"))]))]));
        prior.resources.get_mut("a").unwrap().outputs.insert(String::from("name"), json!("x"));
        let mut sg = ResourceState::new("sg", "ec2:security-group", "sg-0001");
        sg.properties = props(&[("name", PropertyValue::reference("a", "name"))]);
        sg.resolved.insert(String::from("name"), json!("x"));
        sg.dependencies = vec![String::from("a")];
        prior.set_resource(sg);

        let result = DiffEngine::new()
            .compute_diff(&declare("y"), &prior, &ResourceTypeRegistry::builtin())
            .unwrap();
        assert_eq!(result.get("a").unwrap().diff_type, DiffType::Update);
        let sg = result.get("sg").unwrap();
        assert_eq!(sg.diff_type, DiffType::Replace);
        assert_eq!(sg.reason, "references changing a");

        // An id reference does not change on update.
        let by_id = |name: &str| {
            graph(&[
                ("a", "custom:thing", props(&[("name", PropertyValue::from(name))])),
                ("sg", "ec2:security-group", props(&[("name", PropertyValue::reference("a", "id"))])),
            ])
        };
        let result = DiffEngine::new()
            .compute_diff(&by_id("y"), &applied(&by_id("x")), &ResourceTypeRegistry::builtin())
            .unwrap();
        assert_eq!(result.get("sg").unwrap().diff_type, DiffType::NoChange);
    }

    #[test]
    fn test_type_change_is_replace() {
        let prior = applied(&graph(&[("q", "custom:queue", Properties::new())]));
        let result = DiffEngine::new()
            .compute_diff(&graph(&[("q", "custom:topic", Properties::new())]), &prior, &ResourceTypeRegistry::builtin())
            .unwrap();
        assert_eq!(result.get("q").unwrap().diff_type, DiffType::Replace);
    }
}
