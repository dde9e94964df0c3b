//! Plan types and construction.
//!
//! A plan is an ordered list of change entries. Creates, updates and the
//! create half of replacements come first in topological order; deletions
//! follow in reverse dependency order over what state recorded. Each entry
//! lists the indices of entries that must finish before it starts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::graph::DependencyGraph;
use crate::model::ResourceNode;
use crate::state::{ApplyOperation, StateSnapshot};

use super::diff::{DiffResult, DiffType, PropertyChange};

/// A complete plan for one stack.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Stack the plan belongs to.
    pub stack: String,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// State serial the plan was computed against.
    pub prior_serial: u64,
    /// Hash of the declaration this plan converges to.
    pub config_hash: String,
    /// Whether this plan applies or destroys the stack.
    pub operation: ApplyOperation,
    /// Entries in execution order.
    pub entries: Vec<ChangeEntry>,
}

/// A single planned change.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEntry {
    /// What to do.
    pub action: ChangeAction,
    /// Resource id.
    pub resource: String,
    /// Resource type.
    pub resource_type: String,
    /// Desired declaration (absent for deletions).
    pub node: Option<ResourceNode>,
    /// Provider id acted on: the instance to update, supersede or delete.
    pub provider_id: Option<String>,
    /// Property changes behind this entry.
    pub changes: Vec<PropertyChange>,
    /// Reason for this entry.
    pub reason: String,
    /// Hash of the desired declaration (if applicable).
    pub new_hash: Option<String>,
    /// Entry indices that must complete first.
    pub depends_on: Vec<usize>,
}

/// Types of change in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// Create a new resource.
    Create,
    /// Change an existing resource in place.
    Update,
    /// Create the new instance of a replaced resource.
    ReplaceCreate,
    /// Delete a superseded instance.
    ReplaceDelete,
    /// Delete a resource that is no longer declared.
    Delete,
}

/// A recorded instance scheduled for deletion.
struct Removal {
    resource: String,
    resource_type: String,
    provider_id: String,
    dependencies: Vec<String>,
    action: ChangeAction,
    reason: String,
}

impl Plan {
    /// Creates a plan from a diff result.
    #[must_use]
    pub fn from_diff(
        diff: &DiffResult,
        graph: &DependencyGraph,
        prior: &StateSnapshot,
        config_hash: &str,
        operation: ApplyOperation,
    ) -> Self {
        let mut entries: Vec<ChangeEntry> = Vec::new();
        let mut entry_of: BTreeMap<&str, usize> = BTreeMap::new();

        // Creates, updates and new instances of replaced resources.
        for resource_diff in &diff.diffs {
            let action = match resource_diff.diff_type {
                DiffType::Create => ChangeAction::Create,
                DiffType::Update => ChangeAction::Update,
                DiffType::Replace => ChangeAction::ReplaceCreate,
                DiffType::Delete | DiffType::NoChange => continue,
            };
            let Some(node) = graph.get(&resource_diff.id) else {
                continue;
            };

            let depends_on: Vec<usize> = graph
                .ancestors(&node.id)
                .into_iter()
                .filter_map(|a| entry_of.get(a).copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            entry_of.insert(node.id.as_str(), entries.len());
            entries.push(ChangeEntry {
                action,
                resource: node.id.clone(),
                resource_type: node.resource_type.clone(),
                node: Some(node.clone()),
                provider_id: resource_diff.provider_id.clone(),
                changes: resource_diff.changes.clone(),
                reason: resource_diff.reason.clone(),
                new_hash: resource_diff.new_hash.clone(),
                depends_on,
            });
        }

        let phase_one = entries.len();
        let removals = collect_removals(diff, prior);

        let order = order_removals(&removals);

        for (position, &current) in order.iter().enumerate() {
            let removal = &removals[current];
            let own_index = phase_one + position;
            let mut depends_on: BTreeSet<usize> = BTreeSet::new();

            // Deletions of instances that recorded a dependency on this one.
            for (earlier, &other) in order[..position].iter().enumerate() {
                if removals[other].dependencies.contains(&removal.resource) {
                    depends_on.insert(phase_one + earlier);
                }
            }

            match removal.action {
                ChangeAction::ReplaceDelete => depends_on.extend(0..phase_one),
                _ => {
                    // Anything that depended on the removed resource has been
                    // updated or recreated to point elsewhere first.
                    for (id, index) in &entry_of {
                        let depended = graph.depends_on(id, &removal.resource)
                            || prior
                                .get(id)
                                .is_some_and(|r| r.dependencies.contains(&removal.resource));
                        if depended {
                            depends_on.insert(*index);
                        }
                    }
                }
            }

            depends_on.retain(|i| *i < own_index);
            entries.push(ChangeEntry {
                action: removal.action,
                resource: removal.resource.clone(),
                resource_type: removal.resource_type.clone(),
                node: None,
                provider_id: Some(removal.provider_id.clone()),
                changes: Vec::new(),
                reason: removal.reason.clone(),
                new_hash: None,
                depends_on: depends_on.into_iter().collect(),
            });
        }

        debug!(
            "Planned {} entries ({} before deletions)",
            entries.len(),
            phase_one
        );

        Self {
            stack: prior.stack.clone(),
            created_at: Utc::now(),
            prior_serial: prior.serial,
            config_hash: config_hash.to_string(),
            operation,
            entries,
        }
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(prior: &StateSnapshot, config_hash: &str) -> Self {
        Self {
            stack: prior.stack.clone(),
            created_at: Utc::now(),
            prior_serial: prior.serial,
            config_hash: config_hash.to_string(),
            operation: ApplyOperation::Apply,
            entries: vec![],
        }
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the number of entries with the given action.
    #[must_use]
    pub fn count(&self, action: ChangeAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// Returns the number of create entries.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(ChangeAction::Create)
    }

    /// Returns the number of update entries.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count(ChangeAction::Update)
    }

    /// Returns the number of replaced resources.
    #[must_use]
    pub fn replace_count(&self) -> usize {
        self.count(ChangeAction::ReplaceCreate)
    }

    /// Returns the number of delete entries, superseded instances included.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.count(ChangeAction::Delete) + self.count(ChangeAction::ReplaceDelete)
    }

    /// Returns `(action, resource)` pairs in plan order.
    #[must_use]
    pub fn summary(&self) -> Vec<(ChangeAction, &str)> {
        self.entries
            .iter()
            .map(|e| (e.action, e.resource.as_str()))
            .collect()
    }
}

/// Gathers every recorded instance the plan deletes.
fn collect_removals(diff: &DiffResult, prior: &StateSnapshot) -> Vec<Removal> {
    let mut removals = Vec::new();

    for resource_diff in &diff.diffs {
        let action = match resource_diff.diff_type {
            DiffType::Delete => ChangeAction::Delete,
            DiffType::Replace => ChangeAction::ReplaceDelete,
            _ => continue,
        };
        let Some(record) = prior.get(&resource_diff.id) else {
            continue;
        };
        removals.push(Removal {
            resource: record.id.clone(),
            resource_type: record.resource_type.clone(),
            provider_id: record.provider_id.clone(),
            dependencies: record.dependencies.clone(),
            action,
            reason: if action == ChangeAction::Delete {
                resource_diff.reason.clone()
            } else {
                String::from("superseded by replacement")
            },
        });
    }

    for deposed in &prior.deposed {
        removals.push(Removal {
            resource: deposed.id.clone(),
            resource_type: deposed.resource_type.clone(),
            provider_id: deposed.provider_id.clone(),
            dependencies: deposed.dependencies.clone(),
            action: ChangeAction::ReplaceDelete,
            reason: String::from("deposed by an interrupted replacement"),
        });
    }

    removals
}

/// Orders removals so that every instance is deleted before the instances
/// it recorded a dependency on. Ties follow resource id order.
fn order_removals(removals: &[Removal]) -> Vec<usize> {
    let mut by_resource: Vec<usize> = (0..removals.len()).collect();
    by_resource.sort_by(|a, b| removals[*a].resource.cmp(&removals[*b].resource));

    let mut emitted = vec![false; removals.len()];
    let mut visiting = vec![false; removals.len()];
    let mut order = Vec::with_capacity(removals.len());

    for &root in &by_resource {
        if emitted[root] {
            continue;
        }
        // Iterative DFS over "recorded as depending on" edges, emitting
        // dependents before the instance they depend on.
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        visiting[root] = true;
        while let Some((current, cursor)) = stack.pop() {
            let next = by_resource
                .iter()
                .copied()
                .skip(cursor)
                .position(|candidate| {
                    !emitted[candidate]
                        && !visiting[candidate]
                        && removals[candidate]
                            .dependencies
                            .contains(&removals[current].resource)
                })
                .map(|offset| cursor + offset);

            match next {
                Some(pos) => {
                    let child = by_resource[pos];
                    stack.push((current, pos + 1));
                    visiting[child] = true;
                    stack.push((child, 0));
                }
                None => {
                    visiting[current] = false;
                    emitted[current] = true;
                    order.push(current);
                }
            }
        }
    }

    order
}

impl ChangeEntry {
    /// Returns a human-readable description of the entry.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            ChangeAction::Create => format!("Create {} '{}'", self.resource_type, self.resource),
            ChangeAction::Update => format!("Update {} '{}'", self.resource_type, self.resource),
            ChangeAction::ReplaceCreate => {
                format!("Create replacement {} '{}'", self.resource_type, self.resource)
            }
            ChangeAction::ReplaceDelete => format!(
                "Delete superseded {} '{}' ({})",
                self.resource_type,
                self.resource,
                self.provider_id.as_deref().unwrap_or("?")
            ),
            ChangeAction::Delete => format!("Delete {} '{}'", self.resource_type, self.resource),
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::ReplaceCreate => "replace (create)",
            Self::ReplaceDelete => "replace (delete)",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ChangeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.resource)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan for {} ({} entries):", self.stack, self.entries.len())?;
        for (i, entry) in self.entries.iter().enumerate() {
            write!(f, "  {}. {entry}", i + 1)?;
            if !entry.depends_on.is_empty() {
                let after: Vec<String> = entry.depends_on.iter().map(|d| (d + 1).to_string()).collect();
                write!(f, " after {}", after.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigHasher;
    use crate::model::{DeclarationContext, Properties, PropertyValue, ResourceTypeRegistry};
    use crate::planner::diff::{resolve_properties, DiffEngine};
    use crate::state::ResourceState;

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
        snapshot.serial = 3;
        snapshot
    }

    fn plan(graph: &DependencyGraph, prior: &StateSnapshot) -> Plan {
        let diff = DiffEngine::new()
            .compute_diff(graph, prior, &ResourceTypeRegistry::builtin())
            .unwrap();
        Plan::from_diff(&diff, graph, prior, "hash", ApplyOperation::Apply)
    }

    fn web_stack(cidr: &str) -> DependencyGraph {
        graph(&[
            ("vpc", "ec2:vpc", props(&[("cidr_block", PropertyValue::from(cidr))])),
            ("sg", "ec2:security-group", props(&[("vpc_id", PropertyValue::reference("vpc", "id"))])),
            ("lb", "elbv2:load-balancer", props(&[("security_group", PropertyValue::reference("sg", "id"))])),
        ])
    }

    #[test]
    fn test_create_order_follows_references() {
        let g = graph(&[
            ("a", "custom:thing", Properties::new()),
            ("b", "custom:thing", props(&[("parent", PropertyValue::reference("a", "id"))])),
        ]);
        let p = plan(&g, &StateSnapshot::new("web-dev"));

        assert_eq!(
            p.summary(),
            vec![(ChangeAction::Create, "a"), (ChangeAction::Create, "b")]
        );
        assert_eq!(p.entries[1].depends_on, vec![0]);
        assert_eq!(p.prior_serial, 0);
    }

    #[test]
    fn test_removing_leaf_deletes_only_leaf() {
        let full = graph(&[
            ("a", "custom:thing", Properties::new()),
            ("b", "custom:thing", props(&[("parent", PropertyValue::reference("a", "id"))])),
        ]);
        let prior = applied(&full);
        let p = plan(&graph(&[("a", "custom:thing", Properties::new())]), &prior);

        assert_eq!(p.summary(), vec![(ChangeAction::Delete, "b")]);
        assert_eq!(p.entries[0].provider_id.as_deref(), Some("b-0001"));
        assert_eq!(p.prior_serial, 3);
    }

    #[test]
    fn test_destroy_deletes_dependents_first() {
        let prior = applied(&web_stack("10.0.0.0/16"));
        let empty = DependencyGraph::empty();
        let diff = DiffEngine::new()
            .compute_diff(&empty, &prior, &ResourceTypeRegistry::builtin())
            .unwrap();
        let p = Plan::from_diff(&diff, &empty, &prior, "", ApplyOperation::Destroy);

        assert_eq!(
            p.summary(),
            vec![
                (ChangeAction::Delete, "lb"),
                (ChangeAction::Delete, "sg"),
                (ChangeAction::Delete, "vpc"),
            ]
        );
        assert_eq!(p.entries[1].depends_on, vec![0]);
        assert_eq!(p.entries[2].depends_on, vec![1]);
    }

    #[test]
    fn test_cascaded_replacement_order() {
        let declare = |cidr: &str| {
            graph(&[
                ("vpc", "ec2:vpc", props(&[("cidr_block", PropertyValue::from(cidr))])),
                ("sg", "ec2:security-group", props(&[("vpc_id", PropertyValue::reference("vpc", "id"))])),
            ])
        };
        let prior = applied(&declare("10.0.0.0/16"));
        let p = plan(&declare("10.1.0.0/16"), &prior);

        assert_eq!(
            p.summary(),
            vec![
                (ChangeAction::ReplaceCreate, "vpc"),
                (ChangeAction::ReplaceCreate, "sg"),
                (ChangeAction::ReplaceDelete, "sg"),
                (ChangeAction::ReplaceDelete, "vpc"),
            ]
        );
        assert_eq!(p.entries[1].depends_on, vec![0]);
        assert_eq!(p.entries[2].depends_on, vec![0, 1]);
        assert_eq!(p.entries[3].depends_on, vec![0, 1, 2]);
        assert_eq!(p.entries[3].provider_id.as_deref(), Some("vpc-0001"));
    }

    #[test]
    fn test_deposed_instances_are_cleaned_up() {
        let g = graph(&[("a", "custom:thing", Properties::new())]);
        let mut prior = applied(&g);
        prior.add_deposed(ResourceState::new("a", "custom:thing", "a-0000").depose());

        let p = plan(&g, &prior);
        assert_eq!(p.summary(), vec![(ChangeAction::ReplaceDelete, "a")]);
        assert_eq!(p.entries[0].provider_id.as_deref(), Some("a-0000"));
    }

    #[test]
    fn test_identical_is_empty() {
        let g = web_stack("10.0.0.0/16");
        let p = plan(&g, &applied(&g));
        assert!(p.is_empty());
        assert_eq!(p.to_string(), "No changes required");
    }
}
