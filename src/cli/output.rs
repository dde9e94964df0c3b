//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::deployer::DeployResult;
use crate::graph::DependencyGraph;
use crate::planner::{ChangeAction, Plan};
use crate::state::{LockInfo, StateSnapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan entry row for table display.
#[derive(Tabled)]
struct PlanEntryRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "After")]
    after: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Graph node row for table display.
#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when output is JSON.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - {} is up to date.\n",
                "✓".green(),
                plan.stack
            );
        }

        let mut output = String::new();

        let _ = writeln!(output, "\n📋 Plan for {} ({})", plan.stack, plan.operation);
        let _ = writeln!(output, "   State serial: {}", plan.prior_serial);
        if !plan.config_hash.is_empty() {
            let _ = writeln!(output, "   Config hash: {}", Self::short(&plan.config_hash));
        }
        output.push('\n');

        let rows: Vec<PlanEntryRow> = plan
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| PlanEntryRow {
                index: i + 1,
                action: Self::format_action(e.action),
                resource: e.resource.clone(),
                resource_type: e.resource_type.clone(),
                after: e
                    .depends_on
                    .iter()
                    .map(|d| (d + 1).to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                reason: Self::truncate(&e.reason, 48),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            output.push_str("\nChanges:\n");
            for (i, entry) in plan.entries.iter().enumerate() {
                let _ = writeln!(output, "  {}. {}", i + 1, entry.description());
                for change in &entry.changes {
                    let marker = if change.forces_replacement {
                        " (forces replacement)".red().to_string()
                    } else {
                        String::new()
                    };
                    let _ = writeln!(output, "       {change}{marker}");
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete\n",
            plan.create_count().to_string().green(),
            plan.update_count().to_string().yellow(),
            plan.replace_count().to_string().magenta(),
            plan.delete_count().to_string().red()
        );

        output
    }

    /// Formats the dependency order of a graph.
    #[must_use]
    pub fn format_graph(&self, stack: &str, graph: &DependencyGraph) -> String {
        match self.format {
            OutputFormat::Json => {
                let nodes: Vec<GraphNodeJson<'_>> = graph
                    .iter_ordered()
                    .map(|n| GraphNodeJson {
                        id: &n.id,
                        resource_type: &n.resource_type,
                        depends_on: graph.dependencies(&n.id),
                    })
                    .collect();
                serde_json::to_string_pretty(&GraphJson {
                    stack,
                    edges: graph.edge_count(),
                    order: nodes,
                })
                .unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(
                    output,
                    "\n🔗 {}: {} resources, {} dependencies\n",
                    stack,
                    graph.len(),
                    graph.edge_count()
                );
                if graph.is_empty() {
                    output.push_str("   No resources declared.\n");
                    return output;
                }

                let rows: Vec<GraphRow> = graph
                    .iter_ordered()
                    .enumerate()
                    .map(|(i, n)| GraphRow {
                        index: i + 1,
                        resource: n.id.clone(),
                        resource_type: n.resource_type.clone(),
                        depends_on: graph.dependencies(&n.id).join(", "),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&ValidationJson {
                valid: result.is_valid(),
                errors: result.errors.iter().map(ToString::to_string).collect(),
                warnings: result.warnings.iter().map(ToString::to_string).collect(),
            })
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Stack file is valid.\n", "✓".green())
                } else {
                    let mut text = format!(
                        "{} Stack file has {} error(s):\n",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(text, "   - {error}");
                    }
                    text
                };

                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                } else if result.warning_count() > 0 {
                    let _ = writeln!(
                        output,
                        "   ({} warning(s), use --warnings to show)",
                        result.warning_count()
                    );
                }
                output
            }
        }
    }

    /// Formats the result of an apply or destroy.
    #[must_use]
    pub fn format_result(&self, result: &DeployResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("{} Apply complete for {}\n\n", "✓".green(), result.stack);
                let _ = writeln!(output, "   Created: {}", result.created);
                let _ = writeln!(output, "   Updated: {}", result.updated);
                let _ = writeln!(output, "   Replaced: {}", result.replaced);
                let _ = writeln!(output, "   Deleted: {}", result.deleted);
                let _ = writeln!(output, "   Serial: {}", result.serial);
                let _ = writeln!(output, "   Duration: {:.1}s", result.duration_secs);
                output
            }
        }
    }

    /// Formats a state snapshot.
    #[must_use]
    pub fn format_state(&self, state: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\n💾 State: {}\n\n", state.stack);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Serial: {}", state.serial);
                let _ = writeln!(output, "   Config hash: {}", Self::short(&state.config_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.len());

                if !state.resources.is_empty() {
                    let rows: Vec<ResourceRow> = state
                        .resources
                        .values()
                        .map(|r| ResourceRow {
                            resource: r.id.clone(),
                            resource_type: r.resource_type.clone(),
                            provider_id: Self::truncate(&r.provider_id, 24),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.deposed.is_empty() {
                    let _ = writeln!(
                        output,
                        "\n   {} Deposed instances awaiting deletion:",
                        "⚠".yellow()
                    );
                    for deposed in &state.deposed {
                        let _ = writeln!(output, "     - {} ({})", deposed.id, deposed.provider_id);
                    }
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} serial {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.serial,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(lock).unwrap_or_default(),
            OutputFormat::Text => format!(
                "{} State locked: {}\n   Holder: {}\n   Expires in: {}s\n",
                "🔒".yellow(),
                lock.lock_id,
                lock.holder,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, marker: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{marker} {message}"),
        }
    }

    /// Formats an action with color.
    fn format_action(action: ChangeAction) -> String {
        match action {
            ChangeAction::Create => "+create".green().to_string(),
            ChangeAction::Update => "~update".yellow().to_string(),
            ChangeAction::ReplaceCreate => "+/-replace".magenta().to_string(),
            ChangeAction::ReplaceDelete => "-/+replace".magenta().to_string(),
            ChangeAction::Delete => "-delete".red().to_string(),
        }
    }

    /// First eight characters of a hash.
    fn short(hash: &str) -> &str {
        hash.get(..8).unwrap_or(hash)
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct GraphJson<'a> {
    stack: &'a str,
    edges: usize,
    order: Vec<GraphNodeJson<'a>>,
}

#[derive(serde::Serialize)]
struct GraphNodeJson<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    resource_type: &'a str,
    depends_on: Vec<&'a str>,
}

#[derive(serde::Serialize)]
struct ValidationJson {
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::planner;

    fn graph() -> DependencyGraph {
        let config = ConfigParser::new()
            .parse_yaml(
                r"
stack:
  name: web
resources:
  - id: vpc
    type: ec2:vpc
  - id: sg
    type: ec2:security-group
    properties:
      vpc_id: { ref: vpc }
",
                None,
            )
            .unwrap();
        DependencyGraph::build(config.declare().unwrap()).unwrap()
    }

    #[test]
    fn test_plan_json_lists_entries_in_order() {
        let graph = graph();
        let prior = StateSnapshot::new("web-dev");
        let plan = planner::plan(&graph, &prior, &crate::model::ResourceTypeRegistry::builtin(), "h")
            .unwrap();

        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan, false);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["entries"][0]["resource"], "vpc");
        assert_eq!(value["entries"][1]["resource"], "sg");
        assert_eq!(value["entries"][1]["depends_on"][0], 0);
    }

    #[test]
    fn test_graph_text_shows_dependencies() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_graph("web-dev", &graph());
        assert!(text.contains("2 resources, 1 dependencies"));
        assert!(text.contains("vpc"));
    }

    #[test]
    fn test_empty_plan_text() {
        colored::control::set_override(false);
        let plan = Plan::empty(&StateSnapshot::new("web-dev"), "h");
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan, true);
        assert!(text.contains("No changes required"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééééééé", 6), "ééé...");
    }
}
