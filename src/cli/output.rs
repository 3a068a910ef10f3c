//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::planner::{ExecutionResult, ResourcePlan, ResourceStatus, TagPlan};
use crate::tags::TagSet;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Resource row for plan tables.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Add")]
    add: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Remove")]
    remove: String,
    #[tabled(rename = "Declared")]
    fingerprint: String,
}

/// Resource row for apply results.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Changes")]
    changes: usize,
    #[tabled(rename = "Error")]
    error: String,
}

/// Key/value row.
#[derive(Tabled)]
struct TagRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a tag plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &TagPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &TagPlan, detailed: bool) -> String {
        let pending = plan.pending();
        if pending.is_empty() {
            return format!(
                "{} No changes required - all {} resource(s) carry their declared tags.\n",
                "✓".green(),
                plan.resources.len()
            );
        }

        let mut output = String::from("\nTag Plan\n\n");

        let rows: Vec<PlanRow> = pending
            .iter()
            .map(|r| PlanRow {
                resource: Self::truncate(&r.identifier, 60),
                service: r.service.clone(),
                add: Self::count(r.added_count(), |s| s.green().to_string()),
                change: Self::count(r.changed_count(), |s| s.yellow().to_string()),
                remove: Self::count(r.removed_count(), |s| s.red().to_string()),
                fingerprint: Self::short_fingerprint(&r.declared),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for resource in &pending {
                Self::write_changes(&mut output, resource);
            }
        }

        let added: usize = pending.iter().map(|r| r.added_count()).sum();
        let changed: usize = pending.iter().map(|r| r.changed_count()).sum();
        let removed: usize = pending.iter().map(|r| r.removed_count()).sum();

        let _ = write!(
            output,
            "\nPlan: {} to add, {} to change, {} to remove on {} of {} resource(s)\n",
            added.to_string().green(),
            changed.to_string().yellow(),
            removed.to_string().red(),
            pending.len(),
            plan.resources.len()
        );

        output
    }

    /// Writes one line per pending tag change.
    fn write_changes(output: &mut String, resource: &ResourcePlan) {
        let _ = writeln!(output, "\n{}", resource.identifier.bold());

        for (key, value) in resource.changes.updated.iter() {
            match resource.observed.get(key) {
                Some(old) => {
                    let _ = writeln!(output, "  {} {key}: {old:?} -> {value:?}", "~".yellow());
                }
                None => {
                    let _ = writeln!(output, "  {} {key} = {value:?}", "+".green());
                }
            }
        }

        for (key, _) in resource.changes.removed.iter() {
            let _ = writeln!(output, "  {} {key}", "-".red());
        }
    }

    /// Formats the result of an apply.
    #[must_use]
    pub fn format_execution(&self, result: &ExecutionResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let status = if result.success {
                    format!("{} Apply complete", "✓".green())
                } else {
                    format!("{} Apply finished with errors", "✗".red())
                };

                let rows: Vec<ResultRow> = result
                    .results
                    .iter()
                    .map(|r| ResultRow {
                        resource: Self::truncate(&r.identifier, 60),
                        status: Self::format_status(r.status),
                        changes: r.applied,
                        error: r
                            .error
                            .as_deref()
                            .map_or_else(String::new, |e| Self::truncate(e, 60)),
                    })
                    .collect();

                let mut output = format!("{status}\n\n");
                output.push_str(&Table::new(rows).to_string());
                let _ = write!(
                    output,
                    "\n\n{result} ({} tag change(s) pushed)\n",
                    result.changes_applied()
                );
                output
            }
        }
    }

    /// Formats the tags stored on one resource.
    #[must_use]
    pub fn format_tags(&self, identifier: &str, tags: &TagSet) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "identifier": identifier,
                "tags": tags,
                "fingerprint": tags.fingerprint(),
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("\n{}\n\n", identifier.bold());

                if tags.is_empty() {
                    output.push_str("   No tags.\n");
                    return output;
                }

                let rows: Vec<TagRow> = tags
                    .iter()
                    .map(|(k, v)| TagRow {
                        key: k.to_string(),
                        value: v.to_string(),
                    })
                    .collect();

                output.push_str(&Table::new(rows).to_string());
                let _ = write!(
                    output,
                    "\n\n{} tag(s), fingerprint {}\n",
                    tags.len(),
                    Self::short_fingerprint(tags)
                );
                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid!\n", "✓".green())
                } else {
                    let mut output = format!(
                        "{} Configuration has {} error(s):\n",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                    output
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

    /// Formats a resource status with color.
    fn format_status(status: ResourceStatus) -> String {
        match status {
            ResourceStatus::Applied => "applied".green().to_string(),
            ResourceStatus::Unchanged => "unchanged".dimmed().to_string(),
            ResourceStatus::Failed => "failed".red().to_string(),
            ResourceStatus::Skipped => "skipped".yellow().to_string(),
        }
    }

    /// First 12 hex digits of a tag set's fingerprint.
    fn short_fingerprint(tags: &TagSet) -> String {
        tags.fingerprint().chars().take(12).collect()
    }

    /// Formats a count, coloring it when non-zero.
    fn count(n: usize, paint: impl Fn(&str) -> String) -> String {
        if n == 0 {
            String::from("-")
        } else {
            paint(&n.to_string())
        }
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
