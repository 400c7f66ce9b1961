//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, DeployConfig, ValidationResult};
use crate::planner::{Action, OperationPlan, OperationResult, OperationStatus};
use crate::reconciler::{DriftReport, ReconciliationResult};
use crate::state::{DeploymentState, LockInfo};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct PlanOperationRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "After")]
    after: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Executed operation row.
#[derive(Tabled)]
struct OperationResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Result")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Time")]
    duration: String,
}

/// Observed resource row.
#[derive(Tabled)]
struct ObservedRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Remote ID")]
    remote_id: String,
    #[tabled(rename = "Observed")]
    observed_at: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when formatting JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats an operation plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &OperationPlan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &OperationPlan) -> String {
        if plan.is_noop() {
            return format!("{} No changes required - infrastructure is up to date.\n", "✓".green());
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nOperation Plan");
        let _ = write!(
            output,
            "   Config hash: {}\n\n",
            ConfigHasher::new().short_hash(&plan.config_hash)
        );

        let rows: Vec<PlanOperationRow> = plan
            .pending()
            .into_iter()
            .map(|op| PlanOperationRow {
                index: op.index + 1,
                action: Self::format_action(op.action),
                resource: op.resource.to_string(),
                after: op
                    .dependencies
                    .iter()
                    .map(|d| (d + 1).to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                reason: Self::truncate(&op.reason, 40),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} unchanged\n",
            plan.count(Action::Create).to_string().green(),
            plan.count(Action::Update).to_string().yellow(),
            plan.count(Action::NoOp)
        );

        output
    }

    /// Formats a drift report, with field-level changes.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.is_converged() {
                    return format!("{} No drift detected - state is converged.\n", "✓".green());
                }

                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for diff in &report.drifted {
                    let _ = writeln!(output, "   {} {}", Self::format_action(diff.diff_type.into()), diff.resource);
                    for detail in &diff.details {
                        let _ = writeln!(output, "       {detail}");
                    }
                }
                let _ = write!(
                    output,
                    "\n{}/{} resources differ ({} observed remotely).\n",
                    report.drifted.len(),
                    report.total_resources,
                    report.observed_count
                );
                output
            }
        }
    }

    /// Formats an apply or reconciliation result.
    #[must_use]
    pub fn format_reconciliation(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let verb = match result.operation {
                    crate::state::DeploymentOperation::Apply => "Apply",
                    crate::state::DeploymentOperation::Reconcile => "Reconciliation",
                };
                let status = if result.success {
                    format!("{} {verb} successful", "✓".green())
                } else {
                    format!("{} {verb} failed", "✗".red())
                };

                let mut output = format!("{status}\n\n");

                if let Some(execution) = &result.execution {
                    let rows: Vec<OperationResultRow> =
                        execution.results.iter().map(Self::result_row).collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push_str("\n\n");
                }

                let _ = writeln!(output, "   Created: {}", result.created);
                let _ = writeln!(output, "   Updated: {}", result.updated);
                let _ = writeln!(output, "   Unchanged: {}", result.unchanged);
                if result.failed > 0 || result.skipped > 0 {
                    let _ = writeln!(output, "   Failed: {}", result.failed.to_string().red());
                    let _ = writeln!(output, "   Skipped: {}", result.skipped.to_string().yellow());
                }

                if !result.errors.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }

                output
            }
        }
    }

    fn result_row(result: &OperationResult) -> OperationResultRow {
        let status = match (result.status, result.call) {
            (OperationStatus::Applied, Some(call)) => Self::format_action(call),
            (OperationStatus::Applied, None) | (OperationStatus::Unchanged, _) => {
                "unchanged".dimmed().to_string()
            }
            (OperationStatus::Failed, _) => "failed".red().to_string(),
            (OperationStatus::Skipped, _) => "skipped".yellow().to_string(),
        };

        OperationResultRow {
            resource: result.resource.to_string(),
            status,
            attempts: result.attempts,
            duration: format!("{}ms", result.duration_ms),
        }
    }

    /// Formats deployment state, with the current lock if any.
    #[must_use]
    pub fn format_state(&self, state: &DeploymentState, lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "state": state, "lock": lock });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}/{}\n\n", state.project, state.environment);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(
                    output,
                    "   Config hash: {}",
                    ConfigHasher::new().short_hash(&state.config_hash)
                );
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.observed.len());
                let _ = writeln!(output, "   Lock: {}", Self::format_lock(lock));

                if !state.observed.is_empty() {
                    let rows: Vec<ObservedRow> = state
                        .observed
                        .iter()
                        .map(|(id, resource)| ObservedRow {
                            resource: id.to_string(),
                            remote_id: resource.remote_id.clone().unwrap_or_else(|| String::from("-")),
                            observed_at: resource.observed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    fn format_lock(lock: Option<&LockInfo>) -> String {
        match lock {
            None => String::from("none"),
            Some(lock) if lock.is_expired() => format!("{} (expired, held by {})", lock.lock_id, lock.holder),
            Some(lock) => format!(
                "{} held by {} for {} ({}s left)",
                lock.lock_id,
                lock.holder,
                lock.operation,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats the outcome of `validate`.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &DeployConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "project": config.project.name,
                    "environment": config.project.environment,
                    "resources": config.resources.len(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid!", "✓".green());
                } else {
                    let _ = writeln!(output, "{} Configuration has {} error(s):", "✗".red(), result.error_count());
                    for issue in &result.errors {
                        let _ = writeln!(output, "   - {issue}");
                    }
                }

                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = writeln!(output, "\nConfiguration summary:");
                let _ = writeln!(output, "   Project: {}", config.project.name);
                let _ = writeln!(output, "   Environment: {}", config.project.environment);
                let _ = writeln!(output, "   Resources: {}", config.resources.len());
                output
            }
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        match action {
            Action::Create => "+create".green().to_string(),
            Action::Update => "~update".yellow().to_string(),
            Action::NoOp => "noop".dimmed().to_string(),
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

    fn message(&self, status: &str, symbol: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                serde_json::to_string(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{symbol} {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::planner::PlanBuilder;
    use crate::state::ObservedState;

    const DOCUMENT: &str = r#"
project:
  name: hello-web
resources:
  - kind: cluster
    name: c1
  - kind: service
    name: s1
    depends_on: [c1]
"#;

    fn plan() -> OperationPlan {
        let config = ConfigParser::new().parse_yaml(DOCUMENT, None).unwrap();
        PlanBuilder::new().build(&config, &ObservedState::new()).unwrap()
    }

    #[test]
    fn test_plan_text_lists_pending_operations() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan());

        assert!(text.contains("cluster/c1"));
        assert!(text.contains("service/s1"));
        assert!(text.contains("+create"));
        assert!(text.contains("Plan: 2 to create, 0 to update, 0 unchanged"));
    }

    #[test]
    fn test_plan_json_is_the_serialized_plan() {
        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["operations"][1]["resource"], "service/s1");
        assert_eq!(value["operations"][1]["dependencies"][0], 0);
    }

    #[test]
    fn test_json_messages() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&formatter.warning("careful")).unwrap();
        assert_eq!(value["status"], "warning");
        assert_eq!(value["message"], "careful");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("drift in désired_count", 10), "drift i...");
    }
}
