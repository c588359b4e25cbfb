//! Output formatting for CLI commands.
//!
//! Formats plans, reports, and state summaries as text or JSON.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::planner::{ActionState, ActionType, DiffResult, ExecutionPlan, ExecutionReport};
use crate::reconciler::DriftReport;
use crate::state::StateFile;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Execution outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
}

/// State record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
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

    /// Formats an execution plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ExecutionPlan, diff: &DiffResult, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan, diff, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &ExecutionPlan, diff: &DiffResult, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::from("\nExecution plan\n");
        let _ = write!(output, "   Config hash: {}\n\n", &plan.config_hash[..8.min(plan.config_hash.len())]);

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.action_type != ActionType::Noop)
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.address.clone(),
                reason: Self::truncate(&a.reason, 40),
            })
            .collect();

        if !rows.is_empty() {
            let table = Table::new(rows).to_string();
            output.push_str(&table);
            output.push('\n');
        }

        if detailed {
            for resource_diff in diff.actionable_diffs() {
                if resource_diff.details.is_empty() {
                    continue;
                }
                let _ = writeln!(output, "\n{}:", resource_diff.address.bold());
                for detail in &resource_diff.details {
                    let marker = if detail.forces_replace {
                        "! (forces replace)"
                    } else {
                        "~"
                    };
                    let _ = writeln!(
                        output,
                        "   {marker} {}: {} -> {}",
                        detail.field,
                        detail.old_value.as_deref().unwrap_or("(none)"),
                        detail.new_value.as_deref().unwrap_or("(none)")
                    );
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to destroy, {} unchanged\n",
            plan.create_count().to_string().green(),
            plan.update_count().to_string().yellow(),
            plan.destroy_count().to_string().red(),
            diff.unchanged
        );

        output
    }

    /// Formats an execution report.
    #[must_use]
    pub fn format_report(&self, report: &ExecutionReport) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&ReportJson::from(report)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &ExecutionReport) -> String {
        let mut output = String::new();

        let rows: Vec<OutcomeRow> = report
            .outcomes
            .iter()
            .filter(|o| o.action_type != ActionType::Noop)
            .map(|o| OutcomeRow {
                resource: o.address.clone(),
                action: o.action_type.to_string(),
                result: Self::format_action_state(o.state),
                attempts: o.attempts,
            })
            .collect();

        if !rows.is_empty() {
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let status = if report.all_applied() {
            format!("{} Apply complete", "✓".green())
        } else if report.cancelled {
            format!("{} Apply cancelled", "⚠".yellow())
        } else {
            format!("{} Apply failed", "✗".red())
        };
        let _ = write!(
            output,
            "\n{status}: {} applied, {} failed, {} skipped\n",
            report.applied, report.failed, report.skipped
        );

        for outcome in &report.outcomes {
            if let Some(error) = &outcome.error {
                let _ = writeln!(output, "   {} {}: {error}", "✗".red(), outcome.address);
            }
        }

        output
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.is_converged() {
                    format!(
                        "{} No drift detected across {} recorded resources.\n",
                        "✓".green(),
                        report.total_records
                    )
                } else {
                    let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                    for entry in &report.drifted {
                        let _ = writeln!(output, "   - {}: {}", entry.address, entry.detail);
                    }
                    let _ = write!(
                        output,
                        "\n{}/{} resources have drifted.\n",
                        report.drifted.len(),
                        report.total_records
                    );
                    output
                }
            }
        }
    }

    /// Formats the recorded state.
    #[must_use]
    pub fn format_state(&self, state: &StateFile) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}/{}\n\n", state.project, state.environment);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Serial: {}", state.serial);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.records.len());

                if !state.records.is_empty() {
                    let rows: Vec<RecordRow> = state
                        .records
                        .values()
                        .map(|r| RecordRow {
                            resource: r.address(),
                            provider_id: r.provider_id.clone(),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} resources)",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.len()
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Destroy => "-destroy".red().to_string(),
            ActionType::Noop => "noop".dimmed().to_string(),
        }
    }

    /// Formats an action state with color.
    fn format_action_state(state: ActionState) -> String {
        match state {
            ActionState::Applied => "applied".green().to_string(),
            ActionState::Failed => "failed".red().to_string(),
            ActionState::Skipped => "skipped".yellow().to_string(),
            ActionState::Pending | ActionState::Applying => state.to_string().dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters. Counts chars,
    /// not bytes, so multibyte text never splits mid-character.
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
struct PlanJson {
    config_hash: String,
    action_count: usize,
    creates: usize,
    updates: usize,
    destroys: usize,
    actions: Vec<ActionJson>,
}

#[derive(serde::Serialize)]
struct ActionJson {
    action_type: String,
    resource: String,
    reason: String,
    dependencies: Vec<usize>,
}

impl From<&ExecutionPlan> for PlanJson {
    fn from(plan: &ExecutionPlan) -> Self {
        Self {
            config_hash: plan.config_hash.clone(),
            action_count: plan.action_count(),
            creates: plan.create_count(),
            updates: plan.update_count(),
            destroys: plan.destroy_count(),
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type.to_string(),
                    resource: a.address.clone(),
                    reason: a.reason.clone(),
                    dependencies: a.dependencies.clone(),
                })
                .collect(),
        }
    }
}

#[derive(serde::Serialize)]
struct ReportJson {
    applied: usize,
    failed: usize,
    skipped: usize,
    cancelled: bool,
    outcomes: Vec<OutcomeJson>,
}

#[derive(serde::Serialize)]
struct OutcomeJson {
    resource: String,
    action: String,
    result: String,
    attempts: u32,
    error: Option<String>,
}

impl From<&ExecutionReport> for ReportJson {
    fn from(report: &ExecutionReport) -> Self {
        Self {
            applied: report.applied,
            failed: report.failed,
            skipped: report.skipped,
            cancelled: report.cancelled,
            outcomes: report
                .outcomes
                .iter()
                .map(|o| OutcomeJson {
                    resource: o.address.clone(),
                    action: o.action_type.to_string(),
                    result: o.state.to_string(),
                    attempts: o.attempts,
                    error: o.error.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string_unchanged() {
        assert_eq!(OutputFormatter::truncate("Up to date", 40), "Up to date");
    }

    #[test]
    fn test_truncate_long_string_keeps_char_budget() {
        let long = "a".repeat(60);
        let truncated = OutputFormatter::truncate(&long, 40);
        assert_eq!(truncated.chars().count(), 40);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_multibyte_reason_at_cut_point() {
        // Attribute names come from user configuration and may be
        // non-ASCII; the cut must land on a character boundary
        let reason = format!("Attribute changes: {}é{}", "a".repeat(17), "a".repeat(8));
        assert!(reason.len() > 40);

        let truncated = OutputFormatter::truncate(&reason, 40);
        assert_eq!(truncated.chars().count(), 40);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_exact_char_count_unchanged() {
        // 40 chars but 41 bytes: byte length alone must not force a cut
        let reason = format!("Attribute changes: {}é{}", "a".repeat(17), "a".repeat(3));
        assert_eq!(reason.chars().count(), 40);
        assert_eq!(OutputFormatter::truncate(&reason, 40), reason);
    }
}
