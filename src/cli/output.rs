//! CLI output formatting

use crate::{
    core::state::TaskResult,
    execution::{ExecutionEvent, JobReport, StepReport},
};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Format a task result for display
pub fn format_result(result: TaskResult) -> String {
    match result {
        TaskResult::Succeeded => style("SUCCEEDED").green().to_string(),
        TaskResult::SucceededWithIssues => style("SUCCEEDED WITH ISSUES").yellow().to_string(),
        TaskResult::Cancelled => style("CANCELLED").yellow().to_string(),
        TaskResult::Failed => style("FAILED").red().to_string(),
        TaskResult::Skipped => style("SKIPPED").dim().to_string(),
    }
}

fn result_icon(result: TaskResult) -> Emoji<'static, 'static> {
    match result {
        TaskResult::Succeeded => CHECK,
        TaskResult::SucceededWithIssues | TaskResult::Cancelled => WARN,
        TaskResult::Failed => CROSS,
        TaskResult::Skipped => SKIP,
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::JobStarted {
            execution_id,
            job_name,
        } => format!(
            "{} Starting job {} ({})",
            ROCKET,
            style(job_name).bold(),
            style(&execution_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StepStarted {
            step_id,
            display_name,
        } => format!(
            "{} {} {}",
            SPINNER,
            style(step_id).cyan(),
            style(display_name).dim()
        ),
        ExecutionEvent::StepCompleted {
            step_id,
            outcome,
            conclusion,
        } => {
            if outcome != conclusion {
                format!(
                    "{} {} {} (continued on error)",
                    result_icon(*conclusion),
                    style(step_id).bold(),
                    format_result(*outcome)
                )
            } else {
                format!(
                    "{} {} {}",
                    result_icon(*conclusion),
                    style(step_id).bold(),
                    format_result(*conclusion)
                )
            }
        }
        ExecutionEvent::StepSkipped { step_id } => {
            format!("{} {} {}", SKIP, style(step_id).dim(), format_result(TaskResult::Skipped))
        }
        ExecutionEvent::JobCompleted {
            execution_id,
            result,
        } => format!(
            "{} Job ({}) {}",
            INFO,
            style(&execution_id.to_string()[..8]).dim(),
            format_result(*result)
        ),
    }
}

fn push_step_lines(lines: &mut Vec<String>, step: &StepReport, depth: usize) {
    let indent = "  ".repeat(depth + 1);
    lines.push(format!(
        "{}{}{} - {}",
        indent,
        result_icon(step.conclusion),
        style(&step.step_id).bold(),
        format_result(step.conclusion)
    ));
    for error in &step.errors {
        lines.push(format!("{}    {}", indent, style(error).red()));
    }
    for child in &step.children {
        push_step_lines(lines, child, depth + 1);
    }
}

/// Format the final job report as an indented step tree
pub fn format_job_report(report: &JobReport) -> String {
    let mut lines = vec![format!(
        "{} {} - {}",
        result_icon(report.result()),
        style(&report.name).bold(),
        format_result(report.result())
    )];
    for step in &report.steps {
        push_step_lines(&mut lines, step, 0);
    }
    if let Some(duration) = report
        .state
        .started_at
        .zip(report.state.completed_at)
        .and_then(|(started, completed)| completed.signed_duration_since(started).to_std().ok())
    {
        lines.push(format!("  Duration: {}", style(format_duration(duration)).dim()));
    }
    lines.join("\n")
}

pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}.{:01}s", secs, duration.subsec_millis() / 100)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
