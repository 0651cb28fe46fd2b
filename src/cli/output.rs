//! CLI output formatting

use crate::{
    core::{
        ExecutionResult, ExecutionStatus, HookOutcome, HookReport, PipelineDefinition, StageStatus,
    },
    execution::ExecutionEvent,
    persistence::ExecutionSummary,
};
use console::{Emoji, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static KEY: Emoji<'_, '_> = Emoji("🔑 ", "* ");

const DEFAULT_WIDTH: usize = 100;

/// Create a stage progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Width of the attached terminal, or a sane default when piped
pub fn terminal_width() -> usize {
    Term::stdout()
        .size_checked()
        .map(|(_, cols)| cols as usize)
        .unwrap_or(DEFAULT_WIDTH)
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

fn format_stage_status(status: StageStatus) -> String {
    match status {
        StageStatus::NotRun => style("not run").dim().to_string(),
        StageStatus::Running => style("running").yellow().to_string(),
        StageStatus::Succeeded => style("succeeded").green().to_string(),
        StageStatus::Failed => style("failed").red().to_string(),
    }
}

/// Format a hook report for display
pub fn format_hook_outcome(report: &HookReport) -> String {
    match &report.outcome {
        HookOutcome::NotDefined => format!("no {} hook", report.kind),
        HookOutcome::Succeeded => format!("{} hook {}", report.kind, style("succeeded").green()),
        HookOutcome::Failed(error) => format!(
            "{} hook {}: {}",
            report.kind,
            style("failed").red(),
            style(error).dim()
        ),
    }
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Succeeded => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Pending => INFO,
    };

    let mut line = format!(
        "{} {} - {} - {} ({}/{} stages)",
        status_icon,
        style(&summary.execution_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.stages_succeeded,
        summary.total_stages,
    );

    if let (Some(stage), Some(step)) = (&summary.failed_stage, summary.failed_step) {
        line.push_str(&format!(
            " - at {} step {}",
            style(stage).red(),
            style(step).red()
        ));
    }
    line.push_str(&format!(" - {}", style(&summary.hook).dim()));
    line
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            stage_count,
        } => format!(
            "{} Starting pipeline {} ({}, {} stages)",
            ROCKET,
            style(pipeline_name).bold(),
            style(&execution_id.to_string()[..8]).dim(),
            stage_count
        ),
        ExecutionEvent::StageStarted { stage, index } => format!(
            "{} Stage {} {}",
            INFO,
            style(index + 1).dim(),
            style(stage).bold()
        ),
        ExecutionEvent::StepStarted {
            stage,
            path,
            description,
        } => format!(
            "{}{} {} {}",
            indent(path.depth()),
            SPINNER,
            style(format!("{}#{}", stage, path)).cyan(),
            description
        ),
        ExecutionEvent::StepOutput { stage, path, output } => format!(
            "{}{} Output from {}:\n{}",
            indent(path.depth()),
            INFO,
            style(format!("{}#{}", stage, path)).dim(),
            output
        ),
        ExecutionEvent::StepSucceeded { stage, path } => format!(
            "{}{} {}",
            indent(path.depth()),
            CHECK,
            style(format!("{}#{}", stage, path)).green()
        ),
        ExecutionEvent::StepFailed { stage, path, error } => format!(
            "{}{} {}: {}",
            indent(path.depth()),
            CROSS,
            style(format!("{}#{}", stage, path)).red(),
            style(error).dim()
        ),
        ExecutionEvent::CredentialScopeEntered { stage, credential } => format!(
            "{} {} bound {}",
            KEY,
            style(stage).dim(),
            style(credential).yellow()
        ),
        ExecutionEvent::CredentialScopeExited { stage, credential } => format!(
            "{} {} released {}",
            KEY,
            style(stage).dim(),
            style(credential).yellow()
        ),
        ExecutionEvent::StageCompleted { stage, status } => format!(
            "{} Stage {} {}",
            if *status == StageStatus::Succeeded { CHECK } else { CROSS },
            style(stage).bold(),
            format_stage_status(*status)
        ),
        ExecutionEvent::HookStarted { kind } => {
            format!("{} Running {} hook", INFO, style(kind).bold())
        }
        ExecutionEvent::HookFinished { report } => {
            let icon = match report.outcome {
                HookOutcome::Failed(_) => WARN,
                _ => INFO,
            };
            format!("{} {}", icon, format_hook_outcome(report))
        }
        ExecutionEvent::PipelineCompleted {
            execution_id,
            result,
        } => {
            let status_str = match result {
                ExecutionResult::Success => {
                    format!("{} {}", style("succeeded").green(), CHECK)
                }
                ExecutionResult::Failure {
                    stage, step_index, ..
                } => format!(
                    "{} at {} step {}",
                    style("failed").red(),
                    style(stage).bold(),
                    step_index
                ),
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(&execution_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth.saturating_sub(1))
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

/// Render the stage/step tree of a pipeline, clipping long commands to `width`
pub fn format_plan(pipeline: &PipelineDefinition, width: usize) -> String {
    let mut lines = vec![format!(
        "{} ({} stages, {} steps)",
        style(&pipeline.name).bold(),
        pipeline.stages.len(),
        pipeline.step_count()
    )];

    let mut current: Option<&str> = None;
    let nodes = pipeline.walk();
    for node in &nodes {
        if current != Some(node.stage.as_str()) {
            lines.push(format!("  {}", style(&node.stage).cyan()));
            current = Some(node.stage.as_str());
        }
        let prefix = format!(
            "    {}{:<6}",
            "  ".repeat(node.path.depth().saturating_sub(1)),
            node.path.to_string()
        );
        let room = width.saturating_sub(console::measure_text_width(&prefix)).max(8);
        lines.push(format!(
            "{}{}",
            style(prefix).dim(),
            console::truncate_str(&node.description, room, "…")
        ));
    }

    lines.join("\n")
}

/// Human readable duration
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}.{}s", secs, duration.subsec_millis() / 100)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
