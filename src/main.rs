use anyhow::{Context, Result};
use stagehand::cli::commands::{
    HistoryCommand, ListCommand, PlanCommand, RunCommand, ValidateCommand,
};
use stagehand::cli::output::*;
use stagehand::cli::{Cli, Command};
use stagehand::core::config::PipelineConfig;
use stagehand::core::{ExecutionResult, ExecutionStatus, RunReport, StageStatus};
use stagehand::credentials::StaticCredentialProvider;
use stagehand::execution::{ExecutionEngine, ExecutionEvent};
use stagehand::invoke::SystemInvoker;
use stagehand::persistence::{
    create_summary, record_execution, ExecutionSummary, InMemoryPersistence, PersistenceBackend,
};
use std::sync::Arc;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.verbose).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plan(cmd) => plan_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(
        stagehand::persistence::SqliteExecutionStore::with_default_path().await?,
    ))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    tracing::warn!("Built without sqlite support; history is not persisted");
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand, verbose: bool) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let mut pipeline = config.to_pipeline();
    cmd.apply_options(&mut pipeline);
    for (key, value) in &cmd.vars {
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let credentials = match cmd
        .credentials
        .as_ref()
        .map(std::path::PathBuf::from)
        .or_else(|| config.credentials_path())
    {
        Some(path) => {
            debug!("Loading credentials from {}", path.display());
            StaticCredentialProvider::from_file(&path)?
        }
        None => StaticCredentialProvider::new(),
    };

    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history().await?
    };

    let mut engine =
        ExecutionEngine::new(SystemInvoker::new(), credentials).with_resolver(cmd.resolver());

    let progress = create_progress_bar(pipeline.stages.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        match &event {
            ExecutionEvent::StepOutput { output, .. } if !verbose => {
                if output.trim().is_empty() {
                    return;
                }
                bar.println(format_output(output, 5));
                return;
            }
            ExecutionEvent::StageStarted { stage, .. } => bar.set_message(stage.clone()),
            ExecutionEvent::StageCompleted { .. } => bar.inc(1),
            _ => {}
        }
        bar.println(format_execution_event(&event));
    });

    println!();
    let report = engine.execute(&pipeline).await;
    progress.finish_and_clear();

    print_report(&report);

    let summary = create_summary(&report);
    if record_execution(store.as_ref(), &summary).await && !cmd.no_history {
        println!(
            "\n{} Execution saved to history (ID: {})",
            INFO,
            style(&summary.execution_id.to_string()[..8]).dim()
        );
    }

    if let ExecutionResult::Failure { reason, .. } = &report.result {
        error!("{}", reason);
        std::process::exit(1);
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    for stage in &report.stages {
        let icon = match stage.status {
            StageStatus::Succeeded => CHECK,
            StageStatus::Failed => CROSS,
            _ => INFO,
        };
        let took = stage
            .duration()
            .and_then(|d| d.to_std().ok())
            .map(|d| format!(" ({})", format_duration(d)))
            .unwrap_or_default();
        println!("  {} {}{}", icon, stage.name, style(took).dim());
    }
    println!("  {} {}", INFO, format_hook_outcome(&report.hook));

    let took = report
        .duration()
        .to_std()
        .map(format_duration)
        .unwrap_or_default();
    match &report.result {
        ExecutionResult::Success => println!(
            "\n{} {} completed {} in {}",
            CHECK,
            style(&report.pipeline_name).bold(),
            style("successfully").green(),
            took
        ),
        ExecutionResult::Failure {
            stage,
            step_index,
            reason,
        } => println!(
            "\n{} {} {} at {} step {}: {}",
            CROSS,
            style(&report.pipeline_name).bold(),
            style("failed").red(),
            style(stage).bold(),
            step_index,
            style(reason).red()
        ),
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            let pipeline = config.to_pipeline();
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(pipeline.stages.len()).cyan());
            println!("  Steps: {}", style(pipeline.step_count()).cyan());
            println!("  Variables: {}", style(pipeline.environment.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn plan_pipeline(cmd: &PlanCommand) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    println!("{}", format_plan(&config.to_pipeline(), terminal_width()));
    Ok(())
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_history().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let executions = store.list_executions(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "execution_count": executions.len()
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);
    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let executions = store.list_executions(pipeline_name).await?;
            let succeeded = executions
                .iter()
                .filter(|e| e.status == ExecutionStatus::Succeeded)
                .count();
            let failed = executions
                .iter()
                .filter(|e| e.status == ExecutionStatus::Failed)
                .count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(succeeded).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id =
            uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.full)?,
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    let mut executions = match &cmd.pipeline {
        Some(pipeline_name) => store.list_executions(pipeline_name).await?,
        None => {
            let mut all_execs = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all_execs.extend(store.list_executions(&pipeline).await?);
            }
            all_execs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_execs
        }
    };
    executions.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    println!("{} Execution history (showing latest {}):", INFO, cmd.limit);
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, full: bool) -> Result<()> {
    println!("{} Execution Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Stages: {} ({}/{})",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.stages_succeeded,
        summary.total_stages
    );
    if let (Some(stage), Some(step)) = (&summary.failed_stage, summary.failed_step) {
        println!("  Failed at: {} step {}", style(stage).red(), step);
    }
    if let Some(reason) = &summary.reason {
        println!("  Reason: {}", style(reason).red());
    }
    println!("  Hook: {}", style(&summary.hook).dim());

    if full {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
