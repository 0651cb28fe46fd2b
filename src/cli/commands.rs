//! CLI command definitions

use crate::core::context::{is_valid_name, EnvironmentResolver};
use crate::core::PipelineDefinition;
use clap::Args;
use std::time::Duration;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Global variable overrides (KEY=VALUE)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub vars: Vec<(String, String)>,

    /// Credentials YAML file (overrides the pipeline's credentials_file)
    #[arg(long)]
    pub credentials: Option<String>,

    /// Default timeout for each step, in seconds
    #[arg(long)]
    pub step_timeout: Option<u64>,

    /// Timeout for the whole run, in seconds
    #[arg(long)]
    pub run_timeout: Option<u64>,

    /// Expose the runner's environment to variable interpolation
    #[arg(long)]
    pub inherit_env: bool,

    /// Don't save execution to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    /// Apply command-line run options on top of the loaded pipeline
    pub fn apply_options(&self, pipeline: &mut PipelineDefinition) {
        if let Some(secs) = self.step_timeout {
            pipeline.options.step_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = self.run_timeout {
            pipeline.options.run_timeout = Some(Duration::from_secs(secs));
        }
        if self.inherit_env {
            pipeline.options.inherit_env = true;
        }
    }

    /// Resolver carrying the `--var` overrides
    pub fn resolver(&self) -> EnvironmentResolver {
        self.vars
            .iter()
            .fold(EnvironmentResolver::new(), |resolver, (key, value)| {
                resolver.with_override(key.clone(), value.clone())
            })
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show a pipeline's structure
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show execution counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details of a single execution
    #[arg(long)]
    pub full: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single execution
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Parse KEY=VALUE pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid KEY=VALUE pair: {}", s))?;
    if !is_valid_name(key) {
        return Err(format!("Invalid variable name: {}", key));
    }
    Ok((key.to_string(), value.to_string()))
}
