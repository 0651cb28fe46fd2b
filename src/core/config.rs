//! Pipeline configuration from YAML

use crate::core::{
    context::is_valid_name,
    pipeline::{Hook, PipelineDefinition, PostHooks, RunOptions, Stage},
    step::{ShellCommand, Step},
};
use crate::invoke::{CheckoutSpec, Tools};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// YAML file with credential values, relative to the pipeline file
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Global variables available to all stages
    #[serde(default)]
    environment: BTreeMap<String, Value>,

    #[serde(default)]
    pub options: OptionsConfig,

    /// Source repository for `checkout` steps
    #[serde(default)]
    pub scm: Option<CheckoutSpec>,

    #[serde(default)]
    pub tools: Tools,

    /// Stages, in execution order
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub stages: Vec<StageConfig>,

    /// Outcome hooks
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub post: PostConfig,

    /// Directory of the file this config was read from
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// Run options as written in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    /// Default timeout for each step (in seconds)
    pub step_timeout_secs: Option<u64>,

    /// Timeout for the whole stage sequence (in seconds)
    pub run_timeout_secs: Option<u64>,

    /// Expose the runner's own environment to interpolation
    pub inherit_env: bool,

    /// Shell program and leading arguments, e.g. `["bash", "-eu", "-c"]`
    pub shell: Option<Vec<String>>,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,

    #[serde(default)]
    pub environment: BTreeMap<String, Value>,

    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// Hooks as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostConfig {
    #[serde(default)]
    pub success: Option<Vec<StepConfig>>,

    #[serde(default)]
    pub failure: Option<Vec<StepConfig>>,
}

/// Step configuration as defined in YAML
///
/// `build`, `push`, `update_kubeconfig` and `apply` are shorthands that
/// become shell steps when the pipeline is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepConfig {
    Checkout,
    Sh(ShConfig),
    WithCredentials(CredentialsBlockConfig),
    Build(BuildConfig),
    Push(PushConfig),
    UpdateKubeconfig(KubeconfigConfig),
    Apply(ApplyConfig),
}

/// `sh: <command>` or `sh: { command, env, dir, timeout_secs }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShConfig {
    Command(String),
    Detailed {
        command: String,
        #[serde(default)]
        env: BTreeMap<String, Value>,
        #[serde(default)]
        dir: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsBlockConfig {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub image: String,

    #[serde(default = "default_build_context")]
    pub context: String,

    #[serde(default)]
    pub dockerfile: Option<String>,
}

fn default_build_context() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConfig {
    pub image: String,
    pub tag: String,
    pub registry: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubeconfigConfig {
    pub region: String,
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyConfig {
    #[serde(default)]
    pub manifests: Vec<String>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;

        let mut config = Self::parse(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        config.validate()?;
        Ok(config)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Self::parse(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Invalid pipeline definition")
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }

        validate_env("pipeline environment", &self.environment)?;

        if self.stages.is_empty() {
            anyhow::bail!("Pipeline '{}' has no stages", self.name);
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                anyhow::bail!("Stage names must not be empty");
            }
            if !seen.insert(stage.name.as_str()) {
                anyhow::bail!("Duplicate stage name: {}", stage.name);
            }
            if stage.steps.is_empty() {
                anyhow::bail!("Stage '{}' has no steps", stage.name);
            }
            validate_env(&format!("stage '{}' environment", stage.name), &stage.environment)?;
            validate_steps(&stage.name, &stage.steps)?;
        }

        if let Some(steps) = &self.post.success {
            validate_steps("post.success", steps)?;
        }
        if let Some(steps) = &self.post.failure {
            validate_steps("post.failure", steps)?;
        }

        if let Some(shell) = &self.options.shell {
            if shell.is_empty() {
                anyhow::bail!("options.shell must name a program");
            }
        }
        if self.options.step_timeout_secs == Some(0) || self.options.run_timeout_secs == Some(0) {
            anyhow::bail!("Timeouts must be at least one second");
        }

        if let Some(path) = self.credentials_path() {
            if !path.exists() {
                anyhow::bail!("Credentials file doesn't exist: {}", path.display());
            }
        }

        Ok(())
    }

    /// Credentials file location, resolved against the pipeline file's directory
    pub fn credentials_path(&self) -> Option<PathBuf> {
        let file = self.credentials_file.as_ref()?;
        Some(match &self.base_dir {
            Some(dir) if file.is_relative() => dir.join(file),
            _ => file.clone(),
        })
    }

    /// Global variables as plain strings
    pub fn environment(&self) -> BTreeMap<String, String> {
        to_string_map(&self.environment)
    }

    /// Convert config to a pipeline definition, expanding shorthand steps
    pub fn to_pipeline(&self) -> PipelineDefinition {
        let stages = self
            .stages
            .iter()
            .map(|stage| Stage {
                name: stage.name.clone(),
                environment: to_string_map(&stage.environment),
                steps: self.to_steps(&stage.steps),
            })
            .collect();

        let hook = |steps: &Option<Vec<StepConfig>>| {
            steps.as_ref().map(|steps| Hook {
                steps: self.to_steps(steps),
            })
        };

        let defaults = RunOptions::default();
        PipelineDefinition {
            name: self.name.clone(),
            environment: self.environment(),
            stages,
            post: PostHooks {
                success: hook(&self.post.success),
                failure: hook(&self.post.failure),
            },
            options: RunOptions {
                step_timeout: self.options.step_timeout_secs.map(Duration::from_secs),
                run_timeout: self.options.run_timeout_secs.map(Duration::from_secs),
                inherit_env: self.options.inherit_env,
                shell: self.options.shell.clone().unwrap_or(defaults.shell),
            },
            scm: self.scm.clone().unwrap_or_default(),
            tools: self.tools.clone(),
        }
    }

    fn to_steps(&self, steps: &[StepConfig]) -> Vec<Step> {
        steps.iter().map(|step| self.to_step(step)).collect()
    }

    fn to_step(&self, step: &StepConfig) -> Step {
        let tools = &self.tools;
        match step {
            StepConfig::Checkout => Step::Checkout,
            StepConfig::Sh(ShConfig::Command(command)) => Step::shell(command.clone()),
            StepConfig::Sh(ShConfig::Detailed {
                command,
                env,
                dir,
                timeout_secs,
            }) => Step::Shell(ShellCommand {
                command: command.clone(),
                env: to_string_map(env),
                working_dir: dir.clone(),
                timeout: timeout_secs.map(Duration::from_secs),
            }),
            StepConfig::WithCredentials(block) => {
                Step::with_credentials(block.id.clone(), self.to_steps(&block.steps))
            }
            StepConfig::Build(build) => Step::shell(tools.build(
                &build.image,
                &build.context,
                build.dockerfile.as_deref(),
            )),
            StepConfig::Push(push) => {
                Step::shell(tools.push(&push.image, &push.tag, &push.registry))
            }
            StepConfig::UpdateKubeconfig(kube) => {
                Step::shell(tools.update_kubeconfig(&kube.region, &kube.cluster))
            }
            StepConfig::Apply(apply) => Step::shell(tools.apply(&apply.manifests)),
        }
    }
}

fn validate_env(what: &str, env: &BTreeMap<String, Value>) -> Result<()> {
    for (name, value) in env {
        if !is_valid_name(name) {
            anyhow::bail!("Invalid variable name '{}' in {}", name, what);
        }
        if scalar_to_string(value).is_none() {
            anyhow::bail!("Variable '{}' in {} must be a string, number or boolean", name, what);
        }
    }
    Ok(())
}

fn validate_steps(location: &str, steps: &[StepConfig]) -> Result<()> {
    for (index, step) in steps.iter().enumerate() {
        match step {
            StepConfig::Checkout => {}
            StepConfig::Sh(ShConfig::Command(command)) => {
                if command.trim().is_empty() {
                    anyhow::bail!("Empty command in {} step {}", location, index);
                }
            }
            StepConfig::Sh(ShConfig::Detailed {
                command,
                env,
                timeout_secs,
                ..
            }) => {
                if command.trim().is_empty() {
                    anyhow::bail!("Empty command in {} step {}", location, index);
                }
                if *timeout_secs == Some(0) {
                    anyhow::bail!("Timeout of {} step {} must be at least one second", location, index);
                }
                validate_env(&format!("{} step {} env", location, index), env)?;
            }
            StepConfig::WithCredentials(block) => {
                if block.id.trim().is_empty() {
                    anyhow::bail!("Credential block in {} step {} has no id", location, index);
                }
                if block.steps.is_empty() {
                    anyhow::bail!(
                        "Credential block '{}' in {} step {} has no steps",
                        block.id,
                        location,
                        index
                    );
                }
                validate_steps(&format!("{} step {}", location, index), &block.steps)?;
            }
            StepConfig::Build(build) => {
                if build.image.trim().is_empty() {
                    anyhow::bail!("build in {} step {} needs an image", location, index);
                }
            }
            StepConfig::Push(push) => {
                if push.image.trim().is_empty()
                    || push.tag.trim().is_empty()
                    || push.registry.trim().is_empty()
                {
                    anyhow::bail!(
                        "push in {} step {} needs image, tag and registry",
                        location,
                        index
                    );
                }
            }
            StepConfig::UpdateKubeconfig(kube) => {
                if kube.region.trim().is_empty() || kube.cluster.trim().is_empty() {
                    anyhow::bail!(
                        "update_kubeconfig in {} step {} needs region and cluster",
                        location,
                        index
                    );
                }
            }
            StepConfig::Apply(apply) => {
                if apply.manifests.is_empty() {
                    anyhow::bail!("apply in {} step {} lists no manifests", location, index);
                }
            }
        }
    }
    Ok(())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn to_string_map(values: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    values
        .iter()
        .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k.clone(), v)))
        .collect()
}
