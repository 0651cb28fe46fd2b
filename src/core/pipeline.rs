//! Pipeline domain model

use crate::core::step::{Step, StepPath};
use crate::invoke::{CheckoutSpec, Tools};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A loaded pipeline: ordered stages plus optional outcome hooks
///
/// Built once by the configuration loader and never mutated during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    /// Global variables available to all stages
    pub environment: BTreeMap<String, String>,

    /// Stages in execution order
    pub stages: Vec<Stage>,

    /// Success and failure hooks
    pub post: PostHooks,

    /// Timeouts, shell and environment inheritance
    pub options: RunOptions,

    /// Source repository used by `checkout` steps
    pub scm: CheckoutSpec,

    /// Binary names of external tools
    pub tools: Tools,
}

/// A named, ordered group of steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,

    /// Stage-scoped variables, layered over the globals
    pub environment: BTreeMap<String, String>,

    pub steps: Vec<Step>,
}

/// Steps run after the stages finish
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hook {
    pub steps: Vec<Step>,
}

/// Which hook a run ends with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Success,
    Failure,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Success => write!(f, "success"),
            HookKind::Failure => write!(f, "failure"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostHooks {
    pub success: Option<Hook>,
    pub failure: Option<Hook>,
}

impl PostHooks {
    pub fn get(&self, kind: HookKind) -> Option<&Hook> {
        match kind {
            HookKind::Success => self.success.as_ref(),
            HookKind::Failure => self.failure.as_ref(),
        }
    }
}

/// Run-wide execution options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Default timeout for each leaf step (none unless configured)
    pub step_timeout: Option<Duration>,

    /// Deadline for the whole stage sequence (none unless configured)
    pub run_timeout: Option<Duration>,

    /// Make the runner's own environment the outermost scope
    pub inherit_env: bool,

    /// Program and leading arguments used to run shell steps
    pub shell: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            step_timeout: None,
            run_timeout: None,
            inherit_env: false,
            shell: vec!["sh".to_string(), "-c".to_string()],
        }
    }
}

/// One entry of a flattened pipeline tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepNode {
    /// Stage name, or `post:success` / `post:failure` for hook steps
    pub stage: String,
    pub path: StepPath,
    pub description: String,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment: BTreeMap::new(),
            stages: Vec::new(),
            post: PostHooks::default(),
            options: RunOptions::default(),
            scm: CheckoutSpec::default(),
            tools: Tools::default(),
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn on_success(mut self, steps: Vec<Step>) -> Self {
        self.post.success = Some(Hook { steps });
        self
    }

    pub fn on_failure(mut self, steps: Vec<Step>) -> Self {
        self.post.failure = Some(Hook { steps });
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_scm(mut self, scm: CheckoutSpec) -> Self {
        self.scm = scm;
        self
    }

    /// Get a stage by name
    pub fn find_stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Total number of leaf steps across all stages (hooks excluded)
    pub fn step_count(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.steps.iter())
            .map(Step::leaf_count)
            .sum()
    }

    /// Depth-first listing of every step, stages first, then hooks
    pub fn walk(&self) -> Vec<StepNode> {
        let mut nodes = Vec::new();
        for stage in &self.stages {
            walk_steps(&stage.name, &stage.steps, &StepPath::root(), &mut nodes);
        }
        for kind in [HookKind::Success, HookKind::Failure] {
            if let Some(hook) = self.post.get(kind) {
                let label = format!("post:{}", kind);
                walk_steps(&label, &hook.steps, &StepPath::root(), &mut nodes);
            }
        }
        nodes
    }
}

fn walk_steps(stage: &str, steps: &[Step], prefix: &StepPath, nodes: &mut Vec<StepNode>) {
    for (index, step) in steps.iter().enumerate() {
        let path = prefix.child(index);
        nodes.push(StepNode {
            stage: stage.to_string(),
            path: path.clone(),
            description: step.describe(),
        });
        if let Step::WithCredentials(scope) = step {
            walk_steps(stage, &scope.steps, &path, nodes);
        }
    }
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_steps(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::new(name)
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}
