//! Step domain model

use crate::credentials::CredentialRef;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A single unit of work in a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Retrieve the pipeline's source through the checkout collaborator
    Checkout,
    /// Run a command through the shell
    Shell(ShellCommand),
    /// Run the enclosed steps with a credential's bindings in scope
    WithCredentials(CredentialScope),
}

/// A shell command and the environment it runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// Command template; `$NAME` tokens are interpolated at run time
    pub command: String,

    /// Step-local variables, layered over the enclosing scopes
    pub env: BTreeMap<String, String>,

    /// Working directory for the process (interpolated)
    pub working_dir: Option<String>,

    /// Overrides the pipeline's default step timeout
    pub timeout: Option<Duration>,
}

/// Steps that see a credential's bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    pub credential: CredentialRef,
    pub steps: Vec<Step>,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Step {
    pub fn checkout() -> Self {
        Step::Checkout
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Step::Shell(ShellCommand::new(command))
    }

    pub fn with_credentials(credential: impl Into<String>, steps: Vec<Step>) -> Self {
        Step::WithCredentials(CredentialScope {
            credential: CredentialRef::new(credential),
            steps,
        })
    }

    /// One-line description for logs and plans
    pub fn describe(&self) -> String {
        match self {
            Step::Checkout => "checkout".to_string(),
            Step::Shell(cmd) => format!("sh: {}", cmd.command),
            Step::WithCredentials(scope) => format!("with_credentials: {}", scope.credential),
        }
    }

    /// Number of leaf steps (checkout and shell) contained in this step
    pub fn leaf_count(&self) -> usize {
        match self {
            Step::Checkout | Step::Shell(_) => 1,
            Step::WithCredentials(scope) => scope.steps.iter().map(Step::leaf_count).sum(),
        }
    }
}

/// Position of a step inside a stage
///
/// The first index is the step's position in the stage; each further index
/// descends into a credential scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StepPath(Vec<usize>);

impl StepPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    /// Index of the top-level step this path belongs to
    pub fn top(&self) -> usize {
        self.0.first().copied().unwrap_or(0)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StepPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(usize::to_string).collect();
        f.write_str(&parts.join("."))
    }
}
