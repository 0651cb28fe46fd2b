//! Collaborator invocation - the uniform exit-code contract
//!
//! Every external tool (git, docker, aws, kubectl, plain shell commands) is
//! reached through [`CommandInvoker`]. Exit code 0 is success, anything else
//! is failure; what the tool does is opaque to the runner.

pub mod checkout;
pub mod process;
pub mod response;
pub mod tools;

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub use checkout::CheckoutSpec;
pub use process::SystemInvoker;
pub use response::{InvocationOutput, InvokeError};
pub use tools::Tools;

/// One concrete request to a collaborator
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,

    /// Variables layered over the runner's environment
    pub env: BTreeMap<String, String>,

    /// Runner variables the child must not inherit
    pub hidden_env: BTreeSet<String>,

    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            hidden_env: BTreeSet::new(),
            working_dir: None,
        }
    }

    /// Run `script` through a shell given as program plus leading arguments
    pub fn shell(shell: &[String], script: impl Into<String>) -> Self {
        let (program, leading) = match shell.split_first() {
            Some((program, rest)) => (program.clone(), rest.to_vec()),
            None => ("sh".to_string(), vec!["-c".to_string()]),
        };
        Self::new(program).args(leading).arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Withhold runner variables from the child
    ///
    /// A name also present in `env` is still passed with the `env` value.
    pub fn hide_env<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden_env.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The script handed to the shell, i.e. the last argument
    pub fn script(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

// Environment values may hold secrets, so only names are shown
impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args.len())
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("hidden_env", &self.hidden_env)
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

/// Trait for collaborator invocation - allows for different implementations
#[async_trait]
pub trait CommandInvoker: Send + Sync {
    /// Run the invocation to completion and report its exit code and output
    async fn invoke(&self, invocation: &Invocation) -> Result<InvocationOutput, InvokeError>;
}

#[async_trait]
impl<I: CommandInvoker + ?Sized> CommandInvoker for Arc<I> {
    async fn invoke(&self, invocation: &Invocation) -> Result<InvocationOutput, InvokeError> {
        (**self).invoke(invocation).await
    }
}
