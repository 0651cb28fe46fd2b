//! Source checkout through git

use crate::core::context::EnvironmentContext;
use crate::core::error::StepError;
use crate::invoke::Invocation;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where `checkout` steps fetch source from
///
/// All fields are interpolated against the step's context, so a repository
/// URL may carry credentials bound by an enclosing scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutSpec {
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub directory: String,
}

impl Default for CheckoutSpec {
    fn default() -> Self {
        Self {
            repository: None,
            branch: None,
            directory: ".".to_string(),
        }
    }
}

impl CheckoutSpec {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: Some(repository.into()),
            ..Self::default()
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Build the git invocation for the current state of the work tree
    ///
    /// - no repository configured: `git -C <dir> rev-parse HEAD` (the source
    ///   is expected to be in place already)
    /// - directory is a work tree: `git -C <dir> pull --ff-only`
    /// - otherwise: `git clone [--branch <b>] <repo> <dir>`
    pub fn invocation(&self, git: &str, ctx: &EnvironmentContext) -> Result<Invocation, StepError> {
        let directory = ctx.interpolate(&self.directory)?;

        let Some(repository) = &self.repository else {
            return Ok(Invocation::new(git).args(["-C", directory.as_str(), "rev-parse", "HEAD"]));
        };

        if Path::new(&directory).join(".git").exists() {
            return Ok(Invocation::new(git).args(["-C", directory.as_str(), "pull", "--ff-only"]));
        }

        let mut invocation = Invocation::new(git).arg("clone");
        if let Some(branch) = &self.branch {
            invocation = invocation.arg("--branch").arg(ctx.interpolate(branch)?);
        }
        Ok(invocation.arg(ctx.interpolate(repository)?).arg(directory))
    }
}
