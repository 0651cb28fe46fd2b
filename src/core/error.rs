//! Step failure kinds

use thiserror::Error;

/// Why a step (and therefore its stage) failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Interpolation referenced a name bound in no enclosing scope
    #[error("undefined variable `{name}`")]
    UndefinedVariable { name: String },

    /// A credential reference could not be turned into secret material
    #[error("credential `{credential}` could not be resolved: {message}")]
    CredentialResolution { credential: String, message: String },

    /// The external invocation returned non-zero or could not be started
    #[error("`{command}` failed: {message}")]
    StepExecution {
        command: String,
        exit_code: Option<i32>,
        message: String,
    },

    /// A step or run deadline elapsed
    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
}

impl StepError {
    /// Short machine-friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::UndefinedVariable { .. } => "undefined_variable",
            StepError::CredentialResolution { .. } => "credential_resolution",
            StepError::StepExecution { .. } => "step_execution",
            StepError::Timeout { .. } => "timeout",
        }
    }

    pub fn undefined(name: impl Into<String>) -> Self {
        StepError::UndefinedVariable { name: name.into() }
    }
}
