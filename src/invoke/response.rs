//! Invocation result types

use thiserror::Error;

/// Error types for invocations that never produced an exit code
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to start `{program}`: {message}")]
    Spawn { program: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// What a finished collaborator reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationOutput {
    /// Exit code, `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl InvocationOutput {
    /// A zero exit with the given stdout
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A non-zero exit with the given stderr
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}
