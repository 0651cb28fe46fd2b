//! Subprocess invoker - runs collaborators as child processes

use crate::invoke::{CommandInvoker, Invocation, InvocationOutput, InvokeError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Invoker that spawns real processes
///
/// The child inherits the runner's environment minus the invocation's hidden
/// variables, with the invocation's variables layered on top. It is killed if the returned future is
/// dropped, which is how step and run timeouts stop it.
#[derive(Debug, Clone, Default)]
pub struct SystemInvoker;

impl SystemInvoker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandInvoker for SystemInvoker {
    async fn invoke(&self, invocation: &Invocation) -> Result<InvocationOutput, InvokeError> {
        debug!(
            "Spawning {} with {} args and {} env vars",
            invocation.program,
            invocation.args.len(),
            invocation.env.len()
        );

        let mut command = Command::new(&invocation.program);
        for name in &invocation.hidden_env {
            command.env_remove(name);
        }
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let output = command.output().await.map_err(|e| InvokeError::Spawn {
            program: invocation.program.clone(),
            message: e.to_string(),
        })?;

        let exit_code = output.status.code();
        if exit_code.is_none() {
            warn!("{} was terminated by a signal", invocation.program);
        }

        let result = InvocationOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            "{} exited with {:?} ({} bytes of output)",
            invocation.program,
            exit_code,
            result.stdout.len()
        );

        Ok(result)
    }
}
