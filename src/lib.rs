//! stagehand - a declarative build, push and deploy pipeline runner

pub mod cli;
pub mod core;
pub mod credentials;
pub mod execution;
pub mod invoke;
pub mod persistence;

// Re-export commonly used types
pub use core::{
    EnvironmentContext, ExecutionResult, PipelineDefinition, RunReport, Stage, Step, StepError,
};
pub use credentials::{CredentialProvider, StaticCredentialProvider};
pub use execution::{ExecutionEngine, ExecutionEvent};
pub use invoke::{CommandInvoker, Invocation, InvocationOutput, SystemInvoker};
