//! Core domain models for pipelines
//!
//! This module defines the pipeline tree (stages, steps, hooks), the scoped
//! environment steps run in, run state and the YAML configuration that
//! produces a pipeline definition.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod step;

pub use context::{EnvironmentContext, EnvironmentResolver, ScopeKind};
pub use error::StepError;
pub use pipeline::*;
pub use state::*;
pub use step::*;
