//! Pipeline execution engine

pub mod dispatcher;
pub mod engine;
pub mod executor;

pub use dispatcher::{HookRunner, OutcomeDispatcher};
pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{StepOutput, StepRunner};
