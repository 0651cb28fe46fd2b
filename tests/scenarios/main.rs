//! Scenario-based tests for stagehand

mod helpers;

mod credential_scope;
mod deploy_flow;
mod failure_handling;
mod stage_order;
mod timeouts;
mod variable_substitution;
