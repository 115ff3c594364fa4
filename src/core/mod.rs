//! Core orchestration logic.
//!
//! This module contains:
//! - EventStore: Append-only event logging per run
//! - Pipeline: The daily routine steps, options and retry policy
//! - Orchestrator: Main execution engine

pub mod event_store;
pub mod orchestrator;
pub mod pipeline;

// Re-export commonly used types
pub use event_store::{generate_idempotency_key, hash_input, EventStore};
pub use orchestrator::{LiveSteps, Orchestrator, StepRunner};
pub use pipeline::{
    default_start_date, parse_date, RetryPolicy, RoutineError, RoutineOptions, RoutineStep, ROUTINE_NAME,
};
