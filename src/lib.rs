//! riigikogu - Estonian Parliament data pipeline
//!
//! Collects speeches, sessions and agendas from the Riigikogu API into a
//! SQLite store, then enriches them with AI-generated summaries,
//! translations and politician profiles.
//!
//! # Architecture
//!
//! The daily routine is a fixed sequence of nine steps run by the
//! [`Orchestrator`]. Every state change of a run is recorded as an
//! immutable event in `runs/<run-id>/events.jsonl`; the run state shown by
//! `status` and `runs` is derived by replaying those events.
//!
//! # Modules
//!
//! - `riigikogu`: HTTP client for the parliament API
//! - `store`: SQLite schema and queries
//! - `adapters`: AI provider integrations
//! - `steps`: The routine steps and maintenance commands
//! - `core`: Orchestration logic (EventStore, routine definition)
//! - `domain`: Data structures (Event, Run, StepReport, records)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the whole routine
//! riigikogu daily-routine --start-date 2024-01-01
//!
//! # Preview without AI calls or writes
//! riigikogu daily-routine --skip-parse --dry-run
//!
//! # Check run status
//! riigikogu status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod riigikogu;
pub mod steps;
pub mod store;
pub mod text;

// Re-export main types at crate root for convenience
pub use crate::core::{Orchestrator, RoutineOptions, RoutineStep};
pub use domain::{Event, EventType, Run, RunState, StepReport};
