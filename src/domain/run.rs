//! Run state and reconstruction from events.
//!
//! A Run is a single execution of the daily routine (or of one step invoked
//! on its own).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType, StepStatus};
use super::report::StepReport;

/// A routine execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Name of the routine being executed
    pub routine_name: String,

    /// Options the run was started with (human-readable)
    pub options: String,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run completed (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of steps finished (completed or skipped)
    pub current_step: usize,

    /// Reports of completed steps
    pub reports: HashMap<String, StepReport>,

    /// Status of each step (step_name -> status)
    pub step_statuses: HashMap<String, StepStatus>,

    /// Step names in the order they were first seen
    pub step_order: Vec<String>,
}

impl Run {
    /// Create a new run
    pub fn new(id: Uuid, routine_name: String, options: String) -> Self {
        Self {
            id,
            routine_name,
            options,
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            current_step: 0,
            reports: HashMap::new(),
            step_statuses: HashMap::new(),
            step_order: Vec::new(),
        }
    }

    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self::new(first_event.run_id, String::new(), String::new());
        run.started_at = first_event.timestamp;

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Record a step status, remembering its position
    pub fn set_step_status(&mut self, step_id: &str, status: StepStatus) {
        if !self.step_statuses.contains_key(step_id) {
            self.step_order.push(step_id.to_string());
        }
        self.step_statuses.insert(step_id.to_string(), status);
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
                // "Routine 'daily_routine' started: {options}"
                if let Some((head, options)) = event.payload_summary.split_once(" started: ") {
                    self.routine_name = head
                        .trim_start_matches("Routine ")
                        .trim_matches('\'')
                        .to_string();
                    self.options = options.to_string();
                }
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::StepStarted | EventType::StepRetrying => {
                if let Some(ref step_id) = event.step_id {
                    self.set_step_status(step_id, StepStatus::Running);
                }
            }
            EventType::StepCompleted => {
                if let Some(ref step_id) = event.step_id {
                    self.set_step_status(step_id, StepStatus::Completed);
                    if let Some(ref report) = event.report {
                        self.reports.insert(step_id.clone(), report.clone());
                    }
                    self.current_step += 1;
                }
            }
            EventType::StepSkipped => {
                if let Some(ref step_id) = event.step_id {
                    self.set_step_status(step_id, StepStatus::Skipped);
                    self.current_step += 1;
                }
            }
            EventType::StepFailed => {
                if let Some(ref step_id) = event.step_id {
                    self.set_step_status(step_id, StepStatus::Failed);
                }
            }
        }
    }

    pub fn step_status(&self, step_name: &str) -> Option<StepStatus> {
        self.step_statuses.get(step_name).copied()
    }
}

/// State of a routine run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Stopped at a failed step
    Failed { error: String },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}
