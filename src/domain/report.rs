//! Reports produced by routine steps.
//!
//! A report is the outcome of a single step: how many items it looked at,
//! how many it handled and how many failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one routine step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Name of the step that produced this report
    pub step_name: String,

    /// Items selected for processing
    pub selected: usize,

    /// Items processed successfully
    pub succeeded: usize,

    /// Items that failed
    pub failed: usize,

    /// Whether nothing was written
    pub dry_run: bool,

    /// Free-form counters, e.g. ("speeches_created", 12)
    #[serde(default)]
    pub counters: Vec<(String, usize)>,

    /// When the report was created
    pub created_at: DateTime<Utc>,
}

impl StepReport {
    pub fn new(step_name: impl Into<String>, dry_run: bool) -> Self {
        Self {
            step_name: step_name.into(),
            selected: 0,
            succeeded: 0,
            failed: 0,
            dry_run,
            counters: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Add to a named counter
    pub fn count(&mut self, name: &str, amount: usize) {
        match self.counters.iter_mut().find(|(n, _)| n == name) {
            Some((_, value)) => *value += amount,
            None => self.counters.push((name.to_string(), amount)),
        }
    }

    pub fn counter(&self, name: &str) -> usize {
        self.counters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }

    /// One-line summary for event logs (no item content)
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}: selected {}, succeeded {}, failed {}",
            self.step_name, self.selected, self.succeeded, self.failed
        );
        for (name, value) in &self.counters {
            line.push_str(&format!(", {} {}", name, value));
        }
        if self.dry_run {
            line.push_str(" (dry run)");
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counters_accumulate() {
        let mut report = StepReport::new("parse", false);
        report.count("speeches_created", 3);
        report.count("speeches_created", 2);
        report.count("agendas_created", 1);

        assert_eq!(report.counter("speeches_created"), 5);
        assert_eq!(report.counter("agendas_created"), 1);
        assert_eq!(report.counter("missing"), 0);
    }

    #[test]
    fn test_report_summary() {
        let mut report = StepReport::new("speech_summaries", true);
        report.selected = 4;
        report.succeeded = 3;
        report.failed = 1;

        assert_eq!(
            report.summary(),
            "speech_summaries: selected 4, succeeded 3, failed 1 (dry run)"
        );
    }

    #[test]
    fn test_report_serialization() {
        let mut report = StepReport::new("sync_everything", false);
        report.count("stats", 25);

        let json = serde_json::to_string(&report).unwrap();
        let parsed: StepReport = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.step_name, "sync_everything");
        assert_eq!(parsed.counter("stats"), 25);
    }
}
