//! Daily routine definition.
//!
//! The routine is a fixed, linear sequence of steps. Each step receives the
//! same [`RoutineOptions`] and is retried according to a [`RetryPolicy`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::ProviderKind;

pub const ROUTINE_NAME: &str = "daily_routine";

/// Errors raised while validating or starting a routine
#[derive(Debug, Error, PartialEq)]
pub enum RoutineError {
    #[error("Invalid date format: {0}. Use YYYY-MM-DD format.")]
    InvalidDate(String),

    #[error(
        "Start date ({start}) and end date ({end}) must be in the same year. \
         Please run separate parsing commands for each year."
    )]
    RangeAcrossYears { start: NaiveDate, end: NaiveDate },

    #[error("Batch size must be greater than 0")]
    InvalidBatchSize,

    #[error("Another routine is already running (lock held on {0})")]
    AlreadyRunning(String),
}

/// The nine routine steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineStep {
    Parse,
    SpeechSummaries,
    AgendaSummaries,
    TranslateAgendas,
    TranslateSessionTitles,
    TranslateSpeechSummaries,
    ProfilePoliticians,
    TranslateProfiles,
    SyncEverything,
}

impl RoutineStep {
    pub const ALL: [RoutineStep; 9] = [
        Self::Parse,
        Self::SpeechSummaries,
        Self::AgendaSummaries,
        Self::TranslateAgendas,
        Self::TranslateSessionTitles,
        Self::TranslateSpeechSummaries,
        Self::ProfilePoliticians,
        Self::TranslateProfiles,
        Self::SyncEverything,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::SpeechSummaries => "speech_summaries",
            Self::AgendaSummaries => "agenda_summaries",
            Self::TranslateAgendas => "translate_agendas",
            Self::TranslateSessionTitles => "translate_session_titles",
            Self::TranslateSpeechSummaries => "translate_speech_summaries",
            Self::ProfilePoliticians => "profile_politicians",
            Self::TranslateProfiles => "translate_profiles",
            Self::SyncEverything => "sync_everything",
        }
    }

    /// 1-based position in the routine
    pub fn number(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0) + 1
    }

    /// What the step does, for progress output
    pub fn description(&self) -> &'static str {
        match self {
            Self::Parse => "Speeches parsed",
            Self::SpeechSummaries => "Speech summaries generated",
            Self::AgendaSummaries => "Agenda summaries generated",
            Self::TranslateAgendas => "Agendas translated",
            Self::TranslateSessionTitles => "Plenary session titles translated",
            Self::TranslateSpeechSummaries => "Speech summaries translated",
            Self::ProfilePoliticians => "Politicians profiled",
            Self::TranslateProfiles => "Politician profiles translated",
            Self::SyncEverything => "All data synced",
        }
    }
}

impl fmt::Display for RoutineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutineStep {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown routine step: {}", s))
    }
}

/// Shared configuration passed to every step
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineOptions {
    /// First day parsed; the end of the range is today
    pub start_date: NaiveDate,
    /// Items processed concurrently per batch
    pub batch_size: usize,
    pub provider: ProviderKind,
    pub dry_run: bool,
    pub skip_parse: bool,
    pub verbose: bool,
}

impl Default for RoutineOptions {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            batch_size: 1000,
            provider: ProviderKind::default(),
            dry_run: false,
            skip_parse: false,
            verbose: false,
        }
    }
}

/// January 1 of the current year
pub fn default_start_date() -> NaiveDate {
    let year = Utc::now().year();
    NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(value: &str) -> Result<NaiveDate, RoutineError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| RoutineError::InvalidDate(value.to_string()))
}

impl RoutineOptions {
    pub fn validate(&self) -> Result<(), RoutineError> {
        if self.batch_size == 0 {
            return Err(RoutineError::InvalidBatchSize);
        }
        Ok(())
    }

    /// Human-readable options, recorded in the run log
    pub fn describe(&self) -> String {
        let mut line = format!(
            "start_date={}, batch_size={}, provider={}",
            self.start_date, self.batch_size, self.provider
        );
        if self.dry_run {
            line.push_str(", dry_run");
        }
        if self.skip_parse {
            line.push_str(", skip_parse");
        }
        line
    }
}

/// Retry policy for failed steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
