//! Domain types for the Riigikogu pipeline.
//!
//! This module contains:
//! - Parliament records: politicians, sessions, agendas, speeches
//! - Enrichment records: agenda summaries, profile parts, statistics
//! - Events and Run: the routine's append-only log and derived state
//! - StepReport: per-step outcomes

pub mod events;
pub mod parliament;
pub mod profile;
pub mod report;
pub mod run;
pub mod stats;
pub mod summary;

// Re-export commonly used types
pub use events::{Event, EventType, StepStatus};
pub use parliament::{
    AgendaItem, Faction, NewPolitician, NewSpeech, PlenarySession, Politician, PoliticianFaction,
    Speech,
};
pub use profile::{PoliticianProfilePart, ProfileCategory, ProfilePartDraft, ProfilePeriod};
pub use report::StepReport;
pub use run::{Run, RunState};
pub use stats::{NewParseError, ParliamentParseError, ParseErrorType, StatisticsEntry};
pub use summary::{AgendaActivePolitician, AgendaDecision, AgendaSummary, AgendaSummaryDraft};
