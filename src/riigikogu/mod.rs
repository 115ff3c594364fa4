//! Riigikogu open data API: members and plenary transcripts.

pub mod client;
pub mod types;

pub use client::RiigikoguClient;
pub use types::{ApiError, Member, MemberFaction, Verbatim, VerbatimAgendaItem, VerbatimEvent};
