//! Parliament records as stored after ingestion.
//!
//! Row ids are SQLite rowids; `uuid` fields are the Riigikogu API identifiers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Marker the API puts in place of a stenogram that is still being prepared
pub const INCOMPLETE_MARKER: &str = "stenogramm on koostamisel";

/// Normalized text stored for incomplete speeches
pub const INCOMPLETE_TEXT: &str = "Stenogramm on koostamisel";

/// Event type kept from verbatim records
pub const SPEECH_EVENT: &str = "SPEECH";

/// A member of parliament
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Politician {
    pub id: i64,
    pub uuid: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub active: bool,
    pub email: String,
    pub phone: String,
    pub gender: String,
    pub date_of_birth: Option<NaiveDate>,
    /// Years in parliament, one decimal
    pub parliament_seniority: Option<f64>,
    pub total_time_seconds: Option<i64>,
    pub profiles_required: i64,
    pub profiles_already_profiled: i64,
}

/// Fields written when a member is upserted from the API
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewPolitician {
    pub uuid: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub active: bool,
    pub email: String,
    pub phone: String,
    pub gender: String,
    pub date_of_birth: Option<NaiveDate>,
    pub parliament_seniority: Option<f64>,
}

/// Convert seniority in days to years rounded to one decimal
pub fn seniority_years(days: f64) -> f64 {
    (days / 365.25 * 10.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    pub id: i64,
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoliticianFaction {
    pub id: i64,
    pub politician_id: i64,
    pub faction_id: i64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// A plenary sitting, keyed by (membership, plenary_session, date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlenarySession {
    pub id: i64,
    pub membership: i64,
    pub plenary_session: i64,
    pub date: DateTime<Utc>,
    pub title: String,
    pub title_en: Option<String>,
    pub title_ru: Option<String>,
    pub edited: bool,
    pub is_incomplete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaItem {
    pub id: i64,
    pub uuid: String,
    pub session_id: i64,
    pub date: DateTime<Utc>,
    pub title: String,
    pub title_en: Option<String>,
    pub title_ru: Option<String>,
    pub total_time_seconds: Option<i64>,
    pub is_incomplete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speech {
    pub id: i64,
    /// Content-derived, see `text::speech_uuid`
    pub uuid: String,
    pub agenda_id: i64,
    pub politician_id: Option<i64>,
    pub event_type: String,
    pub date: DateTime<Utc>,
    pub speaker: String,
    pub text: String,
    pub link: String,
    pub ai_summary: Option<String>,
    pub ai_summary_en: Option<String>,
    pub ai_summary_ru: Option<String>,
    pub is_incomplete: bool,
    pub ai_summary_generated_at: Option<DateTime<Utc>>,
    pub parsed_at: DateTime<Utc>,
}

/// Fields written when a speech is first stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewSpeech {
    pub uuid: String,
    pub agenda_id: i64,
    pub politician_id: Option<i64>,
    pub date: DateTime<Utc>,
    pub speaker: String,
    pub text: String,
    pub link: String,
    pub is_incomplete: bool,
}

/// True when the text is the "stenogram in preparation" placeholder
pub fn is_incomplete_text(text: &str) -> bool {
    text.to_lowercase().contains(INCOMPLETE_MARKER)
}
