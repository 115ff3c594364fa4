//! Structured agenda summaries produced by the AI step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default decision text when nothing was decided
pub const NO_DECISIONS: &str = "Otsuseid ei tehtud";

/// Default activity text when no speaker stood out
pub const NO_ACTIVE_SPEAKER: &str = "Ei olnud eriti aktiivset kõnelejat";

/// One summary per agenda item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaSummary {
    pub id: i64,
    pub agenda_id: i64,
    pub summary_text: String,
    pub summary_text_en: Option<String>,
    pub summary_text_ru: Option<String>,
    /// Raw model reply with real ids substituted back in
    pub xml_response: String,
    pub is_incomplete: bool,
    pub ai_summary_generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaDecision {
    pub id: i64,
    pub agenda_id: i64,
    pub politician_id: Option<i64>,
    pub decision_text: String,
    pub decision_text_en: Option<String>,
    pub decision_text_ru: Option<String>,
    pub is_incomplete: bool,
    pub ai_summary_generated_at: DateTime<Utc>,
}

/// The most active speaker of an agenda item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaActivePolitician {
    pub id: i64,
    pub agenda_id: i64,
    pub politician_id: Option<i64>,
    pub activity_description: String,
    pub activity_description_en: Option<String>,
    pub activity_description_ru: Option<String>,
    pub is_incomplete: bool,
    pub ai_summary_generated_at: DateTime<Utc>,
}

/// Parsed reply for one agenda, ready to be saved
#[derive(Debug, Clone, PartialEq)]
pub struct AgendaSummaryDraft {
    pub summary_text: String,
    pub xml_response: String,
    pub decisions: Vec<(Option<i64>, String)>,
    pub activity: Option<(Option<i64>, String)>,
}
