//! Riigikogu API payloads.
//!
//! Every field is optional on the wire; dates stay as strings so that a bad
//! value can be logged against the record instead of failing the whole
//! response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Riigikogu client errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("API error {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// A member of the plenary, from `/api/plenary-members`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Member {
    pub uuid: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub active: Option<bool>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
    /// Days in parliament
    pub parliament_seniority: Option<f64>,
    pub factions: Vec<MemberFaction>,
}

impl Member {
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemberFaction {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// One plenary sitting transcript, from `/api/steno/verbatims`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Verbatim {
    pub uuid: Option<String>,
    pub membership: Option<i64>,
    pub plenary_session: Option<i64>,
    pub date: Option<String>,
    pub title: Option<String>,
    pub edited: Option<bool>,
    pub agenda_items: Vec<VerbatimAgendaItem>,
}

impl Verbatim {
    /// Identifier used in error logs
    pub fn identifier(&self) -> String {
        match self.uuid {
            Some(ref uuid) => uuid.clone(),
            None => format!(
                "{}-{}",
                self.membership.map(|m| m.to_string()).unwrap_or_else(|| "N/A".to_string()),
                self.plenary_session
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "N/A".to_string())
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerbatimAgendaItem {
    pub agenda_item_uuid: Option<String>,
    pub date: Option<String>,
    pub title: Option<String>,
    pub events: Vec<VerbatimEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerbatimEvent {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub date: Option<String>,
    pub speaker: Option<String>,
    pub text: Option<String>,
    pub link: Option<String>,
    pub uuid: Option<String>,
}
