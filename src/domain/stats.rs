//! Bookkeeping records: aggregate statistics and ingestion errors.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named statistic with its Estonian, English and Russian labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsEntry {
    pub name: String,
    pub name_en: String,
    pub name_ru: String,
    pub value: i64,
    pub percentage: Option<f64>,
}

impl StatisticsEntry {
    pub fn count(name: &str, name_en: &str, name_ru: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            name_en: name_en.to_string(),
            name_ru: name_ru.to_string(),
            value,
            percentage: None,
        }
    }

    /// Count with a share of `total`
    pub fn share(name: &str, name_en: &str, name_ru: &str, value: i64, total: i64) -> Self {
        Self {
            percentage: Some(percentage(value, total)),
            ..Self::count(name, name_en, name_ru, value)
        }
    }
}

/// `value / total * 100` rounded to one decimal, 0 when total is 0
pub fn percentage(value: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (value as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Category of a logged ingestion problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseErrorType {
    ApiConnection,
    DataParsing,
    MissingData,
    MissingStenogram,
    Validation,
    Database,
    PhotoDownload,
    Other,
}

impl ParseErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiConnection => "API_CONNECTION",
            Self::DataParsing => "DATA_PARSING",
            Self::MissingData => "MISSING_DATA",
            Self::MissingStenogram => "MISSING_STENOGRAM",
            Self::Validation => "VALIDATION",
            Self::Database => "DATABASE",
            Self::PhotoDownload => "PHOTO_DOWNLOAD",
            Self::Other => "OTHER",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "API_CONNECTION" => Self::ApiConnection,
            "DATA_PARSING" => Self::DataParsing,
            "MISSING_DATA" => Self::MissingData,
            "MISSING_STENOGRAM" => Self::MissingStenogram,
            "VALIDATION" => Self::Validation,
            "DATABASE" => Self::Database,
            "PHOTO_DOWNLOAD" => Self::PhotoDownload,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for ParseErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParliamentParseError {
    pub id: i64,
    pub error_type: ParseErrorType,
    pub message: String,
    pub details: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub year: i32,
    pub created_at: DateTime<Utc>,
}

/// A parse error about to be logged
#[derive(Debug, Clone, PartialEq)]
pub struct NewParseError {
    pub error_type: ParseErrorType,
    pub message: String,
    pub details: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub year: i32,
}

impl NewParseError {
    pub fn new(error_type: ParseErrorType, message: impl Into<String>, year: i32) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: None,
            entity_type: None,
            entity_id: None,
            entity_name: None,
            year,
        }
    }

    pub fn with_entity(
        mut self,
        entity_type: &str,
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.into());
        self.entity_name = Some(entity_name.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
