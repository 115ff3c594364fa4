//! Politician profile parts: one analysis per (politician, category, period).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Aspect of a politician a profile part describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileCategory {
    PoliticalPosition,
    TopicExpertise,
    RhetoricalStyle,
    ActivityPatterns,
    OppositionStance,
    CollaborationStyle,
    RegionalFocus,
    EconomicViews,
    SocialIssues,
    LegislativeFocus,
}

impl ProfileCategory {
    pub const ALL: [ProfileCategory; 10] = [
        Self::PoliticalPosition,
        Self::TopicExpertise,
        Self::RhetoricalStyle,
        Self::ActivityPatterns,
        Self::OppositionStance,
        Self::CollaborationStyle,
        Self::RegionalFocus,
        Self::EconomicViews,
        Self::SocialIssues,
        Self::LegislativeFocus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PoliticalPosition => "POLITICAL_POSITION",
            Self::TopicExpertise => "TOPIC_EXPERTISE",
            Self::RhetoricalStyle => "RHETORICAL_STYLE",
            Self::ActivityPatterns => "ACTIVITY_PATTERNS",
            Self::OppositionStance => "OPPOSITION_STANCE",
            Self::CollaborationStyle => "COLLABORATION_STYLE",
            Self::RegionalFocus => "REGIONAL_FOCUS",
            Self::EconomicViews => "ECONOMIC_VIEWS",
            Self::SocialIssues => "SOCIAL_ISSUES",
            Self::LegislativeFocus => "LEGISLATIVE_FOCUS",
        }
    }

    /// Lowercase words, e.g. "rhetorical style"
    pub fn label(&self) -> String {
        self.as_str().to_lowercase().replace('_', " ")
    }

    /// Guidance block included in profiling prompts
    pub fn definition(&self) -> &'static str {
        match self {
            Self::PoliticalPosition => "### POLITICAL_POSITION
* Identify the most salient issues.
* State direction and strength of stance (support/oppose, strong/moderate).
* Mention shifts compared to earlier periods.
* Note if framing is policy-driven, value-driven, or performance-driven.",
            Self::TopicExpertise => "### TOPIC_EXPERTISE
* Highlight topics where the speaker shows knowledge and authority.
* Mention use of data, technical terms, or statistics.
* Call out consistent explanations or reliance on expertise.",
            Self::RhetoricalStyle => "### RHETORICAL_STYLE
* Describe overall tone (conciliatory, combative, optimistic, urgent).
* Point out the balance between emotional and logical appeals.
* Mention formality, complexity, and use of storytelling vs data.",
            Self::ActivityPatterns => "### ACTIVITY_PATTERNS
* Summarize frequency and rhythm of speeches or public appearances.
* Include references to events, meetings, or travel mentioned.
* Highlight recurring communication patterns (e.g., weekly updates).",
            Self::OppositionStance => "### OPPOSITION_STANCE
* Identify main opponents or groups criticized.
* Clarify if critiques are policy-based, procedural, or personal.
* Note the intensity of attacks and whether compromise was ruled out.",
            Self::CollaborationStyle => "### COLLABORATION_STYLE
* Mention cooperation with colleagues, co-sponsorships, or coalitions.
* Describe openness to compromise or mediation.
* Highlight references to bipartisan or cross-party collaboration.",
            Self::RegionalFocus => "### REGIONAL_FOCUS
* Point out attention to local/district vs national vs international issues.
* Mention specific regional industries, projects, or communities.",
            Self::EconomicViews => "### ECONOMIC_VIEWS
* Summarize positions on taxes, spending, regulation, trade, and labor.
* Note attitudes toward redistribution, growth, or fiscal discipline.
* Mention affinity toward business interests vs labor concerns.",
            Self::SocialIssues => "### SOCIAL_ISSUES
* State positions on abortion, LGBTQ+, immigration, guns, education, policing.
* Clarify balance between civil liberties and security.
* Mention religious or moral framing when used.",
            Self::LegislativeFocus => "### LEGISLATIVE_FOCUS
* Identify legislative priorities (topics of bills, amendments, hearings).
* Describe whether the speaker is an initiator, supporter, or opponent.
* Note claimed progress or achievements.",
        }
    }
}

impl fmt::Display for ProfileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| anyhow::anyhow!("Unknown profile category: {}", s))
    }
}

/// Time span a profile part covers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfilePeriod {
    Agenda(i64),
    PlenarySession(i64),
    /// "MM.YYYY"
    Month(String),
    Year(i32),
    All,
}

impl ProfilePeriod {
    pub fn period_type(&self) -> &'static str {
        match self {
            Self::Agenda(_) => "AGENDA",
            Self::PlenarySession(_) => "PLENARY_SESSION",
            Self::Month(_) => "MONTH",
            Self::Year(_) => "YEAR",
            Self::All => "ALL",
        }
    }

    /// Stable storage key, unique per period
    pub fn key(&self) -> String {
        match self {
            Self::Agenda(id) => format!("AGENDA:{}", id),
            Self::PlenarySession(id) => format!("PLENARY_SESSION:{}", id),
            Self::Month(month) => format!("MONTH:{}", month),
            Self::Year(year) => format!("YEAR:{}", year),
            Self::All => "ALL".to_string(),
        }
    }

    pub fn from_key(key: &str) -> anyhow::Result<Self> {
        if key == "ALL" {
            return Ok(Self::All);
        }
        let (kind, value) = key
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid period key: {}", key))?;
        let period = match kind {
            "AGENDA" => Self::Agenda(value.parse()?),
            "PLENARY_SESSION" => Self::PlenarySession(value.parse()?),
            "MONTH" => Self::Month(value.to_string()),
            "YEAR" => Self::Year(value.parse()?),
            other => anyhow::bail!("Invalid period type: {}", other),
        };
        Ok(period)
    }

    /// Month key for a date, "MM.YYYY"
    pub fn month_of(date: NaiveDate) -> String {
        date.format("%m.%Y").to_string()
    }
}

impl fmt::Display for ProfilePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agenda(id) => write!(f, "agenda {}", id),
            Self::PlenarySession(id) => write!(f, "session {}", id),
            Self::Month(month) => write!(f, "month {}", month),
            Self::Year(year) => write!(f, "year {}", year),
            Self::All => f.write_str("all periods"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoliticianProfilePart {
    pub id: i64,
    pub politician_id: i64,
    pub category: ProfileCategory,
    pub period: ProfilePeriod,
    pub analysis: String,
    pub analysis_en: Option<String>,
    pub analysis_ru: Option<String>,
    pub metrics: serde_json::Value,
    pub speeches_analyzed: i64,
    pub date_range_start: Option<NaiveDate>,
    pub date_range_end: Option<NaiveDate>,
    pub is_incomplete: bool,
    pub ai_summary_generated_at: DateTime<Utc>,
}

/// Values written by a profile upsert
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilePartDraft {
    pub analysis: String,
    pub metrics: serde_json::Value,
    pub speeches_analyzed: i64,
    pub date_range_start: Option<NaiveDate>,
    pub date_range_end: Option<NaiveDate>,
    pub is_incomplete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip_names() {
        for category in ProfileCategory::ALL {
            assert_eq!(category.as_str().parse::<ProfileCategory>().unwrap(), category);
        }
        assert!("HOBBIES".parse::<ProfileCategory>().is_err());
    }

    #[test]
    fn test_category_serde_uses_screaming_case() {
        let json = serde_json::to_string(&ProfileCategory::RhetoricalStyle).unwrap();
        assert_eq!(json, "\"RHETORICAL_STYLE\"");
    }

    #[test]
    fn test_period_keys() {
        let periods = vec![
            ProfilePeriod::Agenda(12),
            ProfilePeriod::PlenarySession(3),
            ProfilePeriod::Month("01.2024".to_string()),
            ProfilePeriod::Year(2024),
            ProfilePeriod::All,
        ];
        for period in periods {
            assert_eq!(ProfilePeriod::from_key(&period.key()).unwrap(), period);
        }
        assert!(ProfilePeriod::from_key("WEEK:1").is_err());
    }

    #[test]
    fn test_month_of() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(ProfilePeriod::month_of(date), "03.2024");
    }
}
