//! Dry-run adapter: canned replies, no provider calls.
//!
//! The reply is chosen from the kind of prompt, so every parser downstream
//! sees a well-formed response.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{AiAdapter, GenerationOptions, ProviderKind};

pub const MOCK_SPEECH_SUMMARY: &str = "<summary>Sõnavõtja rääkis teemal ja tegi ettepaneku</summary>";

/// What a prompt asks for, judged from its fixed wording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    SpeechSummary,
    AgendaSummary,
    PeriodProfile,
    ProfileAggregation,
    TranslationBoth,
    TranslationEnglish,
    TranslationRussian,
    Unknown,
}

impl PromptKind {
    pub fn detect(prompt: &str) -> Self {
        if prompt.contains("REQUIRED RESPONSE FORMAT") {
            Self::AgendaSummary
        } else if prompt.contains("MONTHLY PROFILES:") {
            Self::ProfileAggregation
        } else if prompt.contains("<profiles>") {
            Self::PeriodProfile
        } else if prompt.contains("Speech text:") {
            Self::SpeechSummary
        } else if prompt.contains("<en>") && prompt.contains("<ru>") {
            Self::TranslationBoth
        } else if prompt.contains("Estonian text to English") {
            Self::TranslationEnglish
        } else if prompt.contains("Estonian text to Russian") {
            Self::TranslationRussian
        } else {
            Self::Unknown
        }
    }
}

fn agenda_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"<agenda id="([^"]*)">"#).expect("valid agenda id regex"))
}

fn pid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"pid="([^"]+)""#).expect("valid pid regex"))
}

fn profile_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"<profile type="([A-Z_]+)">"#).expect("valid profile type regex"))
}

/// Adapter returning deterministic mock responses
#[derive(Debug, Default)]
pub struct DryRunAdapter {
    provider: ProviderKind,
    requests: AtomicUsize,
}

impl DryRunAdapter {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            requests: AtomicUsize::new(0),
        }
    }

    /// Provider the run would have used
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Prompts answered so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// The canned reply for a prompt
    pub fn respond(prompt: &str) -> String {
        match PromptKind::detect(prompt) {
            PromptKind::SpeechSummary => MOCK_SPEECH_SUMMARY.to_string(),
            PromptKind::AgendaSummary => mock_agenda(prompt),
            PromptKind::PeriodProfile => mock_profiles(prompt),
            PromptKind::ProfileAggregation => {
                "<analysis>Mock koondanalüüs kõigi kuude profiilide põhjal</analysis>".to_string()
            }
            PromptKind::TranslationBoth => {
                let source = source_text(prompt);
                format!("<en>[EN] {}</en>\n<ru>[RU] {}</ru>", source, source)
            }
            PromptKind::TranslationEnglish => format!("[EN] {}", source_text(prompt)),
            PromptKind::TranslationRussian => format!("[RU] {}", source_text(prompt)),
            PromptKind::Unknown => "Mock vastus".to_string(),
        }
    }
}

fn mock_agenda(prompt: &str) -> String {
    // tokens come from the input document, not the response template
    let input = prompt.split("CRITICAL REQUIREMENTS").next().unwrap_or(prompt);
    let agenda = agenda_id_pattern()
        .captures(input)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let politician = pid_pattern()
        .captures(input)
        .map(|c| c[1].to_string())
        .unwrap_or_default();

    format!(
        "<agenda id=\"{agenda}\">\n\
         <summary>Mock kokkuvõte päevakorrapunktist - arutati erinevaid küsimusi ja tehti ettepanekuid.</summary>\n\
         <decisions>\n\
         <decision pid=\"{politician}\">Mock otsus - otsustati jätkata arutelu järgmisel istungil</decision>\n\
         </decisions>\n\
         <activity pid=\"{politician}\">Mock aktiivseim kõneleja - oli väga aktiivne ja esindas vasakpoolseid seisukohti</activity>\n\
         </agenda>"
    )
}

fn mock_profiles(prompt: &str) -> String {
    let mut seen = Vec::new();
    for caps in profile_type_pattern().captures_iter(prompt) {
        let category = caps[1].to_string();
        if !seen.contains(&category) {
            seen.push(category);
        }
    }

    let mut out = String::from("<profiles>\n");
    for category in seen {
        out.push_str(&format!(
            "<profile type=\"{}\">Mock analüüs kategoorias {}</profile>\n",
            category, category
        ));
    }
    out.push_str("</profiles>");
    out
}

/// The Estonian text at the end of a translation prompt
fn source_text(prompt: &str) -> &str {
    let tail = match prompt.rfind("Estonian text:\n") {
        Some(pos) => &prompt[pos + "Estonian text:\n".len()..],
        None => prompt.rsplit_once("\n\n").map(|(_, t)| t).unwrap_or(prompt),
    };
    tail.trim()
}

#[async_trait]
impl AiAdapter for DryRunAdapter {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn generate(&self, prompt: &str, _options: GenerationOptions) -> Result<String> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let kind = PromptKind::detect(prompt);
        debug!(provider = %self.provider, ?kind, "Dry run: returning mock response");
        Ok(Self::respond(prompt))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
