//! Steps 4, 5, 6 and 8: English and Russian translations of Estonian text.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use tracing::{debug, info, instrument, warn};

use super::{preview, process_in_batches, StepContext};
use crate::adapters::GenerationOptions;
use crate::domain::StepReport;
use crate::store::translations::{self, TranslationField, TranslationItem};
use crate::text::extract_tag;

const GENERATION: GenerationOptions = GenerationOptions::new(8000, 0.3);

/// Languages to produce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetLanguage {
    En,
    Ru,
    #[default]
    Both,
}

impl TargetLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ru => "ru",
            Self::Both => "both",
        }
    }

    pub fn wants_en(&self) -> bool {
        matches!(self, Self::En | Self::Both)
    }

    pub fn wants_ru(&self) -> bool {
        matches!(self, Self::Ru | Self::Both)
    }
}

impl fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetLanguage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" => Ok(Self::En),
            "ru" => Ok(Self::Ru),
            "both" => Ok(Self::Both),
            other => bail!("Unknown target language: {} (expected en, ru or both)", other),
        }
    }
}

/// Which agenda texts to translate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AgendaScope {
    Titles,
    Summaries,
    Decisions,
    ActivePoliticians,
    #[default]
    All,
}

impl AgendaScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Titles => "titles",
            Self::Summaries => "summaries",
            Self::Decisions => "decisions",
            Self::ActivePoliticians => "active_politicians",
            Self::All => "all",
        }
    }

    pub fn fields(&self) -> Vec<TranslationField> {
        match self {
            Self::Titles => vec![TranslationField::AgendaTitle],
            Self::Summaries => vec![TranslationField::AgendaSummaryText],
            Self::Decisions => vec![TranslationField::DecisionText],
            Self::ActivePoliticians => vec![TranslationField::ActivityDescription],
            Self::All => vec![
                TranslationField::AgendaTitle,
                TranslationField::AgendaSummaryText,
                TranslationField::DecisionText,
                TranslationField::ActivityDescription,
            ],
        }
    }
}

impl FromStr for AgendaScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "titles" => Ok(Self::Titles),
            "summaries" => Ok(Self::Summaries),
            "decisions" => Ok(Self::Decisions),
            "active_politicians" => Ok(Self::ActivePoliticians),
            "all" => Ok(Self::All),
            other => bail!("Unknown agenda scope: {}", other),
        }
    }
}

/// What a translation run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateTarget {
    Agendas(AgendaScope),
    SessionTitles,
    SpeechSummaries,
    Profiles,
}

impl TranslateTarget {
    /// Step name used in reports and the run log
    pub fn step_name(&self) -> &'static str {
        match self {
            Self::Agendas(_) => "translate_agendas",
            Self::SessionTitles => "translate_session_titles",
            Self::SpeechSummaries => "translate_speech_summaries",
            Self::Profiles => "translate_profiles",
        }
    }

    pub fn fields(&self) -> Vec<TranslationField> {
        match self {
            Self::Agendas(scope) => scope.fields(),
            Self::SessionTitles => vec![TranslationField::SessionTitle],
            Self::SpeechSummaries => vec![TranslationField::SpeechSummary],
            Self::Profiles => vec![TranslationField::ProfileAnalysis],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslateOptions {
    pub target_language: TargetLanguage,
    pub overwrite: bool,
    pub limit: Option<usize>,
}

pub fn combined_prompt(text: &str) -> String {
    format!(
        "Translate the following Estonian text to English and Russian like you are a native speaker of each language. \
         Do not summarize, translate everything.\n\n\
         Provide the translations in this exact format:\n\
         <en>English translation here</en>\n\
         <ru>Russian translation here</ru>\n\n\
         Estonian text:\n{}",
        text
    )
}

pub fn single_prompt(text: &str, language: &str) -> String {
    format!(
        "Translate the following Estonian text to {language} like you are a native {language} speaker. \
         Do not summarize, translate everything. Provide only the translation, no explanations:\n\n{text}"
    )
}

/// `<en>` and `<ru>` contents of a combined reply
pub fn parse_combined(response: &str) -> (Option<String>, Option<String>) {
    (extract_tag(response, "en"), extract_tag(response, "ru"))
}

#[instrument(skip(ctx, options), fields(step = target.step_name(), dry_run = ctx.dry_run))]
pub async fn run(ctx: &StepContext, target: TranslateTarget, options: &TranslateOptions) -> Result<StepReport> {
    let mut report = StepReport::new(target.step_name(), ctx.dry_run);
    let language = options.target_language;

    for field in target.fields() {
        let items = ctx.db.with_conn(|conn| {
            translations::pending(
                conn,
                field,
                language.wants_en(),
                language.wants_ru(),
                options.overwrite,
                options.limit,
            )
        })?;
        report.selected += items.len();
        report.count(&field.name().replace(' ', "_"), items.len());

        if items.is_empty() {
            debug!(%field, "Nothing to translate");
            continue;
        }
        info!(%field, count = items.len(), %language, "Translating");

        if ctx.dry_run {
            for item in &items {
                debug!(
                    %field,
                    id = item.id,
                    en = item.needs_en,
                    ru = item.needs_ru,
                    text = %preview(&item.source, 60),
                    "Would translate"
                );
            }
            report.succeeded += items.len();
            continue;
        }

        let outcome = process_in_batches(items, ctx.batch_size, target.step_name(), |item| {
            translate_item(ctx, field, language, item)
        })
        .await;
        report.succeeded += outcome.succeeded;
        report.failed += outcome.failed;
    }

    info!(summary = %report.summary(), "Translation finished");
    Ok(report)
}

async fn translate_item(
    ctx: &StepContext,
    field: TranslationField,
    language: TargetLanguage,
    item: TranslationItem,
) -> Result<()> {
    let (en, ru) = if language == TargetLanguage::Both && ctx.provider.uses_combined_translation() {
        let response = ctx
            .adapter
            .generate(&combined_prompt(&item.source), GENERATION)
            .await?;
        let (en, ru) = parse_combined(&response);
        if en.is_none() || ru.is_none() {
            warn!(%field, id = item.id, "Combined translation reply is missing a language");
        }
        (en.filter(|_| item.needs_en), ru.filter(|_| item.needs_ru))
    } else {
        let en = if item.needs_en {
            Some(translate_single(ctx, &item.source, "English").await?)
        } else {
            None
        };
        let ru = if item.needs_ru {
            Some(translate_single(ctx, &item.source, "Russian").await?)
        } else {
            None
        };
        (en, ru)
    };

    let en = en.filter(|t| !t.is_empty());
    let ru = ru.filter(|t| !t.is_empty());
    if en.is_none() && ru.is_none() {
        bail!("No translation returned for {} {}", field, item.id);
    }

    ctx.db
        .with_conn(|conn| translations::save(conn, field, item.id, en.as_deref(), ru.as_deref()))?;
    debug!(%field, id = item.id, en = en.is_some(), ru = ru.is_some(), "Saved translation");
    Ok(())
}

async fn translate_single(ctx: &StepContext, text: &str, language: &str) -> Result<String> {
    let response = ctx
        .adapter
        .generate(&single_prompt(text, language), GENERATION)
        .await?;
    Ok(response.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::adapters::{DryRunAdapter, ProviderKind};
    use crate::steps::testing::ScriptedAdapter;
    use crate::store::{fixtures, sessions, Database};

    fn seeded() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let session = db
            .with_conn(|conn| Ok(fixtures::session(conn, 4, fixtures::at(2024, 4, 2, 10, 0, 0))))
            .unwrap();
        (db, session)
    }

    #[test]
    fn test_prompts() {
        let combined = combined_prompt("Tere");
        assert!(combined.contains("to English and Russian"));
        assert!(combined.ends_with("Estonian text:\nTere"));

        let russian = single_prompt("Tere", "Russian");
        assert!(russian.starts_with(
            "Translate the following Estonian text to Russian like you are a native Russian speaker."
        ));
        assert!(russian.ends_with("no explanations:\n\nTere"));
    }

    #[test]
    fn test_parse_combined() {
        let (en, ru) = parse_combined("<en>\nPlenary sitting\n</en>\n<ru>Пленарное заседание</ru>");
        assert_eq!(en.as_deref(), Some("Plenary sitting"));
        assert_eq!(ru.as_deref(), Some("Пленарное заседание"));
        assert_eq!(parse_combined("nothing"), (None, None));
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("RU".parse::<TargetLanguage>().unwrap(), TargetLanguage::Ru);
        assert!("de".parse::<TargetLanguage>().is_err());
        assert_eq!(
            "active-politicians".parse::<AgendaScope>().unwrap(),
            AgendaScope::ActivePoliticians
        );
        assert_eq!(TranslateTarget::Agendas(AgendaScope::All).fields().len(), 4);
        assert_eq!(TranslateTarget::Profiles.step_name(), "translate_profiles");
    }

    #[tokio::test]
    async fn test_combined_translation_saves_both() {
        let (db, session) = seeded();
        let ctx = StepContext::new(
            db.clone(),
            Arc::new(DryRunAdapter::new(ProviderKind::Gemini)),
            ProviderKind::Gemini,
            5,
            false,
        );

        let report = run(&ctx, TranslateTarget::SessionTitles, &TranslateOptions::default())
            .await
            .unwrap();
        assert_eq!((report.selected, report.succeeded), (1, 1));

        let saved = db.with_conn(|conn| sessions::get_session(conn, session)).unwrap().unwrap();
        assert_eq!(saved.title_en.as_deref(), Some("[EN] Täiskogu istung"));
        assert_eq!(saved.title_ru.as_deref(), Some("[RU] Täiskogu istung"));
    }

    #[tokio::test]
    async fn test_ollama_translates_each_language_separately() {
        let (db, session) = seeded();
        db.with_conn(|conn| {
            translations::save(conn, TranslationField::SessionTitle, session, Some("Sitting"), None)
        })
        .unwrap();

        let adapter = Arc::new(ScriptedAdapter::new(|prompt| {
            assert!(!prompt.contains("<en>"));
            Ok("  Пленарное заседание \n".to_string())
        }));
        let ctx = StepContext::new(db.clone(), adapter.clone(), ProviderKind::Ollama, 5, false);

        run(&ctx, TranslateTarget::SessionTitles, &TranslateOptions::default())
            .await
            .unwrap();

        // English already existed, so only Russian was requested
        let prompts = adapter.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("to Russian"));

        let saved = db.with_conn(|conn| sessions::get_session(conn, session)).unwrap().unwrap();
        assert_eq!(saved.title_en.as_deref(), Some("Sitting"));
        assert_eq!(saved.title_ru.as_deref(), Some("Пленарное заседание"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_fails_item() {
        let (db, _) = seeded();
        let adapter = Arc::new(ScriptedAdapter::new(|_| Ok("I cannot help".to_string())));
        let ctx = StepContext::new(db, adapter, ProviderKind::Openai, 5, false);

        let report = run(&ctx, TranslateTarget::SessionTitles, &TranslateOptions::default())
            .await
            .unwrap();
        assert_eq!((report.succeeded, report.failed), (0, 1));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let (db, session) = seeded();
        let ctx = StepContext::dry_run(db.clone(), ProviderKind::Gemini, 5);

        let report = run(&ctx, TranslateTarget::SessionTitles, &TranslateOptions::default())
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        let saved = db.with_conn(|conn| sessions::get_session(conn, session)).unwrap().unwrap();
        assert!(saved.title_en.is_none());
    }
}
