//! Step 2: one-paragraph Estonian summaries of individual speeches.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{debug, info, instrument, warn};

use super::{preview, process_in_batches, StepContext};
use crate::adapters::GenerationOptions;
use crate::domain::{Speech, StepReport};
use crate::store::speeches;
use crate::text::extract_tag;

pub const STEP_NAME: &str = "speech_summaries";

/// Word the model is asked to start with; replaced by the speaker's name
const SPEAKER_PLACEHOLDER: &str = "Sõnavõtja";

const GENERATION: GenerationOptions = GenerationOptions::new(8000, 0.3);

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSummaryOptions {
    pub overwrite: bool,
    pub limit: Option<usize>,
    /// Passes over the remaining speeches before giving up
    pub max_passes: usize,
    pub pass_delay: Duration,
}

impl Default for SpeechSummaryOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            limit: None,
            max_passes: 10,
            pass_delay: Duration::from_secs(2),
        }
    }
}

pub fn speech_prompt(text: &str) -> String {
    format!(
        "Please write a short summary of the following speech, one sentence or paragraph max, \
         in Estonian language, speak like native estonian, start with \"Sõnavõtja\".\n\n\
         Speech text:\n{}\n\n\
         Provide the summary in Estonian, starting with \"Sõnavõtja\", wrapped in <summary></summary> tags.\n\n\
         Format:\n<summary>Sõnavõtja ...</summary>",
        text
    )
}

/// Extract the summary and put the speaker's name in front
pub fn parse_summary(response: &str, speaker: &str, speech_id: i64) -> String {
    let summary = extract_tag(response, "summary").unwrap_or_else(|| {
        warn!(speech_id, "No <summary> tags found in response, using full response");
        response.trim().to_string()
    });

    match summary.strip_prefix(SPEAKER_PLACEHOLDER) {
        Some(rest) => format!("{}{}", speaker, rest),
        None => summary,
    }
}

#[instrument(skip(ctx, options), fields(dry_run = ctx.dry_run, batch_size = ctx.batch_size))]
pub async fn run(ctx: &StepContext, options: &SpeechSummaryOptions) -> Result<StepReport> {
    let mut report = StepReport::new(STEP_NAME, ctx.dry_run);
    let selected = ctx
        .db
        .with_conn(|conn| speeches::speeches_needing_summary(conn, options.overwrite, options.limit))?;
    report.selected = selected.len();

    if selected.is_empty() {
        info!("No speeches need summaries");
        return Ok(report);
    }
    info!(count = selected.len(), "Summarizing speeches");

    let done: Mutex<HashSet<i64>> = Mutex::new(HashSet::new());
    let mut remaining = selected;
    let max_passes = if ctx.dry_run { 1 } else { options.max_passes.max(1) };

    for pass in 1..=max_passes {
        debug!(pass, remaining = remaining.len(), "Speech summary pass");

        let outcome = process_in_batches(remaining.clone(), ctx.batch_size, STEP_NAME, |speech| {
            let done = &done;
            async move {
                let id = speech.id;
                summarize_speech(ctx, speech).await?;
                done.lock()
                    .map_err(|_| anyhow!("summary bookkeeping lock poisoned"))?
                    .insert(id);
                Ok(())
            }
        })
        .await;
        info!(pass, succeeded = outcome.succeeded, failed = outcome.failed, "Pass finished");

        let finished = done
            .lock()
            .map_err(|_| anyhow!("summary bookkeeping lock poisoned"))?
            .clone();
        remaining.retain(|speech| !finished.contains(&speech.id));

        if remaining.is_empty() || pass == max_passes {
            break;
        }
        info!(remaining = remaining.len(), delay = ?options.pass_delay, "Retrying remaining speeches");
        tokio::time::sleep(options.pass_delay).await;
    }

    report.succeeded = report.selected - remaining.len();
    report.failed = remaining.len();
    if !remaining.is_empty() {
        warn!(remaining = remaining.len(), "Speeches left without a summary");
    }
    Ok(report)
}

async fn summarize_speech(ctx: &StepContext, speech: Speech) -> Result<()> {
    let prompt = speech_prompt(&speech.text);
    let response = ctx.adapter.generate(&prompt, GENERATION).await?;
    let summary = parse_summary(&response, &speech.speaker, speech.id);

    if ctx.dry_run {
        debug!(speech_id = speech.id, summary = %preview(&summary, 80), "Would save speech summary");
        return Ok(());
    }

    ctx.db
        .with_conn(|conn| speeches::save_speech_summary(conn, speech.id, &summary))?;
    debug!(speech_id = speech.id, speaker = %preview(&speech.speaker, 30), "Saved speech summary");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::adapters::ProviderKind;
    use crate::steps::testing::ScriptedAdapter;
    use crate::store::{fixtures, Database};

    fn seeded() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let ids = db
            .with_conn(|conn| {
                let when = fixtures::at(2024, 3, 4, 10, 0, 0);
                let session = fixtures::session(conn, 1, when);
                let agenda = fixtures::agenda(conn, "a-1", session, when);
                let complete = fixtures::speech(conn, agenda, None, when, "Austatud juhataja!");
                fixtures::speech(conn, agenda, None, when, "Stenogramm on koostamisel");
                Ok((agenda, complete))
            })
            .unwrap();
        (db, ids.0, ids.1)
    }

    fn options() -> SpeechSummaryOptions {
        SpeechSummaryOptions {
            pass_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_summary_replaces_placeholder() {
        assert_eq!(
            parse_summary("<summary>Sõnavõtja rääkis eelarvest.</summary>", "Mari Maasikas", 1),
            "Mari Maasikas rääkis eelarvest."
        );
        assert_eq!(
            parse_summary("<summary>Sõnavõtja, kes rääkis</summary>", "Jaan", 1),
            "Jaan, kes rääkis"
        );
        assert_eq!(parse_summary("  Kõne eelarvest  ", "Jaan", 1), "Kõne eelarvest");
    }

    #[test]
    fn test_prompt_contains_text() {
        let prompt = speech_prompt("Head kolleegid");
        assert!(prompt.contains("Speech text:\nHead kolleegid\n"));
        assert!(prompt.ends_with("<summary>Sõnavõtja ...</summary>"));
    }

    #[tokio::test]
    async fn test_run_saves_summaries_for_complete_speeches() {
        let (db, _, speech_id) = seeded();
        let adapter = Arc::new(ScriptedAdapter::new(|_| {
            Ok("<summary>Sõnavõtja tervitas juhatajat.</summary>".to_string())
        }));
        let ctx = StepContext::new(db.clone(), adapter.clone(), ProviderKind::Gemini, 10, false);

        let report = run(&ctx, &options()).await.unwrap();
        assert_eq!((report.selected, report.succeeded, report.failed), (1, 1, 0));
        assert_eq!(adapter.prompts().len(), 1);

        let speech = db
            .with_conn(|conn| speeches::get_speech(conn, speech_id))
            .unwrap()
            .unwrap();
        assert_eq!(speech.ai_summary.as_deref(), Some("Kõneleja tervitas juhatajat."));
        assert!(speech.ai_summary_generated_at.is_some());

        // nothing left to do on a second run
        let again = run(&ctx, &options()).await.unwrap();
        assert_eq!(again.selected, 0);
    }

    #[tokio::test]
    async fn test_run_retries_failed_speeches_in_later_passes() {
        let (db, _, _) = seeded();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let adapter = Arc::new(ScriptedAdapter::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("rate limited")
            }
            Ok("<summary>Sõnavõtja rääkis.</summary>".to_string())
        }));
        let ctx = StepContext::new(db, adapter, ProviderKind::Claude, 10, false);

        let report = run(&ctx, &options()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!((report.succeeded, report.failed), (1, 0));
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_passes() {
        let (db, _, _) = seeded();
        let adapter = Arc::new(ScriptedAdapter::new(|_| anyhow::bail!("provider down")));
        let ctx = StepContext::new(db, adapter.clone(), ProviderKind::Openai, 10, false);

        let report = run(
            &ctx,
            &SpeechSummaryOptions {
                max_passes: 3,
                ..options()
            },
        )
        .await
        .unwrap();
        assert_eq!(adapter.prompts().len(), 3);
        assert_eq!((report.succeeded, report.failed), (0, 1));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let (db, _, speech_id) = seeded();
        let ctx = StepContext::dry_run(db.clone(), ProviderKind::Gemini, 10);

        let report = run(&ctx, &options()).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.succeeded, 1);

        let speech = db
            .with_conn(|conn| speeches::get_speech(conn, speech_id))
            .unwrap()
            .unwrap();
        assert!(speech.ai_summary.is_none());
    }
}
