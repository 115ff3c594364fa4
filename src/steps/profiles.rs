//! Step 7: structured politician profiles.
//!
//! Profiling runs in two phases per politician:
//!
//! 1. Every agenda, plenary session, month and year the politician spoke in
//!    gets one part per category, generated from that period's speeches.
//!    Only missing or stale categories are requested, and the pass repeats
//!    until nothing is missing (bounded by [`VALIDATION_ATTEMPTS`]).
//! 2. The all-time part of each category is synthesized from the monthly
//!    parts of that category.
//!
//! Politicians run concurrently, bounded by `max_workers`; the periods of a
//! single politician run in batches of the context's batch size.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::Datelike;
use futures::stream::{self, StreamExt};
use regex::Regex;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use super::{process_in_batches, sync, StepContext};
use crate::adapters::GenerationOptions;
use crate::domain::{
    Politician, PoliticianProfilePart, ProfileCategory, ProfilePartDraft, ProfilePeriod, StepReport,
};
use crate::store::speeches::{self, SpeechRef};
use crate::store::{politicians, profiles, sessions};
use crate::text::{escape_xml, extract_tag, unescape_xml};

pub const STEP_NAME: &str = "profile_politicians";

/// Passes over the periods before a politician is given up on
pub const VALIDATION_ATTEMPTS: usize = 3;

const PERIOD_GENERATION: GenerationOptions = GenerationOptions::new(65535, 0.3);
const AGGREGATION_GENERATION: GenerationOptions = GenerationOptions::new(2000, 0.3);

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileOptions {
    /// Profile only this politician
    pub politician_id: Option<i64>,
    pub start_from_id: Option<i64>,
    pub limit: Option<usize>,
    pub max_workers: usize,
    pub overwrite: bool,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            politician_id: None,
            start_from_id: None,
            limit: None,
            max_workers: 5,
            overwrite: false,
        }
    }
}

/// Counts gathered while profiling one politician
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PoliticianOutcome {
    parts_saved: usize,
    aggregates_saved: usize,
    parts_missing: usize,
}

fn profile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)<profile\s+type="([^"]+)">(.*?)</profile>"#).expect("valid profile regex")
    })
}

/// Group a politician's speeches by every non-ALL period they fall in
pub fn collect_periods(speeches: &[SpeechRef]) -> BTreeMap<ProfilePeriod, Vec<&SpeechRef>> {
    let mut periods: BTreeMap<ProfilePeriod, Vec<&SpeechRef>> = BTreeMap::new();
    for speech in speeches {
        let date = speech.date.date_naive();
        for period in [
            ProfilePeriod::Agenda(speech.agenda_id),
            ProfilePeriod::PlenarySession(speech.session_id),
            ProfilePeriod::Month(ProfilePeriod::month_of(date)),
            ProfilePeriod::Year(date.year()),
        ] {
            periods.entry(period).or_default().push(speech);
        }
    }
    periods
}

fn period_is_incomplete(speeches: &[&SpeechRef]) -> bool {
    speeches.iter().any(|s| s.is_incomplete)
}

/// Categories to (re)generate for one period
///
/// A category is missing when it has no part yet, when speeches were parsed
/// after the part was generated and the period is now complete, or when the
/// part's incompleteness no longer matches the period.
pub fn missing_categories(
    conn: &Connection,
    politician_id: i64,
    period: &ProfilePeriod,
    speeches: &[&SpeechRef],
    overwrite: bool,
) -> Result<Vec<ProfileCategory>> {
    if overwrite {
        return Ok(ProfileCategory::ALL.to_vec());
    }

    let incomplete = period_is_incomplete(speeches);
    let mut missing = Vec::new();
    for category in ProfileCategory::ALL {
        let stale = match profiles::get_part(conn, politician_id, category, period)? {
            None => true,
            Some(part) => {
                let newer = speeches.iter().any(|s| s.parsed_at > part.ai_summary_generated_at);
                (newer && !incomplete) || part.is_incomplete != incomplete
            }
        };
        if stale {
            missing.push(category);
        }
    }
    Ok(missing)
}

/// Human description of a period for the prompt header
pub fn period_description(conn: &Connection, period: &ProfilePeriod) -> Result<String> {
    let description = match period {
        ProfilePeriod::Agenda(id) => sessions::get_agenda(conn, *id)?
            .map(|agenda| agenda.title)
            .unwrap_or_else(|| format!("Agenda {}", id)),
        ProfilePeriod::PlenarySession(id) => sessions::get_session(conn, *id)?
            .map(|session| session.title)
            .unwrap_or_else(|| format!("Plenary session {}", id)),
        ProfilePeriod::Month(month) => format!("Month {}", month),
        ProfilePeriod::Year(year) => format!("Year {}", year),
        ProfilePeriod::All => "All periods".to_string(),
    };
    Ok(description)
}

/// The period's complete speeches as an XML document
pub fn speeches_xml(speeches: &[&SpeechRef]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<speeches>\n");
    for speech in speeches {
        if speech.is_incomplete || speech.text.trim().is_empty() {
            continue;
        }
        xml.push_str(&format!(
            "  <speech date=\"{}\">{}</speech>\n",
            speech.date.format("%Y-%m-%d"),
            escape_xml(&speech.text)
        ));
    }
    xml.push_str("</speeches>");
    xml
}

pub fn period_prompt(period: &ProfilePeriod, description: &str, xml: &str, categories: &[ProfileCategory]) -> String {
    let names = categories.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ");
    let definitions = categories.iter().map(|c| c.definition()).collect::<Vec<_>>().join("\n\n");
    let format_lines = categories
        .iter()
        .map(|c| format!("<profile type=\"{}\">Analysis for {}</profile>", c.as_str(), c.label()))
        .collect::<Vec<_>>()
        .join("\n");
    let n = categories.len();

    format!(
        "Analyze the following speeches to create politician profile parts for a specific time period. \
         Write in Estonian language, speak like native Estonian.\n\n\
         PERIOD: {period_type} - {description}\n\n\
         {xml}\n\n\
         You are analyzing speeches from a specific time period.\n\
         Your task is to produce structured **summaries** for ONLY the following {n} categories: {names}\n\n\
         **IMPORTANT: Generate profiles ONLY for the {n} categories listed above. Do not generate any other profile types.**\n\n\
         For each profile type:\n\
         * Write **1–4 sentences**, if there is not enough information, write \"Not enough data\" in Estonian, don't guess or overthink.\n\
         * Summaries must be **concise, evidence-based, and neutral**.\n\
         * Every claim must be **grounded in the speeches** (no speculation).\n\
         * When mentioning an issue, include **who/what was emphasized, the stance taken, and intensity of support or opposition**.\n\n\
         ## Profile Type Definitions\n\n\
         {definitions}\n\n\
         ## General Rules\n\
         * Be concise and neutral.\n\
         * Do not speculate beyond speech evidence.\n\
         * Focus on **issues, stances, tone, and patterns** that are explicitly present in the speeches.\n\
         * Generate profiles for EXACTLY {n} categories: {names}\n\n\
         Response format:\n\
         <profiles>\n\
         {format_lines}\n\
         </profiles>\n\n\
         Each profile description should be in Estonian language, like you are a native Estonian speaker, analytical and specific.",
        period_type = period.period_type(),
    )
}

/// `(category, analysis)` for every well-formed `<profile>` in the response
pub fn parse_profiles(response: &str) -> Vec<(ProfileCategory, String)> {
    profile_pattern()
        .captures_iter(response)
        .filter_map(|caps| match caps[1].parse::<ProfileCategory>() {
            Ok(category) => Some((category, unescape_xml(&caps[2]).trim().to_string())),
            Err(_) => {
                warn!(profile_type = &caps[1], "Ignoring unknown profile type in response");
                None
            }
        })
        .collect()
}

/// Metrics stored alongside a period part
pub fn period_metrics(category: ProfileCategory, speeches: &[&SpeechRef]) -> Value {
    let mut metrics = json!({
        "speeches_count": speeches.len(),
        "date_range_start": speeches.first().map(|s| s.date.date_naive().to_string()),
        "date_range_end": speeches.last().map(|s| s.date.date_naive().to_string()),
    });

    match category {
        ProfileCategory::ActivityPatterns => {
            let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
            for speech in speeches {
                *distribution.entry(speech.date.format("%Y-%m").to_string()).or_default() += 1;
            }
            metrics["monthly_distribution"] = json!(distribution);
        }
        ProfileCategory::RhetoricalStyle if !speeches.is_empty() => {
            let lengths: Vec<usize> = speeches.iter().map(|s| s.text.chars().count()).collect();
            let total: usize = lengths.iter().sum();
            metrics["avg_speech_length"] = json!(total as f64 / lengths.len() as f64);
            metrics["min_speech_length"] = json!(lengths.iter().min());
            metrics["max_speech_length"] = json!(lengths.iter().max());
        }
        _ => {}
    }
    metrics
}

pub fn aggregation_prompt(category: ProfileCategory, monthly: &[PoliticianProfilePart]) -> String {
    let monthly_text: String = monthly
        .iter()
        .map(|part| {
            let month = match &part.period {
                ProfilePeriod::Month(month) => month.clone(),
                other => other.to_string(),
            };
            format!("\n**{}:** {}\n", month, part.analysis)
        })
        .collect();

    format!(
        "Analyze the following monthly profile summaries for a politician and create a comprehensive ALL-period profile. \
         Write in Estonian language, speak like native Estonian.\n\n\
         CATEGORY: {category}\n\n\
         MONTHLY PROFILES:\n{monthly_text}\n\n\
         Your task is to create a comprehensive {category} profile that synthesizes insights from all monthly periods.\n\n\
         **IMPORTANT INSTRUCTIONS:**\n\
         * Write **1–4 sentences** that capture the overall patterns and trends across all months\n\
         * Identify recurring themes, evolution over time, and key characteristics\n\
         * Be **concise, evidence-based, and neutral**\n\
         * Focus on **overall patterns** rather than repeating monthly details\n\
         * If there's insufficient data across months, write \"Not enough data\" in Estonian\n\n\
         ## Profile Type Definition\n\n\
         {definition}\n\n\
         ## General Rules\n\
         * Synthesize insights from all monthly periods\n\
         * Identify patterns, trends, and evolution over time\n\
         * Be concise and analytical\n\
         * Focus on overall characteristics rather than monthly specifics\n\n\
         Response format:\n\
         <analysis>\n\
         Your comprehensive analysis here\n\
         </analysis>\n\n\
         The analysis should be in Estonian language, analytical and specific, capturing the overall {label} patterns across all time periods.",
        category = category.as_str(),
        definition = category.definition(),
        label = category.label(),
    )
}

/// The all-time draft built from a category's monthly parts
pub fn aggregate_draft(analysis: String, monthly: &[PoliticianProfilePart]) -> ProfilePartDraft {
    let speeches_analyzed: i64 = monthly.iter().map(|p| p.speeches_analyzed).sum();
    let date_range_start = monthly.iter().filter_map(|p| p.date_range_start).min();
    let date_range_end = monthly.iter().filter_map(|p| p.date_range_end).max();

    ProfilePartDraft {
        analysis,
        metrics: json!({
            "speeches_count": speeches_analyzed,
            "monthly_profiles_aggregated": monthly.len(),
            "date_range_start": date_range_start.map(|d| d.to_string()),
            "date_range_end": date_range_end.map(|d| d.to_string()),
        }),
        speeches_analyzed,
        date_range_start,
        date_range_end,
        is_incomplete: monthly.iter().any(|p| p.is_incomplete),
    }
}

#[instrument(skip(ctx, options), fields(dry_run = ctx.dry_run, max_workers = options.max_workers))]
pub async fn run(ctx: &StepContext, options: &ProfileOptions) -> Result<StepReport> {
    let mut report = StepReport::new(STEP_NAME, ctx.dry_run);

    let selected: Vec<Politician> = ctx.db.with_conn(|conn| match options.politician_id {
        Some(id) => Ok(politicians::politicians_with_speeches(conn, Some(id), Some(1), false)?
            .into_iter()
            .filter(|p| p.id == id)
            .collect()),
        None => politicians::politicians_with_speeches(conn, options.start_from_id, options.limit, false),
    })?;
    report.selected = selected.len();

    if selected.is_empty() {
        info!("No politicians with speeches to profile");
        return Ok(report);
    }
    info!(count = selected.len(), "Profiling politicians");

    let results: Vec<(i64, Result<PoliticianOutcome>)> = stream::iter(selected)
        .map(|politician| async move {
            let id = politician.id;
            (id, profile_politician(ctx, &politician, options.overwrite).await)
        })
        .buffer_unordered(options.max_workers.max(1))
        .collect()
        .await;

    let mut processed = Vec::with_capacity(results.len());
    for (politician_id, result) in results {
        processed.push(politician_id);
        match result {
            Ok(outcome) => {
                report.succeeded += 1;
                report.count("parts_saved", outcome.parts_saved);
                report.count("aggregates_saved", outcome.aggregates_saved);
                if ctx.dry_run {
                    report.count("parts_missing", outcome.parts_missing);
                }
            }
            Err(e) => {
                error!(politician_id, error = %format!("{:#}", e), "Profiling failed");
                report.failed += 1;
            }
        }
    }
    processed.sort_unstable();

    let dry_run = ctx.dry_run;
    ctx.db
        .with_conn(|conn| sync::sync_profiling_counts(conn, &processed, dry_run))
        .context("Failed to sync profiling counts")?;

    if report.succeeded == 0 && report.failed > 0 {
        anyhow::bail!("Profiling failed for all {} politicians", report.failed);
    }
    info!(summary = %report.summary(), "Profiling finished");
    Ok(report)
}

async fn profile_politician(ctx: &StepContext, politician: &Politician, overwrite: bool) -> Result<PoliticianOutcome> {
    let politician_id = politician.id;
    let speeches = ctx
        .db
        .with_conn(|conn| speeches::speeches_for_politician(conn, politician_id))?;
    let periods = collect_periods(&speeches);
    debug!(politician_id, name = %politician.full_name, periods = periods.len(), "Profiling politician");

    if ctx.dry_run {
        let parts_missing = ctx.db.with_conn(|conn| {
            let mut missing = 0;
            for (period, period_speeches) in &periods {
                missing += missing_categories(conn, politician_id, period, period_speeches, overwrite)?.len();
            }
            for category in ProfileCategory::ALL {
                if overwrite || profiles::get_part(conn, politician_id, category, &ProfilePeriod::All)?.is_none() {
                    missing += 1;
                }
            }
            Ok(missing)
        })?;
        info!(politician_id, parts_missing, "Dry run: would generate profile parts");
        return Ok(PoliticianOutcome {
            parts_missing,
            ..Default::default()
        });
    }

    let parts_saved = run_period_phase(ctx, politician_id, &periods, overwrite).await?;
    let aggregates_saved = run_aggregation_phase(ctx, politician_id, overwrite).await?;
    info!(politician_id, parts_saved, aggregates_saved, "Politician profiled");

    Ok(PoliticianOutcome {
        parts_saved,
        aggregates_saved,
        parts_missing: 0,
    })
}

type PendingPeriod<'a> = (&'a ProfilePeriod, &'a [&'a SpeechRef], Vec<ProfileCategory>);

fn pending_periods<'a>(
    ctx: &StepContext,
    politician_id: i64,
    periods: &'a BTreeMap<ProfilePeriod, Vec<&'a SpeechRef>>,
    overwrite: bool,
) -> Result<Vec<PendingPeriod<'a>>> {
    ctx.db.with_conn(|conn| {
        let mut pending = Vec::new();
        for (period, period_speeches) in periods {
            let missing = missing_categories(conn, politician_id, period, period_speeches, overwrite)?;
            if !missing.is_empty() {
                pending.push((period, period_speeches.as_slice(), missing));
            }
        }
        Ok(pending)
    })
}

/// Phase 1; returns the number of parts saved
async fn run_period_phase(
    ctx: &StepContext,
    politician_id: i64,
    periods: &BTreeMap<ProfilePeriod, Vec<&SpeechRef>>,
    overwrite: bool,
) -> Result<usize> {
    let saved = AtomicUsize::new(0);

    for attempt in 1..=VALIDATION_ATTEMPTS {
        // overwrite only forces the first pass; later passes fill gaps
        let pending = pending_periods(ctx, politician_id, periods, overwrite && attempt == 1)?;
        if pending.is_empty() {
            return Ok(saved.into_inner());
        }
        if attempt > 1 {
            warn!(politician_id, attempt, periods = pending.len(), "Periods still missing profiles, retrying");
        }

        let outcome = process_in_batches(pending, ctx.batch_size, "profile periods", |(period, speeches, categories)| {
            let saved = &saved;
            async move {
                let count = generate_period_parts(ctx, politician_id, period, speeches, &categories).await?;
                saved.fetch_add(count, Ordering::Relaxed);
                Ok(())
            }
        })
        .await;
        debug!(politician_id, attempt, succeeded = outcome.succeeded, failed = outcome.failed, "Period pass finished");
    }

    let still_missing = pending_periods(ctx, politician_id, periods, false)?;
    if !still_missing.is_empty() {
        anyhow::bail!(
            "{} periods still missing profiles after {} attempts",
            still_missing.len(),
            VALIDATION_ATTEMPTS
        );
    }
    Ok(saved.into_inner())
}

async fn generate_period_parts(
    ctx: &StepContext,
    politician_id: i64,
    period: &ProfilePeriod,
    speeches: &[&SpeechRef],
    categories: &[ProfileCategory],
) -> Result<usize> {
    let description = ctx.db.with_conn(|conn| period_description(conn, period))?;
    let prompt = period_prompt(period, &description, &speeches_xml(speeches), categories);
    let response = ctx
        .adapter
        .generate(&prompt, PERIOD_GENERATION)
        .await
        .with_context(|| format!("Profile request failed for {}", period))?;

    let parsed: Vec<(ProfileCategory, String)> = parse_profiles(&response)
        .into_iter()
        .filter(|(category, _)| categories.contains(category))
        .collect();
    if parsed.is_empty() {
        anyhow::bail!("No requested profiles in response for {}", period);
    }

    let is_incomplete = period_is_incomplete(speeches);
    let date_range_start = speeches.first().map(|s| s.date.date_naive());
    let date_range_end = speeches.last().map(|s| s.date.date_naive());

    let saved = ctx.db.transaction(|tx| {
        for (category, analysis) in &parsed {
            let draft = ProfilePartDraft {
                analysis: analysis.clone(),
                metrics: period_metrics(*category, speeches),
                speeches_analyzed: speeches.len() as i64,
                date_range_start,
                date_range_end,
                is_incomplete,
            };
            profiles::upsert_part(tx, politician_id, *category, period, &draft)?;
        }
        Ok(parsed.len())
    })?;

    if saved < categories.len() {
        warn!(politician_id, %period, saved, requested = categories.len(), "Response covered only some categories");
    }
    debug!(politician_id, %period, saved, "Saved period profiles");
    Ok(saved)
}

/// Phase 2; returns the number of all-time parts saved
async fn run_aggregation_phase(ctx: &StepContext, politician_id: i64, overwrite: bool) -> Result<usize> {
    let pending = ctx.db.with_conn(|conn| {
        let mut pending = Vec::new();
        for category in ProfileCategory::ALL {
            let monthly = profiles::monthly_parts(conn, politician_id, category)?;
            if monthly.is_empty() {
                warn!(politician_id, %category, "No monthly profiles to aggregate");
                continue;
            }
            let needed = overwrite
                || match profiles::get_part(conn, politician_id, category, &ProfilePeriod::All)? {
                    None => true,
                    Some(all) => monthly
                        .iter()
                        .any(|part| part.ai_summary_generated_at > all.ai_summary_generated_at),
                };
            if needed {
                pending.push((category, monthly));
            }
        }
        Ok(pending)
    })?;

    let requested = pending.len();
    let outcome = process_in_batches(pending, ctx.batch_size, "profile aggregation", |(category, monthly)| async move {
        aggregate_category(ctx, politician_id, category, &monthly).await
    })
    .await;

    if outcome.failed > 0 {
        anyhow::bail!("{} of {} categories failed to aggregate", outcome.failed, requested);
    }
    Ok(outcome.succeeded)
}

async fn aggregate_category(
    ctx: &StepContext,
    politician_id: i64,
    category: ProfileCategory,
    monthly: &[PoliticianProfilePart],
) -> Result<()> {
    let prompt = aggregation_prompt(category, monthly);
    let response = ctx
        .adapter
        .generate(&prompt, AGGREGATION_GENERATION)
        .await
        .with_context(|| format!("Aggregation request failed for {}", category))?;
    let analysis = extract_tag(&response, "analysis").unwrap_or_else(|| response.trim().to_string());

    let draft = aggregate_draft(analysis, monthly);
    ctx.db
        .with_conn(|conn| profiles::upsert_part(conn, politician_id, category, &ProfilePeriod::All, &draft))?;
    debug!(politician_id, %category, months = monthly.len(), "Saved all-time profile");
    Ok(())
}
