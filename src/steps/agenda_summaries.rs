//! Step 3: structured agenda summaries with decisions and the most active speaker.
//!
//! Row ids never reach the provider: the agenda and its speakers are
//! replaced by per-run tokens, which are resolved again when the reply is
//! parsed.

use std::sync::OnceLock;

use anyhow::{bail, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use super::{process_in_batches, StepContext};
use crate::adapters::GenerationOptions;
use crate::domain::{AgendaItem, AgendaSummaryDraft, Speech, StepReport};
use crate::store::{speeches, summaries};
use crate::text::{escape_xml, extract_tag, IdObfuscator, TokenMap};

pub const STEP_NAME: &str = "agenda_summaries";

const GENERATION: GenerationOptions = GenerationOptions::new(8000, 0.3);

fn agenda_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)<agenda id="([^"]*)">(.*?)</agenda>"#).expect("valid agenda regex")
    })
}

fn decision_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)<decision pid="([^"]*)">(.*?)</decision>"#).expect("valid decision regex")
    })
}

fn activity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)<activity pid="([^"]*)">(.*?)</activity>"#).expect("valid activity regex")
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgendaSummaryOptions {
    pub overwrite: bool,
    pub limit: Option<usize>,
}

/// Input document for one agenda plus the tokens issued for it
pub struct AgendaDocument<'a> {
    pub xml: String,
    pub agenda_token: String,
    pub tokens: TokenMap<'a>,
}

/// Build the tokenized XML for an agenda from its complete speeches
pub fn build_document<'a>(
    obfuscator: &'a IdObfuscator,
    agenda_id: i64,
    speeches: &[Speech],
) -> AgendaDocument<'a> {
    let mut tokens = obfuscator.tokens();
    let agenda_token = tokens.register("agenda", agenda_id);

    let mut lines = vec![
        r#"<?xml version="1.0" encoding="UTF-8"?>"#.to_string(),
        format!(r#"<agenda id="{}">"#, agenda_token),
    ];
    for speech in speeches {
        if speech.text.trim().is_empty() || speech.is_incomplete {
            continue;
        }
        let pid = speech
            .politician_id
            .map(|id| tokens.register("politician", id))
            .unwrap_or_default();
        lines.push(format!(
            r#"  <speech pid="{}">{}</speech>"#,
            pid,
            escape_xml(&speech.text)
        ));
    }
    lines.push("</agenda>".to_string());

    AgendaDocument {
        xml: lines.join("\n"),
        agenda_token,
        tokens,
    }
}

pub fn agenda_prompt(xml: &str) -> String {
    format!(
        r#"Please write a detailed report of the following agenda in Estonian language, speak like native estonian. Provide response in the EXACT structured XML format shown below.

INPUT DATA:
{xml}

CRITICAL REQUIREMENTS:
1. ALL tags (summary, decisions, activity) MUST be INSIDE the <agenda> tag
2. You MUST include at least one <decision> tag (even if no decisions were made)
3. If no decisions were made, write: <decision pid="">Otsuseid ei tehtud</decision>
4. You MUST include an <activity> tag (even if no one was particularly active)
5. If no politician was particularly active, write: <activity pid="">Ei olnud eriti aktiivset kõnelejat</activity>
6. The response must be valid XML with proper nesting
7. Do NOT output <speech> tags - only output <agenda>, <summary>, <decisions>, <decision>, and <activity> tags

REQUIRED RESPONSE FORMAT (copy this structure EXACTLY):
<agenda id="{{agenda_id}}">
<summary>{{Write a detailed summary of the agenda in Estonian, couple paragraphs max}}</summary>
<decisions>
<decision pid="{{politician_id or empty string}}">{{Describe what decisions were made. If no decisions, write "Otsuseid ei tehtud" with empty pid}}</decision>
</decisions>
<activity pid="{{politician_id or empty string}}">{{Describe the most active speaker and their position (vasak, parem or muu). If no one was particularly active, write "Ei olnud eriti aktiivset kõnelejat" with empty pid}}</activity>
</agenda>

IMPORTANT: The closing </agenda> tag must come AFTER all other tags (summary, decisions, activity)."#
    )
}

fn resolve_pid(tokens: &TokenMap<'_>, pid: &str, agenda_id: i64) -> Option<i64> {
    if pid.is_empty() {
        return None;
    }
    let resolved = tokens.resolve("politician", pid);
    if resolved.is_none() {
        warn!(agenda_id, pid, "Unknown politician token in reply");
    }
    resolved
}

/// Parse a reply into a draft; fails when no `<agenda>` element is found
pub fn parse_response(
    response: &str,
    document: &AgendaDocument<'_>,
    agenda_id: i64,
) -> Result<AgendaSummaryDraft> {
    let Some(caps) = agenda_pattern().captures(response) else {
        bail!("Could not parse AI response for agenda {}", agenda_id);
    };
    let returned_token = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let content = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

    if returned_token != document.agenda_token {
        warn!(
            agenda_id,
            expected = %document.agenda_token,
            got = returned_token,
            "Agenda id mismatch in reply"
        );
    }

    let decisions = extract_tag(content, "decisions")
        .map(|section| {
            decision_pattern()
                .captures_iter(&section)
                .map(|c| {
                    (
                        resolve_pid(&document.tokens, &c[1], agenda_id),
                        c[2].trim().to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let activity = activity_pattern().captures(content).map(|c| {
        (
            resolve_pid(&document.tokens, &c[1], agenda_id),
            c[2].trim().to_string(),
        )
    });

    Ok(AgendaSummaryDraft {
        summary_text: extract_tag(content, "summary").unwrap_or_default(),
        xml_response: document.tokens.substitute(response),
        decisions,
        activity,
    })
}

#[instrument(skip(ctx, options), fields(dry_run = ctx.dry_run, batch_size = ctx.batch_size))]
pub async fn run(ctx: &StepContext, options: &AgendaSummaryOptions) -> Result<StepReport> {
    let mut report = StepReport::new(STEP_NAME, ctx.dry_run);
    let agendas = ctx
        .db
        .with_conn(|conn| summaries::agendas_needing_summary(conn, options.overwrite, options.limit))?;
    report.selected = agendas.len();

    if agendas.is_empty() {
        info!("No agendas need summaries");
        return Ok(report);
    }
    info!(count = agendas.len(), "Summarizing agendas");

    let obfuscator = IdObfuscator::new();
    let outcome = process_in_batches(agendas, ctx.batch_size, STEP_NAME, |agenda| {
        let obfuscator = &obfuscator;
        async move { summarize_agenda(ctx, obfuscator, agenda).await }
    })
    .await;

    report.succeeded = outcome.succeeded;
    report.failed = outcome.failed;
    info!(summary = %report.summary(), "Agenda summaries finished");
    Ok(report)
}

async fn summarize_agenda(ctx: &StepContext, obfuscator: &IdObfuscator, agenda: AgendaItem) -> Result<()> {
    let speeches = ctx
        .db
        .with_conn(|conn| speeches::complete_speeches_for_agenda(conn, agenda.id))?;
    if speeches.is_empty() {
        bail!("Agenda {} has no complete speeches", agenda.id);
    }

    let document = build_document(obfuscator, agenda.id, &speeches);
    let response = ctx.adapter.generate(&agenda_prompt(&document.xml), GENERATION).await?;
    debug!(agenda_id = agenda.id, chars = response.len(), "Received agenda reply");

    let draft = parse_response(&response, &document, agenda.id)?;

    if ctx.dry_run {
        debug!(
            agenda_id = agenda.id,
            decisions = draft.decisions.len(),
            activity = draft.activity.is_some(),
            "Would save agenda summary"
        );
        return Ok(());
    }

    ctx.db.transaction(|tx| {
        let is_incomplete = speeches::agenda_has_incomplete_speech(tx, agenda.id)?;
        let (decisions, activity) = summaries::save_agenda_summary(tx, agenda.id, &draft, is_incomplete)?;

        let mut missing = Vec::new();
        if decisions == 0 {
            missing.push("decisions");
        }
        if !activity {
            missing.push("active politician");
        }
        if !missing.is_empty() {
            bail!("No {} saved for agenda {}", missing.join(" and "), agenda.id);
        }
        Ok(())
    })?;

    debug!(agenda_id = agenda.id, "Saved agenda summary");
    Ok(())
}
