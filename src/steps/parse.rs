//! Step 1: fetch members and plenary transcripts and store them.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, instrument, warn};

use super::StepContext;
use crate::core::RoutineError;
use crate::domain::parliament::{is_incomplete_text, seniority_years, INCOMPLETE_TEXT, SPEECH_EVENT};
use crate::domain::{NewParseError, NewPolitician, NewSpeech, ParseErrorType, StepReport};
use crate::riigikogu::{Member, RiigikoguClient, Verbatim, VerbatimAgendaItem, VerbatimEvent};
use crate::store::politicians::{self, NameIndex};
use crate::store::{parse_errors, sessions, speeches};
use crate::text::{clean_html, speech_uuid};

pub const STEP_NAME: &str = "parse";

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOptions {
    pub start_date: Option<NaiveDate>,
    /// Defaults to today
    pub end_date: Option<NaiveDate>,
    /// Lookback when no start date is given
    pub days: i64,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            days: 30,
        }
    }
}

/// Resolve the date range to parse
///
/// Without a start date the lookback never crosses January 1 of the end
/// year. Start and end must fall in the same year.
pub fn resolve_range(
    options: &ParseOptions,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), RoutineError> {
    let end = options.end_date.unwrap_or(today);

    let start = match options.start_date {
        Some(start) => start,
        None => {
            let requested = end - Duration::days(options.days);
            let january_first = NaiveDate::from_ymd_opt(end.year(), 1, 1).unwrap_or(requested);
            if requested < january_first {
                warn!(
                    year = end.year(),
                    days = options.days,
                    requested = %requested,
                    "Lookback limited to January 1st"
                );
            }
            requested.max(january_first)
        }
    };

    if start.year() != end.year() {
        return Err(RoutineError::RangeAcrossYears { start, end });
    }
    Ok((start, end))
}

/// Parse an API timestamp; naive values are taken as UTC
pub fn parse_api_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parse an API date (a plain date or the date part of a timestamp)
pub fn parse_api_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()
        .or_else(|| parse_api_datetime(value).map(|dt| dt.date_naive()))
}

#[instrument(skip(ctx, client, options), fields(dry_run = ctx.dry_run))]
pub async fn run(
    ctx: &StepContext,
    client: &RiigikoguClient,
    options: &ParseOptions,
) -> Result<StepReport> {
    let (start, end) = resolve_range(options, Utc::now().date_naive())?;
    let year = start.year();
    let mut report = StepReport::new(STEP_NAME, ctx.dry_run);

    info!(%start, %end, year, "Parsing speeches");

    if !ctx.dry_run {
        ctx.db.with_conn(|conn| {
            let cleared = parse_errors::clear_year(conn, year)?;
            info!(cleared, year, "Cleared previous parse errors");

            // Speech uuids are content hashes, so a stenogram that has since
            // been completed would otherwise be stored twice
            let (deleted, agendas) = speeches::delete_incomplete_in_range(conn, start, end)?;
            for agenda_id in agendas {
                sessions::refresh_agenda_incomplete(conn, agenda_id)?;
            }
            if deleted > 0 {
                info!(deleted, "Deleted incomplete speeches");
            }
            report.count("incomplete_deleted", deleted);

            parse_errors::log_error(
                conn,
                &NewParseError::new(
                    ParseErrorType::Other,
                    format!("Parse run started for date range: {} to {}", start, end),
                    year,
                )
                .with_entity(
                    "parse_run",
                    format!("{}_to_{}", start, end),
                    format!("Parse Run {}", Utc::now().format("%Y-%m-%d %H:%M")),
                )
                .with_details(format!(
                    "Date range: {} to {}\nDays parameter: {}\nDry run: {}",
                    start, end, options.days, ctx.dry_run
                )),
            )
        })?;
    }

    parse_members(ctx, client, year, &mut report).await?;
    parse_verbatims(ctx, client, start, end, year, &mut report).await?;

    info!(summary = %report.summary(), "Parse finished");
    Ok(report)
}

async fn parse_members(
    ctx: &StepContext,
    client: &RiigikoguClient,
    year: i32,
    report: &mut StepReport,
) -> Result<()> {
    let members = match client.fetch_members().await {
        Ok(members) => members,
        Err(e) => {
            let message = format!("Failed to fetch politicians: {}", e);
            if !ctx.dry_run {
                ctx.db.with_conn(|conn| {
                    parse_errors::log_error(
                        conn,
                        &NewParseError::new(ParseErrorType::ApiConnection, &message, year)
                            .with_details(e.to_string()),
                    )
                })?;
            }
            return Err(e).context("Failed to fetch politicians");
        }
    };

    info!(count = members.len(), "Fetched politicians");
    report.count("members", members.len());
    if ctx.dry_run {
        return Ok(());
    }

    for member in &members {
        let saved = ctx.db.with_conn(|conn| save_member(conn, member, year))?;
        match saved {
            Some(true) => report.count("politicians_created", 1),
            Some(false) => report.count("politicians_updated", 1),
            None => report.count("members_skipped", 1),
        }
    }
    Ok(())
}

/// Upsert one member and their faction memberships
///
/// Returns Some(created), or None when the member was skipped.
pub fn save_member(conn: &Connection, member: &Member, year: i32) -> Result<Option<bool>> {
    let name = member.display_name().to_string();
    let uuid = match member.uuid.as_deref().map(str::trim) {
        Some(uuid) if !uuid.is_empty() => uuid.to_string(),
        _ => {
            warn!(name = %name, "Politician without UUID");
            parse_errors::log_error(
                conn,
                &NewParseError::new(ParseErrorType::MissingData, "Politician without UUID", year)
                    .with_entity("politician", "", &name)
                    .with_details(format!("{:?}", member)),
            )?;
            return Ok(None);
        }
    };

    let date_of_birth = match member.date_of_birth.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(raw) => match parse_api_date(raw) {
            Some(date) => Some(date),
            None => {
                warn!(name = %name, value = raw, "Failed to parse date of birth");
                parse_errors::log_error(
                    conn,
                    &NewParseError::new(
                        ParseErrorType::DataParsing,
                        format!("Failed to parse date of birth: {}", raw),
                        year,
                    )
                    .with_entity("politician", &uuid, &name),
                )?;
                None
            }
        },
        None => None,
    };

    let new = NewPolitician {
        uuid: uuid.clone(),
        first_name: member.first_name.clone().unwrap_or_default(),
        last_name: member.last_name.clone().unwrap_or_default(),
        full_name: member.full_name.clone().unwrap_or_default(),
        active: member.active.unwrap_or(true),
        email: member.email.clone().unwrap_or_default(),
        phone: member.phone.clone().unwrap_or_default(),
        gender: member.gender.clone().unwrap_or_default(),
        date_of_birth,
        parliament_seniority: member.parliament_seniority.map(seniority_years),
    };
    let (politician_id, created) = politicians::upsert_politician(conn, &new)?;

    for faction in &member.factions {
        let faction_uuid = match faction.uuid.as_deref() {
            Some(u) if !u.trim().is_empty() => u,
            _ => continue,
        };
        let faction_id = politicians::get_or_create_faction(
            conn,
            faction_uuid,
            faction.name.as_deref().unwrap_or_default(),
        )?;

        let start_date = optional_date(faction.start_date.as_deref(), "faction start date");
        let end_date = optional_date(faction.end_date.as_deref(), "faction end date");
        politicians::get_or_create_membership(conn, politician_id, faction_id, start_date, end_date)?;
    }

    debug!(name = %name, created, "Saved politician");
    Ok(Some(created))
}

fn optional_date(raw: Option<&str>, what: &str) -> Option<NaiveDate> {
    let raw = raw.filter(|r| !r.trim().is_empty())?;
    let parsed = parse_api_date(raw);
    if parsed.is_none() {
        warn!(value = raw, "Failed to parse {}", what);
    }
    parsed
}

async fn parse_verbatims(
    ctx: &StepContext,
    client: &RiigikoguClient,
    start: NaiveDate,
    end: NaiveDate,
    year: i32,
    report: &mut StepReport,
) -> Result<()> {
    let verbatims = match client.fetch_verbatims(start, end).await {
        Ok(verbatims) => verbatims,
        Err(e) => {
            let message = format!("Failed to fetch verbatims: {}", e);
            if !ctx.dry_run {
                ctx.db.with_conn(|conn| {
                    parse_errors::log_error(
                        conn,
                        &NewParseError::new(ParseErrorType::ApiConnection, &message, year)
                            .with_entity("session", "", "")
                            .with_details(format!("Date range: {} to {}, Error: {}", start, end, e)),
                    )
                })?;
            }
            return Err(e).context("Failed to fetch verbatims");
        }
    };

    info!(count = verbatims.len(), "Fetched sessions");
    report.selected = verbatims.len();

    if ctx.dry_run {
        for verbatim in &verbatims {
            let events: usize = verbatim
                .agenda_items
                .iter()
                .map(|a| a.events.iter().filter(|e| is_speech(e)).count())
                .sum();
            report.count("agenda_items", verbatim.agenda_items.len());
            report.count("speech_events", events);
        }
        report.succeeded = verbatims.len();
        return Ok(());
    }

    let mut names = ctx.db.with_conn(NameIndex::load)?;

    for (i, verbatim) in verbatims.iter().enumerate() {
        debug!(
            index = i + 1,
            total = verbatims.len(),
            title = verbatim.title.as_deref().unwrap_or("N/A"),
            "Processing session"
        );

        let outcome = ctx
            .db
            .transaction(|tx| process_verbatim(tx, verbatim, &mut names, year))
            .with_context(|| format!("Failed to store session {}", verbatim.identifier()))?;

        match outcome {
            Some(stored) => {
                report.succeeded += 1;
                report.count("speeches_created", stored.created);
                report.count("speeches_existing", stored.existing);
                report.count("events_skipped", stored.skipped);
                report.count("incomplete_speeches", stored.incomplete);
                if stored.created + stored.existing == 0 {
                    report.count("sessions_without_speeches", 1);
                }
            }
            None => report.failed += 1,
        }
    }

    Ok(())
}

fn is_speech(event: &VerbatimEvent) -> bool {
    event.event_type.as_deref().unwrap_or(SPEECH_EVENT) == SPEECH_EVENT
}

/// Speech counts for one verbatim
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoredSpeeches {
    pub created: usize,
    pub existing: usize,
    pub skipped: usize,
    pub incomplete: usize,
}

impl StoredSpeeches {
    fn add(&mut self, other: StoredSpeeches) {
        self.created += other.created;
        self.existing += other.existing;
        self.skipped += other.skipped;
        self.incomplete += other.incomplete;
    }
}

/// Store one verbatim: its session, agendas and speeches
///
/// Returns None when the session itself could not be stored. Call inside a
/// transaction.
pub fn process_verbatim(
    conn: &Connection,
    verbatim: &Verbatim,
    names: &mut NameIndex,
    year: i32,
) -> Result<Option<StoredSpeeches>> {
    let title = verbatim.title.as_deref().unwrap_or_default();

    let date = verbatim.date.as_deref().and_then(parse_api_datetime);
    let (Some(date), Some(membership), Some(plenary_session)) =
        (date, verbatim.membership, verbatim.plenary_session)
    else {
        let (error_type, message) = if date.is_none() && verbatim.date.is_some() {
            (
                ParseErrorType::DataParsing,
                format!(
                    "Failed to parse session date: {}",
                    verbatim.date.as_deref().unwrap_or_default()
                ),
            )
        } else {
            (
                ParseErrorType::MissingData,
                "Session without date, membership or plenary session".to_string(),
            )
        };
        warn!(session = %verbatim.identifier(), "{}", message);
        parse_errors::log_error(
            conn,
            &NewParseError::new(error_type, message, year).with_entity(
                "session",
                verbatim.identifier(),
                title,
            ),
        )?;
        return Ok(None);
    };

    let (session_id, _) = sessions::get_or_create_session(
        conn,
        membership,
        plenary_session,
        date,
        &clean_html(title),
        verbatim.edited.unwrap_or(false),
    )?;

    let mut stored = StoredSpeeches::default();
    for item in &verbatim.agenda_items {
        stored.add(process_agenda_item(conn, session_id, item, names, year)?);
    }

    if stored.created + stored.existing == 0 {
        warn!(session = %verbatim.identifier(), "Session has no speeches");
        parse_errors::log_error(
            conn,
            &NewParseError::new(
                ParseErrorType::MissingData,
                "Session has no speeches or agenda items",
                year,
            )
            .with_entity("session", verbatim.identifier(), title)
            .with_details(format!(
                "Membership: {}\nPlenary Session: {}\nDate: {}\nEdited: {}\nAgenda Items Count: {}",
                membership,
                plenary_session,
                verbatim.date.as_deref().unwrap_or_default(),
                verbatim.edited.unwrap_or(false),
                verbatim.agenda_items.len()
            )),
        )?;
    }

    Ok(Some(stored))
}

fn process_agenda_item(
    conn: &Connection,
    session_id: i64,
    item: &VerbatimAgendaItem,
    names: &mut NameIndex,
    year: i32,
) -> Result<StoredSpeeches> {
    let mut stored = StoredSpeeches::default();
    let title = item.title.as_deref().unwrap_or_default();

    let uuid = match item.agenda_item_uuid.as_deref() {
        Some(uuid) if !uuid.trim().is_empty() => uuid,
        _ => {
            warn!(title, "Agenda item without UUID");
            parse_errors::log_error(
                conn,
                &NewParseError::new(ParseErrorType::MissingData, "Agenda item without UUID", year)
                    .with_entity("agenda", "", title),
            )?;
            return Ok(stored);
        }
    };

    let Some(date) = item.date.as_deref().and_then(parse_api_datetime) else {
        let message = format!(
            "Failed to parse agenda item date: {}",
            item.date.as_deref().unwrap_or("missing")
        );
        warn!(agenda = uuid, "{}", message);
        parse_errors::log_error(
            conn,
            &NewParseError::new(ParseErrorType::DataParsing, message, year).with_entity("agenda", uuid, title),
        )?;
        return Ok(stored);
    };

    let (agenda_id, _) = sessions::get_or_create_agenda(conn, uuid, session_id, date, &clean_html(title))?;

    for event in &item.events {
        match store_speech_event(conn, agenda_id, uuid, event, names, year)? {
            EventOutcome::Created { incomplete } => {
                stored.created += 1;
                if incomplete {
                    stored.incomplete += 1;
                }
            }
            EventOutcome::Existing => stored.existing += 1,
            EventOutcome::Skipped => stored.skipped += 1,
        }
    }

    let times = speeches::agenda_speech_times(conn, agenda_id)?;
    if let (Some(first), Some(last)) = (times.first(), times.last()) {
        if times.len() >= 2 {
            sessions::set_agenda_total_time(conn, agenda_id, (*last - *first).num_seconds())?;
        }
    }
    sessions::refresh_agenda_incomplete(conn, agenda_id)?;

    Ok(stored)
}

enum EventOutcome {
    Created { incomplete: bool },
    Existing,
    Skipped,
}

fn store_speech_event(
    conn: &Connection,
    agenda_id: i64,
    agenda_uuid: &str,
    event: &VerbatimEvent,
    names: &mut NameIndex,
    year: i32,
) -> Result<EventOutcome> {
    if !is_speech(event) {
        debug!(event_type = ?event.event_type, "Skipping non-speech event");
        return Ok(EventOutcome::Skipped);
    }

    let speaker = clean_html(event.speaker.as_deref().unwrap_or_default());
    let Some(date) = event.date.as_deref().and_then(parse_api_datetime) else {
        parse_errors::log_error(
            conn,
            &NewParseError::new(
                ParseErrorType::DataParsing,
                format!(
                    "Failed to parse event date: {}",
                    event.date.as_deref().unwrap_or("missing")
                ),
                year,
            )
            .with_entity("speech", event.uuid.clone().unwrap_or_default(), &speaker),
        )?;
        return Ok(EventOutcome::Skipped);
    };

    let mut text = clean_html(event.text.as_deref().unwrap_or_default());
    if text.is_empty() {
        debug!(speaker = %speaker, "Skipping speech event without text");
        return Ok(EventOutcome::Skipped);
    }

    let is_incomplete = is_incomplete_text(&text);
    if is_incomplete {
        text = INCOMPLETE_TEXT.to_string();
        parse_errors::log_error(
            conn,
            &NewParseError::new(ParseErrorType::MissingStenogram, "Missing stenogram", year)
                .with_entity("speech", event.uuid.clone().unwrap_or_default(), &speaker)
                .with_details(format!(
                    "Speech contains '{}'\nSpeaker: {}\nDate: {}",
                    INCOMPLETE_TEXT, speaker, date
                )),
        )?;
        info!(speaker = %speaker, "Incomplete speech detected");
    }

    let new = NewSpeech {
        uuid: speech_uuid(agenda_uuid, date, &speaker, &text),
        agenda_id,
        politician_id: names.find(&speaker),
        date,
        speaker,
        text,
        link: event.link.clone().unwrap_or_default(),
        is_incomplete,
    };

    Ok(match speeches::insert_speech_if_absent(conn, &new)? {
        Some(_) => EventOutcome::Created {
            incomplete: is_incomplete,
        },
        None => EventOutcome::Existing,
    })
}
