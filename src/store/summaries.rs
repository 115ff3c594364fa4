//! Agenda summaries, decisions and active-politician rows.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{
    AgendaActivePolitician, AgendaDecision, AgendaItem, AgendaSummary, AgendaSummaryDraft,
};

use super::sessions::{agenda_from_row, AGENDA_COLUMNS};

/// Agendas with speeches whose structured summary is missing or stale
///
/// An agenda is selected when it has no summary, no decisions or no activity
/// row, or when a speech was parsed after the summary and the agenda has no
/// incomplete speeches. With `overwrite`, every agenda with speeches.
pub fn agendas_needing_summary(
    conn: &Connection,
    overwrite: bool,
    limit: Option<usize>,
) -> Result<Vec<AgendaItem>> {
    let sql = format!(
        "SELECT {} FROM agenda_items a
         LEFT JOIN agenda_summaries sm ON sm.agenda_id = a.id
         WHERE EXISTS (SELECT 1 FROM speeches s WHERE s.agenda_id = a.id AND s.event_type = 'SPEECH')
           AND (
               ?1 = 1
               OR sm.id IS NULL
               OR NOT EXISTS (SELECT 1 FROM agenda_decisions d WHERE d.agenda_id = a.id)
               OR NOT EXISTS (SELECT 1 FROM agenda_active_politicians ap WHERE ap.agenda_id = a.id)
               OR (
                   EXISTS (SELECT 1 FROM speeches s
                           WHERE s.agenda_id = a.id AND s.parsed_at > sm.ai_summary_generated_at)
                   AND NOT EXISTS (SELECT 1 FROM speeches s
                                   WHERE s.agenda_id = a.id AND s.is_incomplete = 1)
               )
           )
         ORDER BY a.date DESC, a.id DESC
         LIMIT ?2",
        AGENDA_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![overwrite, limit.map(|l| l as i64).unwrap_or(-1)],
        agenda_from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Save a parsed agenda summary, replacing decisions and activity
///
/// Returns (decisions saved, activity saved). Call inside a transaction.
pub fn save_agenda_summary(
    conn: &Connection,
    agenda_id: i64,
    draft: &AgendaSummaryDraft,
    is_incomplete: bool,
) -> Result<(usize, bool)> {
    let now = Utc::now();

    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, summary_text FROM agenda_summaries WHERE agenda_id = ?1",
            params![agenda_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((id, old_text)) => {
            let text_changed = old_text != draft.summary_text;
            conn.execute(
                "UPDATE agenda_summaries SET summary_text = ?2, xml_response = ?3, is_incomplete = ?4,
                     ai_summary_generated_at = ?5,
                     summary_text_en = CASE WHEN ?6 THEN NULL ELSE summary_text_en END,
                     summary_text_ru = CASE WHEN ?6 THEN NULL ELSE summary_text_ru END
                 WHERE id = ?1",
                params![id, draft.summary_text, draft.xml_response, is_incomplete, now, text_changed],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO agenda_summaries (agenda_id, summary_text, xml_response, is_incomplete,
                     ai_summary_generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![agenda_id, draft.summary_text, draft.xml_response, is_incomplete, now],
            )
            .with_context(|| format!("Failed to insert summary for agenda {}", agenda_id))?;
        }
    }

    conn.execute("DELETE FROM agenda_decisions WHERE agenda_id = ?1", params![agenda_id])?;
    let mut decisions_saved = 0;
    for (politician_id, text) in &draft.decisions {
        if text.trim().is_empty() {
            continue;
        }
        conn.execute(
            "INSERT INTO agenda_decisions (agenda_id, politician_id, decision_text, is_incomplete,
                 ai_summary_generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![agenda_id, politician_id, text.trim(), is_incomplete, now],
        )?;
        decisions_saved += 1;
    }

    conn.execute(
        "DELETE FROM agenda_active_politicians WHERE agenda_id = ?1",
        params![agenda_id],
    )?;
    let mut activity_saved = false;
    if let Some((politician_id, text)) = &draft.activity {
        if !text.trim().is_empty() {
            conn.execute(
                "INSERT INTO agenda_active_politicians (agenda_id, politician_id, activity_description,
                     is_incomplete, ai_summary_generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![agenda_id, politician_id, text.trim(), is_incomplete, now],
            )?;
            activity_saved = true;
        }
    }

    Ok((decisions_saved, activity_saved))
}

pub fn get_agenda_summary(conn: &Connection, agenda_id: i64) -> Result<Option<AgendaSummary>> {
    Ok(conn
        .query_row(
            "SELECT id, agenda_id, summary_text, summary_text_en, summary_text_ru, xml_response,
                 is_incomplete, ai_summary_generated_at
             FROM agenda_summaries WHERE agenda_id = ?1",
            params![agenda_id],
            |row| {
                Ok(AgendaSummary {
                    id: row.get(0)?,
                    agenda_id: row.get(1)?,
                    summary_text: row.get(2)?,
                    summary_text_en: row.get(3)?,
                    summary_text_ru: row.get(4)?,
                    xml_response: row.get(5)?,
                    is_incomplete: row.get(6)?,
                    ai_summary_generated_at: row.get(7)?,
                })
            },
        )
        .optional()?)
}

pub fn decisions_for_agenda(conn: &Connection, agenda_id: i64) -> Result<Vec<AgendaDecision>> {
    let mut stmt = conn.prepare(
        "SELECT id, agenda_id, politician_id, decision_text, decision_text_en, decision_text_ru,
             is_incomplete, ai_summary_generated_at
         FROM agenda_decisions WHERE agenda_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![agenda_id], |row| {
        Ok(AgendaDecision {
            id: row.get(0)?,
            agenda_id: row.get(1)?,
            politician_id: row.get(2)?,
            decision_text: row.get(3)?,
            decision_text_en: row.get(4)?,
            decision_text_ru: row.get(5)?,
            is_incomplete: row.get(6)?,
            ai_summary_generated_at: row.get(7)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn activity_for_agenda(conn: &Connection, agenda_id: i64) -> Result<Option<AgendaActivePolitician>> {
    Ok(conn
        .query_row(
            "SELECT id, agenda_id, politician_id, activity_description, activity_description_en,
                 activity_description_ru, is_incomplete, ai_summary_generated_at
             FROM agenda_active_politicians WHERE agenda_id = ?1",
            params![agenda_id],
            |row| {
                Ok(AgendaActivePolitician {
                    id: row.get(0)?,
                    agenda_id: row.get(1)?,
                    politician_id: row.get(2)?,
                    activity_description: row.get(3)?,
                    activity_description_en: row.get(4)?,
                    activity_description_ru: row.get(5)?,
                    is_incomplete: row.get(6)?,
                    ai_summary_generated_at: row.get(7)?,
                })
            },
        )
        .optional()?)
}

/// Delete every agenda summary, decision and activity row
pub fn clear_agenda_summaries(conn: &Connection) -> Result<usize> {
    let mut cleared = conn.execute("DELETE FROM agenda_decisions", [])?;
    cleared += conn.execute("DELETE FROM agenda_active_politicians", [])?;
    cleared += conn.execute("DELETE FROM agenda_summaries", [])?;
    Ok(cleared)
}
