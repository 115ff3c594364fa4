//! Speeches: insertion, summaries and the selections the steps need.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::parliament::{INCOMPLETE_MARKER, INCOMPLETE_TEXT};
use crate::domain::{NewSpeech, Speech};

const SPEECH_COLUMNS: &str = "s.id, s.uuid, s.agenda_id, s.politician_id, s.event_type, s.date, s.speaker, s.text, \
     s.link, s.ai_summary, s.ai_summary_en, s.ai_summary_ru, s.is_incomplete, s.ai_summary_generated_at, s.parsed_at";

fn speech_from_row(row: &Row<'_>) -> rusqlite::Result<Speech> {
    Ok(Speech {
        id: row.get("id")?,
        uuid: row.get("uuid")?,
        agenda_id: row.get("agenda_id")?,
        politician_id: row.get("politician_id")?,
        event_type: row.get("event_type")?,
        date: row.get("date")?,
        speaker: row.get("speaker")?,
        text: row.get("text")?,
        link: row.get("link")?,
        ai_summary: row.get("ai_summary")?,
        ai_summary_en: row.get("ai_summary_en")?,
        ai_summary_ru: row.get("ai_summary_ru")?,
        is_incomplete: row.get("is_incomplete")?,
        ai_summary_generated_at: row.get("ai_summary_generated_at")?,
        parsed_at: row.get("parsed_at")?,
    })
}

fn query_speeches(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Speech>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, speech_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Insert a speech unless its uuid already exists
///
/// Returns the new row id, or None when the speech was already stored.
pub fn insert_speech_if_absent(conn: &Connection, new: &NewSpeech) -> Result<Option<i64>> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO speeches
                 (uuid, agenda_id, politician_id, event_type, date, speaker, text, link, is_incomplete, parsed_at)
             VALUES (?1, ?2, ?3, 'SPEECH', ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                new.uuid,
                new.agenda_id,
                new.politician_id,
                new.date,
                new.speaker,
                new.text,
                new.link,
                new.is_incomplete,
                Utc::now(),
            ],
        )
        .with_context(|| format!("Failed to insert speech {}", new.uuid))?;

    Ok((inserted > 0).then(|| conn.last_insert_rowid()))
}

pub fn get_speech(conn: &Connection, id: i64) -> Result<Option<Speech>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM speeches s WHERE s.id = ?1", SPEECH_COLUMNS),
            params![id],
            speech_from_row,
        )
        .optional()?)
}

/// Delete incomplete speeches in sessions dated within [start, end]
///
/// Returns the number deleted and the agendas they belonged to.
pub fn delete_incomplete_in_range(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(usize, Vec<i64>)> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT s.agenda_id FROM speeches s
         JOIN agenda_items a ON a.id = s.agenda_id
         JOIN plenary_sessions p ON p.id = a.session_id
         WHERE s.is_incomplete = 1 AND substr(p.date, 1, 10) BETWEEN ?1 AND ?2",
    )?;
    let agendas = stmt
        .query_map(params![start, end], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;

    let deleted = conn.execute(
        "DELETE FROM speeches WHERE is_incomplete = 1 AND agenda_id IN (
             SELECT a.id FROM agenda_items a
             JOIN plenary_sessions p ON p.id = a.session_id
             WHERE substr(p.date, 1, 10) BETWEEN ?1 AND ?2
         )",
        params![start, end],
    )?;

    Ok((deleted, agendas))
}

/// Speech times of an agenda, ascending
pub fn agenda_speech_times(conn: &Connection, agenda_id: i64) -> Result<Vec<DateTime<Utc>>> {
    let mut stmt = conn.prepare(
        "SELECT date FROM speeches WHERE agenda_id = ?1 AND event_type = 'SPEECH' ORDER BY date",
    )?;
    let rows = stmt.query_map(params![agenda_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Speeches that still need an AI summary, newest first
pub fn speeches_needing_summary(
    conn: &Connection,
    overwrite: bool,
    limit: Option<usize>,
) -> Result<Vec<Speech>> {
    let sql = format!(
        "SELECT {} FROM speeches s
         WHERE s.event_type = 'SPEECH' AND s.is_incomplete = 0 AND trim(s.text) != ''
           AND (?1 = 1 OR s.ai_summary IS NULL)
         ORDER BY s.date DESC, s.id DESC
         LIMIT ?2",
        SPEECH_COLUMNS
    );
    query_speeches(conn, &sql, params![overwrite, limit.map(|l| l as i64).unwrap_or(-1)])
}

/// Store a speech summary; translations are cleared when the text changes
pub fn save_speech_summary(conn: &Connection, speech_id: i64, summary: &str) -> Result<()> {
    conn.execute(
        "UPDATE speeches SET
             ai_summary_en = CASE WHEN ai_summary IS ?2 THEN ai_summary_en ELSE NULL END,
             ai_summary_ru = CASE WHEN ai_summary IS ?2 THEN ai_summary_ru ELSE NULL END,
             ai_summary = ?2,
             ai_summary_generated_at = ?3
         WHERE id = ?1",
        params![speech_id, summary, Utc::now()],
    )
    .with_context(|| format!("Failed to save summary for speech {}", speech_id))?;
    Ok(())
}

/// Complete speeches of an agenda ordered by time
pub fn complete_speeches_for_agenda(conn: &Connection, agenda_id: i64) -> Result<Vec<Speech>> {
    let sql = format!(
        "SELECT {} FROM speeches s
         WHERE s.agenda_id = ?1 AND s.event_type = 'SPEECH' AND s.is_incomplete = 0
           AND trim(s.text) != ''
         ORDER BY s.date, s.id",
        SPEECH_COLUMNS
    );
    query_speeches(conn, &sql, params![agenda_id])
}

pub fn agenda_has_incomplete_speech(conn: &Connection, agenda_id: i64) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM speeches WHERE agenda_id = ?1 AND is_incomplete = 1)",
        params![agenda_id],
        |row| row.get(0),
    )?)
}

/// A politician's speech with the keys profiling groups by
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRef {
    pub id: i64,
    pub agenda_id: i64,
    pub session_id: i64,
    pub date: DateTime<Utc>,
    pub text: String,
    pub is_incomplete: bool,
    pub parsed_at: DateTime<Utc>,
}

/// All speeches of a politician, oldest first
pub fn speeches_for_politician(conn: &Connection, politician_id: i64) -> Result<Vec<SpeechRef>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.agenda_id, a.session_id, s.date, s.text, s.is_incomplete, s.parsed_at
         FROM speeches s JOIN agenda_items a ON a.id = s.agenda_id
         WHERE s.politician_id = ?1 AND s.event_type = 'SPEECH'
         ORDER BY s.date, s.id",
    )?;
    let rows = stmt.query_map(params![politician_id], |row| {
        Ok(SpeechRef {
            id: row.get(0)?,
            agenda_id: row.get(1)?,
            session_id: row.get(2)?,
            date: row.get(3)?,
            text: row.get(4)?,
            is_incomplete: row.get(5)?,
            parsed_at: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Re-derive every speech's incomplete flag from its text
///
/// Incomplete texts are normalized to the canonical placeholder. Returns the
/// number of rows changed.
pub fn rederive_incomplete_flags(conn: &Connection) -> Result<usize> {
    let pattern = format!("%{}%", INCOMPLETE_MARKER);
    let marked = conn.execute(
        "UPDATE speeches SET is_incomplete = 1, text = ?2
         WHERE text LIKE ?1 AND (is_incomplete = 0 OR text != ?2)",
        params![pattern, INCOMPLETE_TEXT],
    )?;
    let cleared = conn.execute(
        "UPDATE speeches SET is_incomplete = 0 WHERE is_incomplete = 1 AND text NOT LIKE ?1",
        params![pattern],
    )?;
    Ok(marked + cleared)
}

/// Drop every speech summary and its translations
pub fn clear_speech_summaries(conn: &Connection) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE speeches SET ai_summary = NULL, ai_summary_en = NULL, ai_summary_ru = NULL,
             ai_summary_generated_at = NULL
         WHERE ai_summary IS NOT NULL OR ai_summary_en IS NOT NULL OR ai_summary_ru IS NOT NULL",
        [],
    )?)
}

/// (politician, agenda, time) for every linked speech, grouped for total time
pub fn politician_speech_times(conn: &Connection) -> Result<Vec<(i64, i64, DateTime<Utc>)>> {
    let mut stmt = conn.prepare(
        "SELECT politician_id, agenda_id, date FROM speeches
         WHERE politician_id IS NOT NULL AND event_type = 'SPEECH'
         ORDER BY politician_id, agenda_id, date",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{fixtures, sessions, Database};

    #[test]
    fn test_insert_is_idempotent_on_uuid() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let when = fixtures::at(2024, 5, 2, 10, 0, 0);
            let session = fixtures::session(conn, 1, when);
            let agenda = fixtures::agenda(conn, "a1", session, when);
            let new = NewSpeech {
                uuid: "fixed".to_string(),
                agenda_id: agenda,
                politician_id: None,
                date: when,
                speaker: "Mari Maasikas".to_string(),
                text: "Tere".to_string(),
                link: String::new(),
                is_incomplete: false,
            };
            assert!(insert_speech_if_absent(conn, &new)?.is_some());
            assert!(insert_speech_if_absent(conn, &new)?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_summary_selection_and_save() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let session = fixtures::session(conn, 1, fixtures::at(2024, 5, 2, 10, 0, 0));
            let agenda = fixtures::agenda(conn, "a1", session, fixtures::at(2024, 5, 2, 10, 0, 0));
            let older = fixtures::speech(conn, agenda, None, fixtures::at(2024, 5, 2, 10, 0, 0), "Esimene");
            let newer = fixtures::speech(conn, agenda, None, fixtures::at(2024, 5, 2, 11, 0, 0), "Teine");
            fixtures::speech(conn, agenda, None, fixtures::at(2024, 5, 2, 12, 0, 0), "Stenogramm on koostamisel");
            fixtures::speech(conn, agenda, None, fixtures::at(2024, 5, 2, 13, 0, 0), "   ");

            let pending = speeches_needing_summary(conn, false, None)?;
            assert_eq!(pending.iter().map(|s| s.id).collect::<Vec<_>>(), vec![newer, older]);
            assert_eq!(speeches_needing_summary(conn, false, Some(1))?.len(), 1);

            save_speech_summary(conn, newer, "Kõneleja tervitas")?;
            conn.execute("UPDATE speeches SET ai_summary_en = 'greeted' WHERE id = ?1", params![newer])?;

            // same text keeps translations
            save_speech_summary(conn, newer, "Kõneleja tervitas")?;
            assert_eq!(get_speech(conn, newer)?.unwrap().ai_summary_en.as_deref(), Some("greeted"));

            // changed text clears them
            save_speech_summary(conn, newer, "Kõneleja tänas")?;
            let stored = get_speech(conn, newer)?.unwrap();
            assert_eq!(stored.ai_summary.as_deref(), Some("Kõneleja tänas"));
            assert!(stored.ai_summary_en.is_none());
            assert!(stored.ai_summary_generated_at.is_some());

            assert_eq!(speeches_needing_summary(conn, false, None)?.len(), 1);
            assert_eq!(speeches_needing_summary(conn, true, None)?.len(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_incomplete_in_range() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let jan = fixtures::at(2024, 1, 10, 10, 0, 0);
            let mar = fixtures::at(2024, 3, 10, 10, 0, 0);
            let jan_agenda = fixtures::agenda(conn, "jan", fixtures::session(conn, 1, jan), jan);
            let mar_agenda = fixtures::agenda(conn, "mar", fixtures::session(conn, 2, mar), mar);
            fixtures::speech(conn, jan_agenda, None, jan, "Stenogramm on koostamisel");
            fixtures::speech(conn, jan_agenda, None, jan, "Valmis kõne");
            fixtures::speech(conn, mar_agenda, None, mar, "Stenogramm on koostamisel");

            let (deleted, agendas) = delete_incomplete_in_range(
                conn,
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )?;
            assert_eq!(deleted, 1);
            assert_eq!(agendas, vec![jan_agenda]);
            assert!(agenda_has_incomplete_speech(conn, mar_agenda)?);
            assert!(!agenda_has_incomplete_speech(conn, jan_agenda)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_rederive_incomplete_flags() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let when = fixtures::at(2024, 1, 10, 10, 0, 0);
            let agenda = fixtures::agenda(conn, "a", fixtures::session(conn, 1, when), when);
            let wrong = fixtures::speech(conn, agenda, None, when, "Tekst");
            conn.execute("UPDATE speeches SET is_incomplete = 1 WHERE id = ?1", params![wrong])?;
            let marker = fixtures::speech(conn, agenda, None, when, "x");
            conn.execute(
                "UPDATE speeches SET text = '... STENOGRAMM ON KOOSTAMISEL' WHERE id = ?1",
                params![marker],
            )?;

            assert_eq!(rederive_incomplete_flags(conn)?, 2);
            assert!(!get_speech(conn, wrong)?.unwrap().is_incomplete);
            let fixed = get_speech(conn, marker)?.unwrap();
            assert!(fixed.is_incomplete);
            assert_eq!(fixed.text, INCOMPLETE_TEXT);

            sessions::refresh_agenda_incomplete(conn, agenda)?;
            assert_eq!(rederive_incomplete_flags(conn)?, 0);
            Ok(())
        })
        .unwrap();
    }
}
