//! Plenary sessions and agenda items, including incomplete-flag propagation.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{AgendaItem, PlenarySession};

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<PlenarySession> {
    Ok(PlenarySession {
        id: row.get("id")?,
        membership: row.get("membership")?,
        plenary_session: row.get("plenary_session")?,
        date: row.get("date")?,
        title: row.get("title")?,
        title_en: row.get("title_en")?,
        title_ru: row.get("title_ru")?,
        edited: row.get("edited")?,
        is_incomplete: row.get("is_incomplete")?,
    })
}

pub(crate) fn agenda_from_row(row: &Row<'_>) -> rusqlite::Result<AgendaItem> {
    Ok(AgendaItem {
        id: row.get("id")?,
        uuid: row.get("uuid")?,
        session_id: row.get("session_id")?,
        date: row.get("date")?,
        title: row.get("title")?,
        title_en: row.get("title_en")?,
        title_ru: row.get("title_ru")?,
        total_time_seconds: row.get("total_time_seconds")?,
        is_incomplete: row.get("is_incomplete")?,
    })
}

pub(crate) const AGENDA_COLUMNS: &str =
    "a.id, a.uuid, a.session_id, a.date, a.title, a.title_en, a.title_ru, a.total_time_seconds, a.is_incomplete";

/// Get or create a session keyed on (membership, plenary_session, date)
///
/// Returns (id, created). Title and edited flag are only set on creation.
pub fn get_or_create_session(
    conn: &Connection,
    membership: i64,
    plenary_session: i64,
    date: DateTime<Utc>,
    title: &str,
    edited: bool,
) -> Result<(i64, bool)> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM plenary_sessions
             WHERE membership = ?1 AND plenary_session = ?2 AND date = ?3",
            params![membership, plenary_session, date],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        return Ok((id, false));
    }

    conn.execute(
        "INSERT INTO plenary_sessions (membership, plenary_session, date, title, edited)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![membership, plenary_session, date, title, edited],
    )
    .with_context(|| format!("Failed to create session {}/{}", membership, plenary_session))?;
    Ok((conn.last_insert_rowid(), true))
}

/// Get or create an agenda item by uuid; returns (id, created)
pub fn get_or_create_agenda(
    conn: &Connection,
    uuid: &str,
    session_id: i64,
    date: DateTime<Utc>,
    title: &str,
) -> Result<(i64, bool)> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM agenda_items WHERE uuid = ?1",
            params![uuid],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        return Ok((id, false));
    }

    conn.execute(
        "INSERT INTO agenda_items (uuid, session_id, date, title) VALUES (?1, ?2, ?3, ?4)",
        params![uuid, session_id, date, title],
    )
    .with_context(|| format!("Failed to create agenda item {}", uuid))?;
    Ok((conn.last_insert_rowid(), true))
}

pub fn get_session(conn: &Connection, id: i64) -> Result<Option<PlenarySession>> {
    Ok(conn
        .query_row(
            "SELECT * FROM plenary_sessions WHERE id = ?1",
            params![id],
            session_from_row,
        )
        .optional()?)
}

pub fn get_agenda(conn: &Connection, id: i64) -> Result<Option<AgendaItem>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM agenda_items a WHERE a.id = ?1", AGENDA_COLUMNS),
            params![id],
            agenda_from_row,
        )
        .optional()?)
}

pub fn set_agenda_total_time(conn: &Connection, agenda_id: i64, seconds: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE agenda_items SET total_time_seconds = ?2
         WHERE id = ?1 AND total_time_seconds IS NOT ?2",
        params![agenda_id, seconds],
    )?;
    Ok(changed > 0)
}

/// Set the agenda's flag from its speeches, then refresh its session
///
/// Returns true if the agenda flag changed.
pub fn refresh_agenda_incomplete(conn: &Connection, agenda_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE agenda_items SET is_incomplete = (
             SELECT EXISTS (SELECT 1 FROM speeches WHERE agenda_id = ?1 AND is_incomplete = 1)
         )
         WHERE id = ?1 AND is_incomplete IS NOT (
             SELECT EXISTS (SELECT 1 FROM speeches WHERE agenda_id = ?1 AND is_incomplete = 1)
         )",
        params![agenda_id],
    )?;

    let session_id: Option<i64> = conn
        .query_row(
            "SELECT session_id FROM agenda_items WHERE id = ?1",
            params![agenda_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(session_id) = session_id {
        refresh_session_incomplete(conn, session_id)?;
    }

    Ok(changed > 0)
}

/// Set the session's flag to "any of its agendas is incomplete"
pub fn refresh_session_incomplete(conn: &Connection, session_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE plenary_sessions SET is_incomplete = (
             SELECT EXISTS (SELECT 1 FROM agenda_items WHERE session_id = ?1 AND is_incomplete = 1)
         )
         WHERE id = ?1 AND is_incomplete IS NOT (
             SELECT EXISTS (SELECT 1 FROM agenda_items WHERE session_id = ?1 AND is_incomplete = 1)
         )",
        params![session_id],
    )?;
    Ok(changed > 0)
}

/// Sessions whose calendar date lies within [start, end]
pub fn sessions_in_range(conn: &Connection, start: NaiveDate, end: NaiveDate) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM plenary_sessions
         WHERE substr(date, 1, 10) BETWEEN ?1 AND ?2
         ORDER BY date",
    )?;
    let rows = stmt.query_map(params![start, end], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

pub fn all_agenda_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM agenda_items ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

pub fn all_session_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM plenary_sessions ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{fixtures, Database};

    #[test]
    fn test_session_and_agenda_get_or_create() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let when = fixtures::at(2024, 3, 4, 10, 0, 0);
            let (session, created) = get_or_create_session(conn, 15, 7, when, "Istung", true)?;
            assert!(created);
            let (again, created) = get_or_create_session(conn, 15, 7, when, "Other", false)?;
            assert!(!created);
            assert_eq!(session, again);

            let stored = get_session(conn, session)?.unwrap();
            assert_eq!(stored.title, "Istung");
            assert!(stored.edited);

            let (agenda, created) = get_or_create_agenda(conn, "uuid-1", session, when, "Eelnõu")?;
            assert!(created);
            assert_eq!(get_or_create_agenda(conn, "uuid-1", session, when, "x")?, (agenda, false));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_incomplete_flags_propagate_up() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let when = fixtures::at(2024, 3, 4, 10, 0, 0);
            let session = fixtures::session(conn, 1, when);
            let done = fixtures::agenda(conn, "a-done", session, when);
            let pending = fixtures::agenda(conn, "a-pending", session, when);
            fixtures::speech(conn, done, None, when, "Austatud kolleegid");
            let placeholder = fixtures::speech(conn, pending, None, when, "Stenogramm on koostamisel");

            assert!(!refresh_agenda_incomplete(conn, done)?);
            assert!(refresh_agenda_incomplete(conn, pending)?);
            assert!(get_agenda(conn, pending)?.unwrap().is_incomplete);
            assert!(get_session(conn, session)?.unwrap().is_incomplete);

            conn.execute("DELETE FROM speeches WHERE id = ?1", params![placeholder])?;
            assert!(refresh_agenda_incomplete(conn, pending)?);
            assert!(!get_session(conn, session)?.unwrap().is_incomplete);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_sessions_in_range_uses_calendar_date() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let inside = fixtures::session(conn, 1, fixtures::at(2024, 1, 31, 23, 0, 0));
            fixtures::session(conn, 2, fixtures::at(2024, 2, 1, 9, 0, 0));

            let found = sessions_in_range(
                conn,
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )?;
            assert_eq!(found, vec![inside]);
            Ok(())
        })
        .unwrap();
    }
}
