//! Politicians, factions and faction memberships.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{NewPolitician, Politician};

const POLITICIAN_COLUMNS: &str = "id, uuid, first_name, last_name, full_name, active, email, phone, gender, \
     date_of_birth, parliament_seniority, total_time_seconds, profiles_required, profiles_already_profiled";

fn politician_from_row(row: &Row<'_>) -> rusqlite::Result<Politician> {
    Ok(Politician {
        id: row.get("id")?,
        uuid: row.get("uuid")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        full_name: row.get("full_name")?,
        active: row.get("active")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        gender: row.get("gender")?,
        date_of_birth: row.get("date_of_birth")?,
        parliament_seniority: row.get("parliament_seniority")?,
        total_time_seconds: row.get("total_time_seconds")?,
        profiles_required: row.get("profiles_required")?,
        profiles_already_profiled: row.get("profiles_already_profiled")?,
    })
}

/// Insert or update a politician by uuid; returns (id, created)
pub fn upsert_politician(conn: &Connection, new: &NewPolitician) -> Result<(i64, bool)> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM politicians WHERE uuid = ?1",
            params![new.uuid],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE politicians SET first_name = ?2, last_name = ?3, full_name = ?4, active = ?5,
                     email = ?6, phone = ?7, gender = ?8, date_of_birth = ?9, parliament_seniority = ?10
                 WHERE id = ?1",
                params![
                    id,
                    new.first_name,
                    new.last_name,
                    new.full_name,
                    new.active,
                    new.email,
                    new.phone,
                    new.gender,
                    new.date_of_birth,
                    new.parliament_seniority,
                ],
            )
            .with_context(|| format!("Failed to update politician {}", new.uuid))?;
            Ok((id, false))
        }
        None => {
            conn.execute(
                "INSERT INTO politicians (uuid, first_name, last_name, full_name, active, email, phone,
                     gender, date_of_birth, parliament_seniority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    new.uuid,
                    new.first_name,
                    new.last_name,
                    new.full_name,
                    new.active,
                    new.email,
                    new.phone,
                    new.gender,
                    new.date_of_birth,
                    new.parliament_seniority,
                ],
            )
            .with_context(|| format!("Failed to insert politician {}", new.uuid))?;
            Ok((conn.last_insert_rowid(), true))
        }
    }
}

/// Get or create a faction by uuid; returns the faction id
pub fn get_or_create_faction(conn: &Connection, uuid: &str, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO factions (uuid, name) VALUES (?1, ?2)",
        params![uuid, name],
    )?;
    let id = conn.query_row(
        "SELECT id FROM factions WHERE uuid = ?1",
        params![uuid],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Get or create a membership keyed on (politician, faction, start_date)
///
/// Returns true when a new membership row was created.
pub fn get_or_create_membership(
    conn: &Connection,
    politician_id: i64,
    faction_id: i64,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<bool> {
    // `IS` so that a NULL start date matches an existing NULL
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM politician_factions
             WHERE politician_id = ?1 AND faction_id = ?2 AND start_date IS ?3",
            params![politician_id, faction_id, start_date],
            |row| row.get(0),
        )
        .optional()?;

    if existing.is_some() {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO politician_factions (politician_id, faction_id, start_date, end_date)
         VALUES (?1, ?2, ?3, ?4)",
        params![politician_id, faction_id, start_date, end_date],
    )?;
    Ok(true)
}

pub fn get_politician(conn: &Connection, id: i64) -> Result<Option<Politician>> {
    let sql = format!("SELECT {} FROM politicians WHERE id = ?1", POLITICIAN_COLUMNS);
    Ok(conn
        .query_row(&sql, params![id], politician_from_row)
        .optional()?)
}

pub fn list_politicians(conn: &Connection) -> Result<Vec<Politician>> {
    let sql = format!("SELECT {} FROM politicians ORDER BY id", POLITICIAN_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], politician_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Politicians with at least one speech, by id ascending
pub fn politicians_with_speeches(
    conn: &Connection,
    start_from_id: Option<i64>,
    limit: Option<usize>,
    active_only: bool,
) -> Result<Vec<Politician>> {
    let sql = format!(
        "SELECT {} FROM politicians p
         WHERE p.id >= ?1
           AND (?2 = 0 OR p.active = 1)
           AND EXISTS (SELECT 1 FROM speeches s WHERE s.politician_id = p.id AND s.event_type = 'SPEECH')
         ORDER BY p.id
         LIMIT ?3",
        POLITICIAN_COLUMNS
            .split(", ")
            .map(|c| format!("p.{}", c))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![start_from_id.unwrap_or(0), active_only, limit],
        politician_from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn set_total_time(conn: &Connection, id: i64, seconds: i64) -> Result<()> {
    conn.execute(
        "UPDATE politicians SET total_time_seconds = ?2 WHERE id = ?1",
        params![id, seconds],
    )?;
    Ok(())
}

pub fn set_profiling_counts(conn: &Connection, id: i64, required: i64, profiled: i64) -> Result<()> {
    conn.execute(
        "UPDATE politicians SET profiles_required = ?2, profiles_already_profiled = ?3 WHERE id = ?1",
        params![id, required, profiled],
    )?;
    Ok(())
}

/// Case-insensitive name lookup used when linking speakers to politicians
#[derive(Debug, Default)]
pub struct NameIndex {
    by_full_name: HashMap<String, i64>,
    by_first_last: HashMap<(String, String), i64>,
}

impl NameIndex {
    /// Load every politician's names
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT id, first_name, last_name, full_name FROM politicians ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut index = Self::default();
        for row in rows {
            let (id, first, last, full) = row?;
            index.insert(id, &first, &last, &full);
        }
        Ok(index)
    }

    pub fn insert(&mut self, id: i64, first_name: &str, last_name: &str, full_name: &str) {
        // first row wins on duplicates
        self.by_full_name
            .entry(full_name.trim().to_lowercase())
            .or_insert(id);
        self.by_first_last
            .entry((first_name.trim().to_lowercase(), last_name.trim().to_lowercase()))
            .or_insert(id);
    }

    /// Match a speaker by full name, then by first word + rest
    pub fn find(&self, speaker: &str) -> Option<i64> {
        let speaker = speaker.trim().to_lowercase();
        if speaker.is_empty() {
            return None;
        }
        if let Some(id) = self.by_full_name.get(&speaker) {
            return Some(*id);
        }
        let (first, rest) = speaker.split_once(' ')?;
        self.by_first_last
            .get(&(first.to_string(), rest.trim().to_string()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{fixtures, Database};

    #[test]
    fn test_upsert_updates_existing() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let mut new = NewPolitician {
                uuid: "abc".to_string(),
                first_name: "Mari".to_string(),
                last_name: "Maasikas".to_string(),
                full_name: "Mari Maasikas".to_string(),
                active: true,
                parliament_seniority: Some(1.5),
                ..Default::default()
            };
            let (id, created) = upsert_politician(conn, &new)?;
            assert!(created);

            new.active = false;
            new.email = "mari@riigikogu.ee".to_string();
            let (same_id, created) = upsert_politician(conn, &new)?;
            assert!(!created);
            assert_eq!(id, same_id);

            let stored = get_politician(conn, id)?.unwrap();
            assert!(!stored.active);
            assert_eq!(stored.email, "mari@riigikogu.ee");
            assert_eq!(stored.parliament_seniority, Some(1.5));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_membership_get_or_create_handles_null_start() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let pol = fixtures::politician(conn, "p1", "Jaan", "Tamm");
            let faction = get_or_create_faction(conn, "f1", "Fraktsioon")?;
            assert_eq!(get_or_create_faction(conn, "f1", "Fraktsioon")?, faction);

            assert!(get_or_create_membership(conn, pol, faction, None, None)?);
            assert!(!get_or_create_membership(conn, pol, faction, None, None)?);

            let start = NaiveDate::from_ymd_opt(2023, 4, 10);
            assert!(get_or_create_membership(conn, pol, faction, start, None)?);
            assert!(!get_or_create_membership(conn, pol, faction, start, None)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_name_index_matching() {
        let mut index = NameIndex::default();
        index.insert(1, "Jüri", "Ratas", "Jüri Ratas");
        index.insert(2, "Anna", "Maria Kask", "Anna-Maria Kask");

        assert_eq!(index.find("JÜRI RATAS"), Some(1));
        assert_eq!(index.find(" jüri ratas "), Some(1));
        assert_eq!(index.find("Anna Maria Kask"), Some(2));
        assert_eq!(index.find("Istungi juhataja"), None);
        assert_eq!(index.find(""), None);
    }

    #[test]
    fn test_politicians_with_speeches_filters() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let quiet = fixtures::politician(conn, "p1", "Vaikne", "Liige");
            let talker = fixtures::politician(conn, "p2", "Jutukas", "Liige");
            let when = fixtures::at(2024, 2, 1, 10, 0, 0);
            let session = fixtures::session(conn, 1, when);
            let agenda = fixtures::agenda(conn, "a1", session, when);
            fixtures::speech(conn, agenda, Some(talker), when, "Tere");

            let found = politicians_with_speeches(conn, None, None, false)?;
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, talker);
            assert_ne!(found[0].id, quiet);

            assert!(politicians_with_speeches(conn, Some(talker + 1), None, false)?.is_empty());
            assert_eq!(politicians_with_speeches(conn, None, Some(0), false)?.len(), 0);
            Ok(())
        })
        .unwrap();
    }
}
