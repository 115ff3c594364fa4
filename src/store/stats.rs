//! Named statistics entries.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};

use crate::domain::StatisticsEntry;

/// Insert or update a statistic by name; returns true when created
pub fn upsert_stat(conn: &Connection, entry: &StatisticsEntry) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE statistics_entries SET name_en = ?2, name_ru = ?3, value = ?4, percentage = ?5,
             updated_at = ?6
         WHERE name = ?1",
        params![entry.name, entry.name_en, entry.name_ru, entry.value, entry.percentage, Utc::now()],
    )?;
    if updated > 0 {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO statistics_entries (name, name_en, name_ru, value, percentage, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![entry.name, entry.name_en, entry.name_ru, entry.value, entry.percentage, Utc::now()],
    )?;
    Ok(true)
}

pub fn list_stats(conn: &Connection) -> Result<Vec<StatisticsEntry>> {
    let mut stmt = conn.prepare(
        "SELECT name, name_en, name_ru, value, percentage FROM statistics_entries ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(StatisticsEntry {
            name: row.get(0)?,
            name_en: row.get(1)?,
            name_ru: row.get(2)?,
            value: row.get(3)?,
            percentage: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    #[test]
    fn test_upsert_by_name() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let mut entry = StatisticsEntry::count("Kõned kokku", "Total Speeches", "Всего выступлений", 10);
            assert!(upsert_stat(conn, &entry)?);

            entry.value = 12;
            assert!(!upsert_stat(conn, &entry)?);

            let stats = list_stats(conn)?;
            assert_eq!(stats.len(), 1);
            assert_eq!(stats[0].value, 12);
            assert_eq!(stats[0].percentage, None);
            Ok(())
        })
        .unwrap();
    }
}
