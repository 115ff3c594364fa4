//! Politician profile parts.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{PoliticianProfilePart, ProfileCategory, ProfilePartDraft, ProfilePeriod};

const PART_COLUMNS: &str = "id, politician_id, category, period_key, analysis, analysis_en, analysis_ru, metrics, \
     speeches_analyzed, date_range_start, date_range_end, is_incomplete, ai_summary_generated_at";

fn part_from_row(row: &Row<'_>) -> rusqlite::Result<PoliticianProfilePart> {
    let category: String = row.get("category")?;
    let period_key: String = row.get("period_key")?;
    let category = category.parse::<ProfileCategory>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    let period = ProfilePeriod::from_key(&period_key).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(PoliticianProfilePart {
        id: row.get("id")?,
        politician_id: row.get("politician_id")?,
        category,
        period,
        analysis: row.get("analysis")?,
        analysis_en: row.get("analysis_en")?,
        analysis_ru: row.get("analysis_ru")?,
        metrics: row.get("metrics")?,
        speeches_analyzed: row.get("speeches_analyzed")?,
        date_range_start: row.get("date_range_start")?,
        date_range_end: row.get("date_range_end")?,
        is_incomplete: row.get("is_incomplete")?,
        ai_summary_generated_at: row.get("ai_summary_generated_at")?,
    })
}

pub fn get_part(
    conn: &Connection,
    politician_id: i64,
    category: ProfileCategory,
    period: &ProfilePeriod,
) -> Result<Option<PoliticianProfilePart>> {
    let sql = format!(
        "SELECT {} FROM politician_profile_parts
         WHERE politician_id = ?1 AND category = ?2 AND period_key = ?3",
        PART_COLUMNS
    );
    Ok(conn
        .query_row(
            &sql,
            params![politician_id, category.as_str(), period.key()],
            part_from_row,
        )
        .optional()?)
}

pub fn parts_for_politician(conn: &Connection, politician_id: i64) -> Result<Vec<PoliticianProfilePart>> {
    let sql = format!(
        "SELECT {} FROM politician_profile_parts WHERE politician_id = ?1 ORDER BY id",
        PART_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![politician_id], part_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Monthly parts of one category, in insertion order
pub fn monthly_parts(
    conn: &Connection,
    politician_id: i64,
    category: ProfileCategory,
) -> Result<Vec<PoliticianProfilePart>> {
    let sql = format!(
        "SELECT {} FROM politician_profile_parts
         WHERE politician_id = ?1 AND category = ?2 AND period_type = 'MONTH'
         ORDER BY date_range_start, id",
        PART_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![politician_id, category.as_str()], part_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Insert or update a part; translations are cleared when the analysis changes
///
/// Returns true when a new part was created.
pub fn upsert_part(
    conn: &Connection,
    politician_id: i64,
    category: ProfileCategory,
    period: &ProfilePeriod,
    draft: &ProfilePartDraft,
) -> Result<bool> {
    let now = Utc::now();
    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, analysis FROM politician_profile_parts
             WHERE politician_id = ?1 AND category = ?2 AND period_key = ?3",
            params![politician_id, category.as_str(), period.key()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((id, old_analysis)) => {
            let changed = old_analysis != draft.analysis;
            conn.execute(
                "UPDATE politician_profile_parts SET analysis = ?2, metrics = ?3, speeches_analyzed = ?4,
                     date_range_start = ?5, date_range_end = ?6, is_incomplete = ?7,
                     ai_summary_generated_at = ?8,
                     analysis_en = CASE WHEN ?9 THEN NULL ELSE analysis_en END,
                     analysis_ru = CASE WHEN ?9 THEN NULL ELSE analysis_ru END
                 WHERE id = ?1",
                params![
                    id,
                    draft.analysis,
                    draft.metrics,
                    draft.speeches_analyzed,
                    draft.date_range_start,
                    draft.date_range_end,
                    draft.is_incomplete,
                    now,
                    changed,
                ],
            )?;
            Ok(false)
        }
        None => {
            conn.execute(
                "INSERT INTO politician_profile_parts (politician_id, category, period_type, period_key,
                     analysis, metrics, speeches_analyzed, date_range_start, date_range_end,
                     is_incomplete, ai_summary_generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    politician_id,
                    category.as_str(),
                    period.period_type(),
                    period.key(),
                    draft.analysis,
                    draft.metrics,
                    draft.speeches_analyzed,
                    draft.date_range_start,
                    draft.date_range_end,
                    draft.is_incomplete,
                    now,
                ],
            )
            .with_context(|| {
                format!("Failed to insert {} profile for politician {}", category, politician_id)
            })?;
            Ok(true)
        }
    }
}

pub fn count_parts(conn: &Connection, politician_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM politician_profile_parts WHERE politician_id = ?1",
        params![politician_id],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{fixtures, Database};
    use chrono::NaiveDate;
    use serde_json::json;

    fn draft(analysis: &str) -> ProfilePartDraft {
        ProfilePartDraft {
            analysis: analysis.to_string(),
            metrics: json!({ "speeches_count": 2 }),
            speeches_analyzed: 2,
            date_range_start: NaiveDate::from_ymd_opt(2024, 1, 3),
            date_range_end: NaiveDate::from_ymd_opt(2024, 1, 20),
            is_incomplete: false,
        }
    }

    #[test]
    fn test_upsert_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let pol = fixtures::politician(conn, "p", "Mari", "Maasikas");
            let month = ProfilePeriod::Month("01.2024".to_string());

            assert!(upsert_part(conn, pol, ProfileCategory::RhetoricalStyle, &month, &draft("Rahulik"))?);
            conn.execute("UPDATE politician_profile_parts SET analysis_en = 'Calm'", [])?;

            assert!(!upsert_part(conn, pol, ProfileCategory::RhetoricalStyle, &month, &draft("Rahulik"))?);
            let part = get_part(conn, pol, ProfileCategory::RhetoricalStyle, &month)?.unwrap();
            assert_eq!(part.analysis_en.as_deref(), Some("Calm"));
            assert_eq!(part.metrics["speeches_count"], 2);
            assert_eq!(part.period, month);

            assert!(!upsert_part(conn, pol, ProfileCategory::RhetoricalStyle, &month, &draft("Tuline"))?);
            let part = get_part(conn, pol, ProfileCategory::RhetoricalStyle, &month)?.unwrap();
            assert!(part.analysis_en.is_none());

            upsert_part(conn, pol, ProfileCategory::RhetoricalStyle, &ProfilePeriod::Year(2024), &draft("Aasta"))?;
            assert_eq!(monthly_parts(conn, pol, ProfileCategory::RhetoricalStyle)?.len(), 1);
            assert_eq!(count_parts(conn, pol)?, 2);
            assert_eq!(parts_for_politician(conn, pol)?.len(), 2);
            Ok(())
        })
        .unwrap();
    }
}
