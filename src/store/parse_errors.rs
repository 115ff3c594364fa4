//! Ingestion error log, kept per year.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};

use crate::domain::{NewParseError, ParliamentParseError, ParseErrorType};

pub fn log_error(conn: &Connection, error: &NewParseError) -> Result<()> {
    conn.execute(
        "INSERT INTO parse_errors (error_type, message, details, entity_type, entity_id, entity_name,
             year, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            error.error_type.as_str(),
            error.message,
            error.details,
            error.entity_type,
            error.entity_id,
            error.entity_name,
            error.year,
            Utc::now(),
        ],
    )
    .context("Failed to log parse error")?;
    Ok(())
}

/// Remove every error logged for a year; returns the number removed
pub fn clear_year(conn: &Connection, year: i32) -> Result<usize> {
    Ok(conn.execute("DELETE FROM parse_errors WHERE year = ?1", params![year])?)
}

pub fn list_for_year(conn: &Connection, year: i32) -> Result<Vec<ParliamentParseError>> {
    let mut stmt = conn.prepare(
        "SELECT id, error_type, message, details, entity_type, entity_id, entity_name, year, created_at
         FROM parse_errors WHERE year = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![year], |row| {
        let error_type: String = row.get(1)?;
        Ok(ParliamentParseError {
            id: row.get(0)?,
            error_type: ParseErrorType::from_db(&error_type),
            message: row.get(2)?,
            details: row.get(3)?,
            entity_type: row.get(4)?,
            entity_id: row.get(5)?,
            entity_name: row.get(6)?,
            year: row.get(7)?,
            created_at: row.get(8)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
