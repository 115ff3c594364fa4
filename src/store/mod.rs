//! Relational store backed by SQLite.
//!
//! One submodule per aggregate. Submodule functions take a `&Connection` so
//! the same code runs inside or outside a transaction.

pub mod parse_errors;
pub mod politicians;
pub mod profiles;
pub mod sessions;
pub mod speeches;
pub mod stats;
pub mod summaries;
pub mod translations;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use rusqlite::{Connection, Transaction};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS politicians (
    id INTEGER PRIMARY KEY,
    uuid TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    full_name TEXT NOT NULL DEFAULT '',
    active INTEGER NOT NULL DEFAULT 1,
    email TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL DEFAULT '',
    gender TEXT NOT NULL DEFAULT '',
    date_of_birth TEXT,
    parliament_seniority REAL,
    total_time_seconds INTEGER,
    profiles_required INTEGER NOT NULL DEFAULT 0,
    profiles_already_profiled INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS factions (
    id INTEGER PRIMARY KEY,
    uuid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS politician_factions (
    id INTEGER PRIMARY KEY,
    politician_id INTEGER NOT NULL REFERENCES politicians(id) ON DELETE CASCADE,
    faction_id INTEGER NOT NULL REFERENCES factions(id) ON DELETE CASCADE,
    start_date TEXT,
    end_date TEXT,
    UNIQUE (politician_id, faction_id, start_date)
);

CREATE TABLE IF NOT EXISTS plenary_sessions (
    id INTEGER PRIMARY KEY,
    membership INTEGER NOT NULL,
    plenary_session INTEGER NOT NULL,
    date TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    title_en TEXT,
    title_ru TEXT,
    edited INTEGER NOT NULL DEFAULT 0,
    is_incomplete INTEGER NOT NULL DEFAULT 0,
    UNIQUE (membership, plenary_session, date)
);

CREATE TABLE IF NOT EXISTS agenda_items (
    id INTEGER PRIMARY KEY,
    uuid TEXT NOT NULL UNIQUE,
    session_id INTEGER NOT NULL REFERENCES plenary_sessions(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    title_en TEXT,
    title_ru TEXT,
    total_time_seconds INTEGER,
    is_incomplete INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS speeches (
    id INTEGER PRIMARY KEY,
    uuid TEXT NOT NULL UNIQUE,
    agenda_id INTEGER NOT NULL REFERENCES agenda_items(id) ON DELETE CASCADE,
    politician_id INTEGER REFERENCES politicians(id) ON DELETE SET NULL,
    event_type TEXT NOT NULL DEFAULT 'SPEECH',
    date TEXT NOT NULL,
    speaker TEXT NOT NULL DEFAULT '',
    text TEXT NOT NULL DEFAULT '',
    link TEXT NOT NULL DEFAULT '',
    ai_summary TEXT,
    ai_summary_en TEXT,
    ai_summary_ru TEXT,
    is_incomplete INTEGER NOT NULL DEFAULT 0,
    ai_summary_generated_at TEXT,
    parsed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_speeches_agenda ON speeches(agenda_id);
CREATE INDEX IF NOT EXISTS idx_speeches_politician ON speeches(politician_id);
CREATE INDEX IF NOT EXISTS idx_speeches_date ON speeches(date);

CREATE TABLE IF NOT EXISTS agenda_summaries (
    id INTEGER PRIMARY KEY,
    agenda_id INTEGER NOT NULL UNIQUE REFERENCES agenda_items(id) ON DELETE CASCADE,
    summary_text TEXT NOT NULL DEFAULT '',
    summary_text_en TEXT,
    summary_text_ru TEXT,
    xml_response TEXT NOT NULL DEFAULT '',
    is_incomplete INTEGER NOT NULL DEFAULT 0,
    ai_summary_generated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agenda_decisions (
    id INTEGER PRIMARY KEY,
    agenda_id INTEGER NOT NULL REFERENCES agenda_items(id) ON DELETE CASCADE,
    politician_id INTEGER REFERENCES politicians(id) ON DELETE SET NULL,
    decision_text TEXT NOT NULL DEFAULT '',
    decision_text_en TEXT,
    decision_text_ru TEXT,
    is_incomplete INTEGER NOT NULL DEFAULT 0,
    ai_summary_generated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_decisions_agenda ON agenda_decisions(agenda_id);

CREATE TABLE IF NOT EXISTS agenda_active_politicians (
    id INTEGER PRIMARY KEY,
    agenda_id INTEGER NOT NULL UNIQUE REFERENCES agenda_items(id) ON DELETE CASCADE,
    politician_id INTEGER REFERENCES politicians(id) ON DELETE SET NULL,
    activity_description TEXT NOT NULL DEFAULT '',
    activity_description_en TEXT,
    activity_description_ru TEXT,
    is_incomplete INTEGER NOT NULL DEFAULT 0,
    ai_summary_generated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS politician_profile_parts (
    id INTEGER PRIMARY KEY,
    politician_id INTEGER NOT NULL REFERENCES politicians(id) ON DELETE CASCADE,
    category TEXT NOT NULL,
    period_type TEXT NOT NULL,
    period_key TEXT NOT NULL,
    analysis TEXT NOT NULL DEFAULT '',
    analysis_en TEXT,
    analysis_ru TEXT,
    metrics TEXT NOT NULL DEFAULT '{}',
    speeches_analyzed INTEGER NOT NULL DEFAULT 0,
    date_range_start TEXT,
    date_range_end TEXT,
    is_incomplete INTEGER NOT NULL DEFAULT 0,
    ai_summary_generated_at TEXT NOT NULL,
    UNIQUE (politician_id, category, period_key)
);

CREATE TABLE IF NOT EXISTS statistics_entries (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    name_en TEXT NOT NULL DEFAULT '',
    name_ru TEXT NOT NULL DEFAULT '',
    value INTEGER NOT NULL DEFAULT 0,
    percentage REAL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS parse_errors (
    id INTEGER PRIMARY KEY,
    error_type TEXT NOT NULL,
    message TEXT NOT NULL,
    details TEXT,
    entity_type TEXT,
    entity_id TEXT,
    entity_name TEXT,
    year INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_parse_errors_year ON parse_errors(year);
"#;

/// Shared handle to the SQLite database
///
/// Cloning is cheap; all clones use the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        debug!(path = %path.display(), "Opened database");
        Self::init(conn)
    }

    /// In-memory database (tests, dry runs against an empty store)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA).context("Failed to apply schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure with the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))?;
        f(&conn)
    }

    /// Run a closure inside a transaction; commits on Ok, rolls back on Err
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let value = f(&tx)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(value)
    }
}

/// Run a `SELECT COUNT(*) ...` style query without parameters
pub fn scalar(conn: &Connection, sql: &str) -> Result<i64> {
    conn.query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("Query failed: {}", sql))
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Small builders shared by store and step tests.

    use chrono::{DateTime, TimeZone, Utc};
    use rusqlite::Connection;

    use super::{politicians, sessions, speeches};
    use crate::domain::{NewPolitician, NewSpeech};

    pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    pub fn politician(conn: &Connection, uuid: &str, first: &str, last: &str) -> i64 {
        let new = NewPolitician {
            uuid: uuid.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            full_name: format!("{} {}", first, last),
            active: true,
            ..Default::default()
        };
        politicians::upsert_politician(conn, &new).unwrap().0
    }

    pub fn session(conn: &Connection, plenary: i64, date: DateTime<Utc>) -> i64 {
        sessions::get_or_create_session(conn, 15, plenary, date, "Täiskogu istung", false)
            .unwrap()
            .0
    }

    pub fn agenda(conn: &Connection, uuid: &str, session_id: i64, date: DateTime<Utc>) -> i64 {
        sessions::get_or_create_agenda(conn, uuid, session_id, date, "Eelnõu arutelu")
            .unwrap()
            .0
    }

    pub fn speech(
        conn: &Connection,
        agenda_id: i64,
        politician_id: Option<i64>,
        date: DateTime<Utc>,
        text: &str,
    ) -> i64 {
        let new = NewSpeech {
            uuid: uuid::Uuid::new_v4().to_string(),
            agenda_id,
            politician_id,
            date,
            speaker: "Kõneleja".to_string(),
            text: text.to_string(),
            link: String::new(),
            is_incomplete: crate::domain::parliament::is_incomplete_text(text),
        };
        speeches::insert_speech_if_absent(conn, &new).unwrap().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_file_and_schema() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("parliament.db");

        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let tables = db
            .with_conn(|conn| scalar(conn, "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'"))
            .unwrap();
        assert_eq!(tables, 12);
    }

    #[test]
    fn test_schema_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("parliament.db");

        Database::open(&path).unwrap();
        assert!(Database::open(&path).is_ok());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: Result<()> = db.transaction(|tx| {
            fixtures::politician(tx, "p-1", "Mari", "Maasikas");
            anyhow::bail!("boom")
        });
        assert!(result.is_err());

        let count = db
            .with_conn(|conn| scalar(conn, "SELECT COUNT(*) FROM politicians"))
            .unwrap();
        assert_eq!(count, 0);
    }
}
