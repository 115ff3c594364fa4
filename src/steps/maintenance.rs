//! Repair and reset commands that sit outside the daily routine.

use std::str::FromStr;

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use crate::store::{sessions, speeches, summaries};

/// Which AI summaries to drop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Speeches,
    Agendas,
    All,
}

impl FromStr for ClearScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "speeches" => Ok(Self::Speeches),
            "agendas" => Ok(Self::Agendas),
            "all" => Ok(Self::All),
            other => anyhow::bail!("Unknown summary scope: {}", other),
        }
    }
}

/// Re-derive incompleteness for speeches, then agendas, then sessions
///
/// Returns the number of rows whose flag changed.
pub fn fix_incomplete_flags(conn: &Connection) -> Result<usize> {
    let speeches_changed = speeches::rederive_incomplete_flags(conn)?;

    let mut agendas_changed = 0;
    for agenda_id in sessions::all_agenda_ids(conn)? {
        if sessions::refresh_agenda_incomplete(conn, agenda_id)? {
            agendas_changed += 1;
        }
    }

    // agendas already refresh their session; this catches sessions without agendas
    let mut sessions_changed = 0;
    for session_id in sessions::all_session_ids(conn)? {
        if sessions::refresh_session_incomplete(conn, session_id)? {
            sessions_changed += 1;
        }
    }

    info!(speeches_changed, agendas_changed, sessions_changed, "Incomplete flags fixed");
    Ok(speeches_changed + agendas_changed + sessions_changed)
}

/// Drop AI summaries and their translations; returns rows cleared
pub fn clear_ai_summaries(conn: &Connection, scope: ClearScope) -> Result<usize> {
    let mut cleared = 0;
    if matches!(scope, ClearScope::Speeches | ClearScope::All) {
        let count = speeches::clear_speech_summaries(conn)?;
        info!(count, "Cleared speech summaries");
        cleared += count;
    }
    if matches!(scope, ClearScope::Agendas | ClearScope::All) {
        let count = summaries::clear_agenda_summaries(conn)?;
        info!(count, "Cleared agenda summaries");
        cleared += count;
    }
    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgendaSummaryDraft;
    use crate::store::{fixtures, scalar, Database};

    #[test]
    fn test_fix_incomplete_flags_propagates_upwards() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let when = fixtures::at(2024, 5, 6, 10, 0, 0);
            let session = fixtures::session(conn, 1, when);
            let agenda = fixtures::agenda(conn, "a-1", session, when);
            let speech = fixtures::speech(conn, agenda, None, when, "Tere");

            // text edited behind the flags' back
            conn.execute(
                "UPDATE speeches SET text = 'Stenogramm on koostamisel (osaliselt)' WHERE id = ?1",
                [speech],
            )?;
            // speech and agenda; the session follows its agenda
            assert_eq!(fix_incomplete_flags(conn)?, 2);
            assert!(sessions::get_agenda(conn, agenda)?.unwrap().is_incomplete);
            assert!(sessions::get_session(conn, session)?.unwrap().is_incomplete);
            assert_eq!(
                speeches::get_speech(conn, speech)?.unwrap().text,
                crate::domain::parliament::INCOMPLETE_TEXT
            );

            assert_eq!(fix_incomplete_flags(conn)?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_clear_ai_summaries_by_scope() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let when = fixtures::at(2024, 5, 6, 10, 0, 0);
            let session = fixtures::session(conn, 1, when);
            let agenda = fixtures::agenda(conn, "a-1", session, when);
            let speech = fixtures::speech(conn, agenda, None, when, "Tere");
            speeches::save_speech_summary(conn, speech, "Kõneleja tervitas.")?;
            let draft = AgendaSummaryDraft {
                summary_text: "Arutati eelnõu.".to_string(),
                xml_response: "<agenda/>".to_string(),
                decisions: vec![],
                activity: None,
            };
            summaries::save_agenda_summary(conn, agenda, &draft, false)?;

            assert_eq!(clear_ai_summaries(conn, ClearScope::Agendas)?, 1);
            assert_eq!(scalar(conn, "SELECT COUNT(*) FROM agenda_summaries")?, 0);
            assert!(speeches::get_speech(conn, speech)?.unwrap().ai_summary.is_some());

            assert_eq!(clear_ai_summaries(conn, ClearScope::All)?, 1);
            assert!(speeches::get_speech(conn, speech)?.unwrap().ai_summary.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_clear_scope_from_str() {
        assert_eq!("Speeches".parse::<ClearScope>().unwrap(), ClearScope::Speeches);
        assert!("profiles".parse::<ClearScope>().is_err());
    }
}
