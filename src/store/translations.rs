//! Generic access to translatable text columns.
//!
//! Every translatable field has an Estonian source column and `_en`/`_ru`
//! target columns on the same table.

use std::fmt;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

/// A translatable text column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranslationField {
    AgendaTitle,
    SessionTitle,
    SpeechSummary,
    AgendaSummaryText,
    DecisionText,
    ActivityDescription,
    ProfileAnalysis,
}

struct FieldSql {
    table: &'static str,
    source: &'static str,
    en: &'static str,
    ru: &'static str,
    /// FROM clause; the translated table is aliased `t`
    from: &'static str,
    order: &'static str,
}

impl TranslationField {
    fn sql(&self) -> FieldSql {
        match self {
            Self::AgendaTitle => FieldSql {
                table: "agenda_items",
                source: "title",
                en: "title_en",
                ru: "title_ru",
                from: "agenda_items t",
                order: "t.date DESC, t.id DESC",
            },
            Self::SessionTitle => FieldSql {
                table: "plenary_sessions",
                source: "title",
                en: "title_en",
                ru: "title_ru",
                from: "plenary_sessions t",
                order: "t.date DESC, t.id DESC",
            },
            Self::SpeechSummary => FieldSql {
                table: "speeches",
                source: "ai_summary",
                en: "ai_summary_en",
                ru: "ai_summary_ru",
                from: "speeches t",
                order: "t.date DESC, t.id DESC",
            },
            Self::AgendaSummaryText => FieldSql {
                table: "agenda_summaries",
                source: "summary_text",
                en: "summary_text_en",
                ru: "summary_text_ru",
                from: "agenda_summaries t JOIN agenda_items a ON a.id = t.agenda_id",
                order: "a.date DESC, t.id DESC",
            },
            Self::DecisionText => FieldSql {
                table: "agenda_decisions",
                source: "decision_text",
                en: "decision_text_en",
                ru: "decision_text_ru",
                from: "agenda_decisions t JOIN agenda_items a ON a.id = t.agenda_id",
                order: "a.date DESC, t.id DESC",
            },
            Self::ActivityDescription => FieldSql {
                table: "agenda_active_politicians",
                source: "activity_description",
                en: "activity_description_en",
                ru: "activity_description_ru",
                from: "agenda_active_politicians t JOIN agenda_items a ON a.id = t.agenda_id",
                order: "a.date DESC, t.id DESC",
            },
            Self::ProfileAnalysis => FieldSql {
                table: "politician_profile_parts",
                source: "analysis",
                en: "analysis_en",
                ru: "analysis_ru",
                from: "politician_profile_parts t",
                order: "t.politician_id, t.id",
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AgendaTitle => "agenda titles",
            Self::SessionTitle => "session titles",
            Self::SpeechSummary => "speech summaries",
            Self::AgendaSummaryText => "agenda summaries",
            Self::DecisionText => "agenda decisions",
            Self::ActivityDescription => "active politicians",
            Self::ProfileAnalysis => "profile analyses",
        }
    }
}

impl fmt::Display for TranslationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A row whose source text needs one or both translations
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationItem {
    pub id: i64,
    pub source: String,
    pub needs_en: bool,
    pub needs_ru: bool,
}

/// Rows with non-empty source text and a missing wanted translation
///
/// With `overwrite`, every row with source text, and both wanted languages.
pub fn pending(
    conn: &Connection,
    field: TranslationField,
    want_en: bool,
    want_ru: bool,
    overwrite: bool,
    limit: Option<usize>,
) -> Result<Vec<TranslationItem>> {
    let f = field.sql();
    let sql = format!(
        "SELECT t.id, t.{src}, t.{en} IS NULL, t.{ru} IS NULL FROM {from}
         WHERE t.{src} IS NOT NULL AND trim(t.{src}) != ''
           AND (?1 = 1 OR (?2 = 1 AND t.{en} IS NULL) OR (?3 = 1 AND t.{ru} IS NULL))
         ORDER BY {order}
         LIMIT ?4",
        src = f.source,
        en = f.en,
        ru = f.ru,
        from = f.from,
        order = f.order,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            overwrite && (want_en || want_ru),
            want_en,
            want_ru,
            limit.map(|l| l as i64).unwrap_or(-1)
        ],
        |row| {
            let en_missing: bool = row.get(2)?;
            let ru_missing: bool = row.get(3)?;
            Ok(TranslationItem {
                id: row.get(0)?,
                source: row.get(1)?,
                needs_en: want_en && (overwrite || en_missing),
                needs_ru: want_ru && (overwrite || ru_missing),
            })
        },
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Write translations; `None` leaves that language untouched
pub fn save(
    conn: &Connection,
    field: TranslationField,
    id: i64,
    en: Option<&str>,
    ru: Option<&str>,
) -> Result<()> {
    let f = field.sql();
    let sql = format!(
        "UPDATE {table} SET {en} = COALESCE(?2, {en}), {ru} = COALESCE(?3, {ru}) WHERE id = ?1",
        table = f.table,
        en = f.en,
        ru = f.ru,
    );
    conn.execute(&sql, params![id, en, ru])
        .with_context(|| format!("Failed to save translation for {} {}", field, id))?;
    Ok(())
}
