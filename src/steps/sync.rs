//! Step 9: recompute derived aggregates.
//!
//! Speaking times, per-politician profiling counts and the statistics
//! table are all derived from the rows the other steps write. Nothing here
//! talks to the API or the AI provider.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, instrument};

use super::profiles::collect_periods;
use super::StepContext;
use crate::domain::stats::percentage;
use crate::domain::{ProfileCategory, StatisticsEntry, StepReport};
use crate::store::{politicians, profiles, scalar, sessions, speeches, stats};

pub const STEP_NAME: &str = "sync_everything";

/// Seconds credited for the last (or only) speech in an agenda
const LAST_SPEECH_SECONDS: i64 = 30;
const MIN_GAP_SECONDS: i64 = 10;
const MAX_GAP_SECONDS: i64 = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncScope {
    #[default]
    All,
    TotalTimes,
    ProfilingCounts,
    Stats,
}

impl SyncScope {
    fn includes(&self, other: SyncScope) -> bool {
        *self == SyncScope::All || *self == other
    }
}

impl FromStr for SyncScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "all" => Ok(Self::All),
            "total-times" => Ok(Self::TotalTimes),
            "profiling-counts" => Ok(Self::ProfilingCounts),
            "stats" => Ok(Self::Stats),
            other => anyhow::bail!("Unknown sync scope: {}", other),
        }
    }
}

#[instrument(skip(ctx), fields(dry_run = ctx.dry_run))]
pub async fn run(ctx: &StepContext, scope: SyncScope) -> Result<StepReport> {
    let mut report = StepReport::new(STEP_NAME, ctx.dry_run);
    let dry_run = ctx.dry_run;

    if scope.includes(SyncScope::TotalTimes) {
        report.selected += 1;
        let (agendas, politicians) = ctx
            .db
            .with_conn(|conn| sync_total_times(conn, dry_run))
            .context("Total time sync failed")?;
        report.count("agenda_times_updated", agendas);
        report.count("politician_times_updated", politicians);
        report.succeeded += 1;
    }

    if scope.includes(SyncScope::ProfilingCounts) {
        report.selected += 1;
        let updated = ctx
            .db
            .with_conn(|conn| {
                let ids = politicians::politicians_with_speeches(conn, None, None, true)?
                    .into_iter()
                    .map(|p| p.id)
                    .collect::<Vec<_>>();
                sync_profiling_counts(conn, &ids, dry_run)
            })
            .context("Profiling count sync failed")?;
        report.count("profiling_counts_updated", updated);
        report.succeeded += 1;
    }

    if scope.includes(SyncScope::Stats) {
        report.selected += 1;
        let updated = ctx
            .db
            .with_conn(|conn| sync_stats(conn, dry_run))
            .context("Statistics sync failed")?;
        report.count("stats_updated", updated);
        report.succeeded += 1;
    }

    info!(summary = %report.summary(), "Sync finished");
    Ok(report)
}

/// Speaking time credited to one politician within one agenda
///
/// `times` must be sorted. A lone speech counts [`LAST_SPEECH_SECONDS`];
/// otherwise each gap to the next speech is clamped and the last speech
/// adds [`LAST_SPEECH_SECONDS`].
pub fn speaking_seconds(times: &[DateTime<Utc>]) -> i64 {
    match times.len() {
        0 => 0,
        1 => LAST_SPEECH_SECONDS,
        _ => {
            let gaps: i64 = times
                .windows(2)
                .map(|pair| (pair[1] - pair[0]).num_seconds().clamp(MIN_GAP_SECONDS, MAX_GAP_SECONDS))
                .sum();
            gaps + LAST_SPEECH_SECONDS
        }
    }
}

/// Agenda duration: last minus first speech, None below two speeches
pub fn agenda_seconds(times: &[DateTime<Utc>]) -> Option<i64> {
    match (times.first(), times.last()) {
        (Some(first), Some(last)) if times.len() >= 2 => Some((*last - *first).num_seconds()),
        _ => None,
    }
}

/// Returns (agendas updated, politicians updated)
pub fn sync_total_times(conn: &Connection, dry_run: bool) -> Result<(usize, usize)> {
    let mut agendas_updated = 0;
    for agenda_id in sessions::all_agenda_ids(conn)? {
        let times = speeches::agenda_speech_times(conn, agenda_id)?;
        let Some(seconds) = agenda_seconds(&times) else {
            continue;
        };
        let changed = if dry_run {
            sessions::get_agenda(conn, agenda_id)?
                .map(|agenda| agenda.total_time_seconds != Some(seconds))
                .unwrap_or(false)
        } else {
            sessions::set_agenda_total_time(conn, agenda_id, seconds)?
        };
        if changed {
            debug!(agenda_id, seconds, "Agenda total time updated");
            agendas_updated += 1;
        }
    }

    // rows arrive ordered by politician, agenda, date
    let mut totals: HashMap<i64, i64> = HashMap::new();
    let rows = speeches::politician_speech_times(conn)?;
    let mut start = 0;
    while start < rows.len() {
        let (politician_id, agenda_id, _) = rows[start];
        let end = rows[start..]
            .iter()
            .position(|(p, a, _)| (*p, *a) != (politician_id, agenda_id))
            .map_or(rows.len(), |offset| start + offset);
        let times: Vec<DateTime<Utc>> = rows[start..end].iter().map(|(_, _, date)| *date).collect();
        *totals.entry(politician_id).or_default() += speaking_seconds(&times);
        start = end;
    }

    let current: HashMap<i64, Option<i64>> = politicians::list_politicians(conn)?
        .into_iter()
        .map(|p| (p.id, p.total_time_seconds))
        .collect();

    let mut politicians_updated = 0;
    for (politician_id, seconds) in totals {
        if current.get(&politician_id).copied().flatten() == Some(seconds) {
            continue;
        }
        if !dry_run {
            politicians::set_total_time(conn, politician_id, seconds)?;
        }
        debug!(politician_id, seconds, "Politician total time updated");
        politicians_updated += 1;
    }

    info!(agendas_updated, politicians_updated, dry_run, "Total times synced");
    Ok((agendas_updated, politicians_updated))
}

/// Profile parts a politician should eventually have
///
/// One part per category for every agenda, session, month and year the
/// politician spoke in, plus the all-time part.
pub fn required_profiles(conn: &Connection, politician_id: i64) -> Result<i64> {
    let speeches = speeches::speeches_for_politician(conn, politician_id)?;
    if speeches.is_empty() {
        return Ok(0);
    }
    let periods = collect_periods(&speeches).len() + 1;
    Ok((periods * ProfileCategory::ALL.len()) as i64)
}

/// Refresh `profiles_required` and `profiles_already_profiled`
///
/// Returns how many politicians had different counts.
pub fn sync_profiling_counts(conn: &Connection, politician_ids: &[i64], dry_run: bool) -> Result<usize> {
    let mut updated = 0;
    for &politician_id in politician_ids {
        let Some(politician) = politicians::get_politician(conn, politician_id)? else {
            continue;
        };
        let required = required_profiles(conn, politician_id)?;
        let profiled = profiles::count_parts(conn, politician_id)?;
        if (politician.profiles_required, politician.profiles_already_profiled) == (required, profiled) {
            continue;
        }
        if !dry_run {
            politicians::set_profiling_counts(conn, politician_id, required, profiled)?;
        }
        debug!(politician_id, required, profiled, "Profiling counts updated");
        updated += 1;
    }
    info!(politicians = politician_ids.len(), updated, dry_run, "Profiling counts synced");
    Ok(updated)
}

fn filled(column: &str) -> String {
    format!("{0} IS NOT NULL AND {0} != ''", column)
}

/// Compute every statistic from the current rows
pub fn collect_statistics(conn: &Connection) -> Result<Vec<StatisticsEntry>> {
    let count = |sql: &str| scalar(conn, sql);
    let count_where = |table: &str, condition: &str| scalar(conn, &format!("SELECT COUNT(*) FROM {} WHERE {}", table, condition));

    let speeches = count("SELECT COUNT(*) FROM speeches WHERE event_type = 'SPEECH'")?;
    let agendas = count("SELECT COUNT(*) FROM agenda_items")?;
    let sessions = count("SELECT COUNT(*) FROM plenary_sessions")?;
    let parts = count("SELECT COUNT(*) FROM politician_profile_parts")?;
    let summaries = count("SELECT COUNT(*) FROM agenda_summaries")?;
    let decisions = count("SELECT COUNT(*) FROM agenda_decisions")?;
    let activities = count("SELECT COUNT(*) FROM agenda_active_politicians")?;
    let summarized_speeches = count_where("speeches", &format!("event_type = 'SPEECH' AND {}", filled("ai_summary")))?;

    let mut required = 0;
    for politician in politicians::politicians_with_speeches(conn, None, None, true)? {
        required += required_profiles(conn, politician.id)?;
    }

    let mut entries = vec![
        StatisticsEntry::count("Kõned kokku", "Total Speeches", "Всего выступлений", speeches),
        StatisticsEntry::count("Päevakorrapunktid kokku", "Total Agenda Items", "Всего пунктов повестки", agendas),
        StatisticsEntry::share(
            "Kõnede AI kokkuvõtted",
            "Speech AI Summaries",
            "ИИ-резюме выступлений",
            summarized_speeches,
            speeches,
        ),
        StatisticsEntry::share(
            "Struktureeritud päevakorra kokkuvõtted",
            "Structured Agenda Summaries",
            "Структурированные резюме повестки",
            summaries,
            agendas,
        ),
        StatisticsEntry::share(
            "Struktureeritud poliitiku profiilid saadaval",
            "Structured Politician Profiles Available",
            "Доступные структурированные профили политиков",
            parts,
            required,
        ),
        StatisticsEntry::count(
            "Struktureeritud poliitiku profiilid kokku vaja",
            "Structured Politician Profiles Total Required",
            "Всего требуется структурированных профилей политиков",
            required,
        ),
        StatisticsEntry::count("Istungjärgud", "Plenary Sessions", "Пленарные заседания", sessions),
        StatisticsEntry::share(
            "Puudulikud kõned",
            "Incomplete Speeches",
            "Неполные выступления",
            count_where("speeches", "event_type = 'SPEECH' AND is_incomplete = 1")?,
            speeches,
        ),
        StatisticsEntry::share(
            "Puudulikud päevakorrad",
            "Incomplete Agendas",
            "Неполные повестки",
            count_where("agenda_items", "is_incomplete = 1")?,
            agendas,
        ),
        StatisticsEntry::share(
            "Puudulikud istungid",
            "Incomplete Plenary Sessions",
            "Неполные пленарные заседания",
            count_where("plenary_sessions", "is_incomplete = 1")?,
            sessions,
        ),
        StatisticsEntry::share(
            "Puudulikud poliitiku profiilid",
            "Incomplete Politician Profiles",
            "Неполные профили политиков",
            count_where("politician_profile_parts", "is_incomplete = 1")?,
            parts,
        ),
        StatisticsEntry {
            percentage: Some(percentage(
                count("SELECT COUNT(DISTINCT agenda_id) FROM agenda_decisions")?,
                agendas,
            )),
            ..StatisticsEntry::count("Päevakorra otsused", "Agenda Decisions", "Решения повестки", decisions)
        },
        StatisticsEntry::share(
            "Aktiivsed poliitikud päevakorras",
            "Active Politicians in Agendas",
            "Активные политики в повестке",
            activities,
            agendas,
        ),
    ];

    // (estonian suffix, english suffix, russian suffix, column suffix)
    let languages = [
        ("inglise keeles", "in English", "на английском", "en"),
        ("vene keeles", "in Russian", "на русском", "ru"),
    ];
    for (et, en, ru, lang) in languages {
        entries.push(StatisticsEntry::share(
            &format!("Päevakorra AI kokkuvõtted {}", et),
            &format!("Agenda AI Summaries {}", en),
            &format!("ИИ-резюме повестки {}", ru),
            count_where("agenda_summaries", &filled(&format!("summary_text_{}", lang)))?,
            summaries,
        ));
        entries.push(StatisticsEntry::share(
            &format!("Päevakorra pealkirjad {}", et),
            &format!("Agenda Titles {}", en),
            &format!("Заголовки повестки {}", ru),
            count_where("agenda_items", &filled(&format!("title_{}", lang)))?,
            agendas,
        ));
        entries.push(StatisticsEntry::share(
            &format!("Kõnede AI kokkuvõtted {}", et),
            &format!("Speech AI Summaries {}", en),
            &format!("ИИ-резюме выступлений {}", ru),
            count_where(
                "speeches",
                &format!(
                    "event_type = 'SPEECH' AND {} AND {}",
                    filled("ai_summary"),
                    filled(&format!("ai_summary_{}", lang))
                ),
            )?,
            summarized_speeches,
        ));
        entries.push(StatisticsEntry::share(
            &format!("Päevakorra otsused {}", et),
            &format!("Agenda Decisions {}", en),
            &format!("Решения повестки {}", ru),
            count_where("agenda_decisions", &filled(&format!("decision_text_{}", lang)))?,
            decisions,
        ));
        entries.push(StatisticsEntry::share(
            &format!("Aktiivsed poliitikud kirjeldused {}", et),
            &format!("Active Politicians Descriptions {}", en),
            &format!("Описания активных политиков {}", ru),
            count_where("agenda_active_politicians", &filled(&format!("activity_description_{}", lang)))?,
            activities,
        ));
        entries.push(StatisticsEntry::share(
            &format!("Struktureeritud poliitiku profiilid {}", et),
            &format!("Structured Politician Profiles {}", en),
            &format!("Структурированные профили политиков {}", ru),
            count_where("politician_profile_parts", &filled(&format!("analysis_{}", lang)))?,
            parts,
        ));
    }

    Ok(entries)
}

/// Upsert every statistic; returns how many were written
pub fn sync_stats(conn: &Connection, dry_run: bool) -> Result<usize> {
    let entries = collect_statistics(conn)?;
    let mut updated = 0;
    for entry in &entries {
        match entry.percentage {
            Some(pct) => debug!(name = %entry.name, value = entry.value, percentage = pct, "Statistic"),
            None => debug!(name = %entry.name, value = entry.value, "Statistic"),
        }
        if !dry_run {
            stats::upsert_stat(conn, entry)?;
            updated += 1;
        }
    }
    info!(stats = entries.len(), updated, dry_run, "Statistics synced");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ProviderKind;
    use crate::store::{fixtures, Database};

    fn seeded() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let ids = db
            .with_conn(|conn| {
                let mari = fixtures::politician(conn, "p-1", "Mari", "Maasikas");
                let session = fixtures::session(conn, 1, fixtures::at(2024, 3, 4, 10, 0, 0));
                let agenda = fixtures::agenda(conn, "a-1", session, fixtures::at(2024, 3, 4, 10, 0, 0));
                fixtures::speech(conn, agenda, Some(mari), fixtures::at(2024, 3, 4, 10, 0, 0), "Esimene");
                fixtures::speech(conn, agenda, None, fixtures::at(2024, 3, 4, 10, 2, 0), "Vahepeal");
                fixtures::speech(conn, agenda, Some(mari), fixtures::at(2024, 3, 4, 10, 5, 0), "Teine");
                Ok((mari, agenda))
            })
            .unwrap();
        (db, ids.0, ids.1)
    }

    #[test]
    fn test_speaking_seconds_clamps_gaps() {
        let t = |m: u32, s: u32| fixtures::at(2024, 1, 1, 10, m, s);
        assert_eq!(speaking_seconds(&[]), 0);
        assert_eq!(speaking_seconds(&[t(0, 0)]), 30);
        // 300 s gap + 30
        assert_eq!(speaking_seconds(&[t(0, 0), t(5, 0)]), 330);
        // 2 s gap is raised to 10
        assert_eq!(speaking_seconds(&[t(0, 0), t(0, 2)]), 40);
        // 50 min gap is capped at 30 min
        assert_eq!(speaking_seconds(&[t(0, 0), t(50, 0)]), 1830);
    }

    #[test]
    fn test_agenda_seconds_needs_two_speeches() {
        let t = |m: u32| fixtures::at(2024, 1, 1, 10, m, 0);
        assert_eq!(agenda_seconds(&[t(0)]), None);
        assert_eq!(agenda_seconds(&[t(0), t(3), t(10)]), Some(600));
    }

    #[test]
    fn test_sync_total_times_writes_only_changes() {
        let (db, mari, agenda) = seeded();
        db.with_conn(|conn| {
            assert_eq!(sync_total_times(conn, true)?, (1, 1));
            assert_eq!(sessions::get_agenda(conn, agenda)?.unwrap().total_time_seconds, None);

            assert_eq!(sync_total_times(conn, false)?, (1, 1));
            assert_eq!(sessions::get_agenda(conn, agenda)?.unwrap().total_time_seconds, Some(300));
            assert_eq!(politicians::get_politician(conn, mari)?.unwrap().total_time_seconds, Some(330));

            assert_eq!(sync_total_times(conn, false)?, (0, 0));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_profiling_counts() {
        let (db, mari, _) = seeded();
        db.with_conn(|conn| {
            // agenda + session + month + year + all
            assert_eq!(required_profiles(conn, mari)?, 50);
            assert_eq!(sync_profiling_counts(conn, &[mari], false)?, 1);
            let politician = politicians::get_politician(conn, mari)?.unwrap();
            assert_eq!((politician.profiles_required, politician.profiles_already_profiled), (50, 0));
            assert_eq!(sync_profiling_counts(conn, &[mari], false)?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_collect_statistics() {
        let (db, _, _) = seeded();
        db.with_conn(|conn| {
            conn.execute("UPDATE speeches SET ai_summary = 'Kokkuvõte' WHERE text = 'Esimene'", [])?;
            conn.execute("UPDATE agenda_items SET title_en = 'Bill debate'", [])?;

            let entries = collect_statistics(conn)?;
            assert_eq!(entries.len(), 25);

            let find = |name: &str| entries.iter().find(|e| e.name_en == name).unwrap().clone();
            assert_eq!(find("Total Speeches").value, 3);
            let summaries = find("Speech AI Summaries");
            assert_eq!((summaries.value, summaries.percentage), (1, Some(33.3)));
            assert_eq!(find("Structured Politician Profiles Total Required").value, 50);
            assert_eq!(find("Agenda Titles in English").percentage, Some(100.0));
            assert_eq!(find("Agenda Titles in Russian").value, 0);
            // no decisions yet: 0 rather than a division error
            assert_eq!(find("Agenda Decisions").percentage, Some(0.0));
            Ok(())
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_run_dry_run_writes_nothing() {
        let (db, _, _) = seeded();
        let ctx = StepContext::dry_run(db.clone(), ProviderKind::Gemini, 10);

        let report = run(&ctx, SyncScope::All).await.unwrap();
        assert_eq!((report.selected, report.succeeded), (3, 3));
        assert_eq!(report.counter("agenda_times_updated"), 1);
        assert!(db.with_conn(stats::list_stats).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_single_scope() {
        let (db, _, _) = seeded();
        let ctx = StepContext::dry_run(db.clone(), ProviderKind::Gemini, 10);
        let ctx = StepContext { dry_run: false, ..ctx };

        let report = run(&ctx, SyncScope::Stats).await.unwrap();
        assert_eq!(report.selected, 1);
        assert_eq!(report.counter("stats_updated"), 25);
        assert_eq!(db.with_conn(stats::list_stats).unwrap().len(), 25);
    }

    #[test]
    fn test_scope_from_str() {
        assert_eq!("total_times".parse::<SyncScope>().unwrap(), SyncScope::TotalTimes);
        assert_eq!("profiling-counts".parse::<SyncScope>().unwrap(), SyncScope::ProfilingCounts);
        assert!("everything".parse::<SyncScope>().is_err());
    }
}
