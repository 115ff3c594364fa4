//! Main orchestrator for the daily routine.
//!
//! Runs the nine steps in order under an exclusive lock, logging every state
//! change to the run's event store and retrying failed steps with backoff.
//! Steps are executed through a [`StepRunner`], so the orchestration logic
//! does not depend on the database, the API or the AI provider.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::build_adapter;
use crate::config::ResolvedConfig;
use crate::domain::{Event, EventType, Run, RunState, StepReport, StepStatus};
use crate::riigikogu::RiigikoguClient;
use crate::steps::agenda_summaries::{self, AgendaSummaryOptions};
use crate::steps::parse::{self, ParseOptions};
use crate::steps::profiles::{self, ProfileOptions};
use crate::steps::speech_summaries::{self, SpeechSummaryOptions};
use crate::steps::sync::{self, SyncScope};
use crate::steps::translate::{self, AgendaScope, TranslateOptions, TranslateTarget};
use crate::steps::StepContext;
use crate::store::Database;

use super::event_store::{generate_idempotency_key, EventStore};
use super::pipeline::{RetryPolicy, RoutineError, RoutineOptions, RoutineStep, ROUTINE_NAME};

/// Executes a single routine step
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(&self, step: RoutineStep, options: &RoutineOptions) -> Result<StepReport>;

    /// Checked once before the routine takes its lock
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Runs steps against the real database, API and AI provider
pub struct LiveSteps {
    ctx: StepContext,
    client: RiigikoguClient,
}

impl LiveSteps {
    pub fn new(ctx: StepContext, client: RiigikoguClient) -> Self {
        Self { ctx, client }
    }

    /// Open the database and build the adapter and API client from config
    pub fn from_config(config: &ResolvedConfig, options: &RoutineOptions) -> Result<Self> {
        let db = Database::open(&config.database)?;
        let adapter = build_adapter(&config.ai, options.provider, options.dry_run)?;
        let client = RiigikoguClient::new(
            config.api.base_url.clone(),
            Duration::from_secs(config.api.timeout_seconds),
            Duration::from_secs(config.api.verbatims_timeout_seconds),
        )?;
        let ctx = StepContext::new(db, adapter, options.provider, options.batch_size, options.dry_run);
        Ok(Self::new(ctx, client))
    }
}

#[async_trait]
impl StepRunner for LiveSteps {
    async fn run_step(&self, step: RoutineStep, options: &RoutineOptions) -> Result<StepReport> {
        let ctx = &self.ctx;
        let translate_options = TranslateOptions::default();
        match step {
            RoutineStep::Parse => {
                let parse_options = ParseOptions {
                    start_date: Some(options.start_date),
                    end_date: Some(Utc::now().date_naive()),
                    ..Default::default()
                };
                parse::run(ctx, &self.client, &parse_options).await
            }
            RoutineStep::SpeechSummaries => speech_summaries::run(ctx, &SpeechSummaryOptions::default()).await,
            RoutineStep::AgendaSummaries => agenda_summaries::run(ctx, &AgendaSummaryOptions::default()).await,
            RoutineStep::TranslateAgendas => {
                translate::run(ctx, TranslateTarget::Agendas(AgendaScope::All), &translate_options).await
            }
            RoutineStep::TranslateSessionTitles => {
                translate::run(ctx, TranslateTarget::SessionTitles, &translate_options).await
            }
            RoutineStep::TranslateSpeechSummaries => {
                translate::run(ctx, TranslateTarget::SpeechSummaries, &translate_options).await
            }
            RoutineStep::ProfilePoliticians => profiles::run(ctx, &ProfileOptions::default()).await,
            RoutineStep::TranslateProfiles => translate::run(ctx, TranslateTarget::Profiles, &translate_options).await,
            RoutineStep::SyncEverything => sync::run(ctx, SyncScope::All).await,
        }
    }

    async fn health_check(&self) -> Result<()> {
        let adapter = &self.ctx.adapter;
        adapter
            .health_check()
            .await
            .with_context(|| format!("AI provider '{}' is not usable", adapter.name()))
    }
}

/// Main routine orchestrator
pub struct Orchestrator {
    runs_dir: PathBuf,
    lock_path: PathBuf,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(runs_dir: impl Into<PathBuf>, lock_path: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            runs_dir: runs_dir.into(),
            lock_path: lock_path.into(),
            retry,
        }
    }

    /// Runs and lock live under the configured home directory
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(
            config.home.join("runs"),
            config.home.join("routine.lock"),
            config.routine.retry.clone(),
        )
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Take the routine lock; it is released when the file is dropped
    fn acquire_lock(&self) -> Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lock directory: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .with_context(|| format!("Failed to open lock file: {}", self.lock_path.display()))?;

        file.try_lock_exclusive()
            .map_err(|_| RoutineError::AlreadyRunning(self.lock_path.display().to_string()))?;
        Ok(file)
    }

    /// Run the whole routine
    #[instrument(skip(self, runner, options), fields(routine = ROUTINE_NAME, dry_run = options.dry_run))]
    pub async fn run_routine(&self, runner: &dyn StepRunner, options: &RoutineOptions) -> Result<Run> {
        options.validate()?;
        runner.health_check().await?;
        let _lock = self.acquire_lock()?;

        let run_id = Uuid::new_v4();
        info!(%run_id, options = %options.describe(), "Starting routine");

        let store = EventStore::open_in(&self.runs_dir, run_id).await?;
        let mut run = Run::new(run_id, ROUTINE_NAME.to_string(), options.describe());

        let start_event = Event::new(
            run_id,
            None,
            EventType::RunStarted,
            format!("{}:start", run_id),
            format!("Routine '{}' started: {}", ROUTINE_NAME, options.describe()),
            StepStatus::Running,
        );
        store.append(&start_event).await?;

        for step in RoutineStep::ALL {
            if step == RoutineStep::Parse && options.skip_parse {
                self.skip_step(&store, &mut run, step, "--skip-parse").await?;
                continue;
            }

            info!(step = %step, number = step.number(), "Running step");
            match self.execute_step_with_retry(&store, &mut run, runner, step, options).await {
                Ok(report) => {
                    info!(step = %step, summary = %report.summary(), "{}", step.description());
                    run.reports.insert(step.as_str().to_string(), report);
                    run.current_step += 1;
                }
                Err(e) => {
                    let e = e.context(format!("Step {} ({}) failed", step.number(), step));
                    return self.handle_run_failure(&store, &mut run, e).await;
                }
            }
        }

        self.complete_run(&store, &mut run).await
    }

    async fn skip_step(&self, store: &EventStore, run: &mut Run, step: RoutineStep, reason: &str) -> Result<()> {
        info!(step = %step, reason, "Skipping step");
        let event = Event::new(
            run.id,
            Some(step.as_str().to_string()),
            EventType::StepSkipped,
            format!("{}:{}:skipped", run.id, step),
            format!("Step '{}' skipped ({})", step, reason),
            StepStatus::Skipped,
        );
        store.append(&event).await?;
        run.set_step_status(step.as_str(), StepStatus::Skipped);
        run.current_step += 1;
        Ok(())
    }

    /// Execute a step with retry logic
    async fn execute_step_with_retry(
        &self,
        store: &EventStore,
        run: &mut Run,
        runner: &dyn StepRunner,
        step: RoutineStep,
        options: &RoutineOptions,
    ) -> Result<StepReport> {
        let step_name = step.as_str().to_string();
        let idem_key = generate_idempotency_key(run.id, &step_name, &options.describe());
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let step_start = Instant::now();

            let start_event = Event::new(
                run.id,
                Some(step_name.clone()),
                EventType::StepStarted,
                idem_key.clone(),
                format!("Step '{}' attempt {}", step_name, attempt),
                StepStatus::Running,
            );
            store.append(&start_event).await?;
            run.set_step_status(&step_name, StepStatus::Running);

            let result = runner.run_step(step, options).await;
            let duration_ms = step_start.elapsed().as_millis() as u64;

            match result {
                Ok(report) => {
                    let complete_event = Event::new(
                        run.id,
                        Some(step_name.clone()),
                        EventType::StepCompleted,
                        idem_key,
                        format!("Step '{}' completed in {}ms: {}", step_name, duration_ms, report.summary()),
                        StepStatus::Completed,
                    )
                    .with_duration(duration_ms)
                    .with_report(report.clone());
                    store.append(&complete_event).await?;
                    run.set_step_status(&step_name, StepStatus::Completed);

                    return Ok(report);
                }
                Err(e) => {
                    let message = format!("{:#}", e);

                    if self.retry.should_retry(attempt) {
                        let delay = self.retry.delay_for_attempt(attempt);

                        let retry_event = Event::new(
                            run.id,
                            Some(step_name.clone()),
                            EventType::StepRetrying,
                            format!("{}:retry:{}", idem_key, attempt),
                            format!("Step '{}' failed, retrying in {:?}: {}", step_name, delay, message),
                            StepStatus::Running,
                        )
                        .with_error(message.clone());
                        store.append(&retry_event).await?;

                        warn!(
                            step = %step_name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "Step failed, retrying"
                        );

                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let fail_event = Event::new(
                        run.id,
                        Some(step_name.clone()),
                        EventType::StepFailed,
                        idem_key,
                        format!("Step '{}' failed after {} attempts: {}", step_name, attempt, message),
                        StepStatus::Failed,
                    )
                    .with_duration(duration_ms)
                    .with_error(message.clone());
                    store.append(&fail_event).await?;
                    run.set_step_status(&step_name, StepStatus::Failed);

                    error!(step = %step_name, attempt, error = %message, "Step failed permanently");

                    return Err(e);
                }
            }
        }
    }

    /// Handle a run failure
    async fn handle_run_failure(&self, store: &EventStore, run: &mut Run, error: anyhow::Error) -> Result<Run> {
        let error_msg = format!("{:#}", error);
        error!(%error_msg, "Routine failed");

        run.state = RunState::Failed {
            error: error_msg.clone(),
        };
        run.completed_at = Some(Utc::now());

        let event = Event::new(
            run.id,
            None,
            EventType::RunFailed,
            format!("{}:complete", run.id),
            format!("Routine '{}' failed: {}", run.routine_name, error_msg),
            StepStatus::Failed,
        )
        .with_error(error_msg);
        store.append(&event).await?;

        Ok(run.clone())
    }

    /// Complete a successful run
    async fn complete_run(&self, store: &EventStore, run: &mut Run) -> Result<Run> {
        info!(run_id = %run.id, "Routine completed successfully");

        run.state = RunState::Completed;
        run.completed_at = Some(Utc::now());

        let event = Event::new(
            run.id,
            None,
            EventType::RunCompleted,
            format!("{}:complete", run.id),
            format!("Routine '{}' completed", run.routine_name),
            StepStatus::Completed,
        );
        store.append(&event).await?;

        Ok(run.clone())
    }

    /// Get status of a run by ID
    pub async fn get_run_status(&self, run_id: Uuid) -> Result<Run> {
        let run_dir = self.runs_dir.join(run_id.to_string());
        if !run_dir.exists() {
            anyhow::bail!("Run {} not found", run_id);
        }

        let store = EventStore::open_in(&self.runs_dir, run_id).await?;
        let events = store.replay().await?;
        if events.is_empty() {
            anyhow::bail!("Run {} not found", run_id);
        }

        Run::from_events(&events).context("Failed to reconstruct run state")
    }

    /// Most recent runs first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let run_ids = EventStore::list_runs_in(&self.runs_dir).await?;
        let mut runs = Vec::new();

        for run_id in run_ids {
            match self.get_run_status(run_id).await {
                Ok(run) => runs.push(run),
                Err(e) => warn!(%run_id, error = %e, "Skipping unreadable run"),
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records calls; fails `failing` for its first `failures` attempts
    struct FakeSteps {
        calls: Mutex<Vec<RoutineStep>>,
        failing: Option<RoutineStep>,
        failures: AtomicUsize,
        healthy: bool,
    }

    impl FakeSteps {
        fn new(failing: Option<RoutineStep>, failures: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing,
                failures: AtomicUsize::new(failures),
                healthy: true,
            }
        }

        fn calls(&self) -> Vec<RoutineStep> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StepRunner for FakeSteps {
        async fn run_step(&self, step: RoutineStep, options: &RoutineOptions) -> Result<StepReport> {
            self.calls.lock().unwrap().push(step);
            if Some(step) == self.failing
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                anyhow::bail!("{} exploded", step)
            }
            let mut report = StepReport::new(step.as_str(), options.dry_run);
            report.selected = 2;
            report.succeeded = 2;
            Ok(report)
        }

        async fn health_check(&self) -> Result<()> {
            if self.healthy {
                Ok(())
            } else {
                anyhow::bail!("provider command not found")
            }
        }
    }

    fn orchestrator(temp: &TempDir) -> Orchestrator {
        let retry = RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 1,
            backoff_multiplier: 1.0,
        };
        Orchestrator::new(temp.path().join("runs"), temp.path().join("routine.lock"), retry)
    }

    #[tokio::test]
    async fn test_routine_runs_every_step_in_order() {
        let temp = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp);
        let steps = FakeSteps::new(None, 0);

        let run = orchestrator.run_routine(&steps, &RoutineOptions::default()).await.unwrap();

        assert_eq!(run.state, RunState::Completed);
        assert_eq!(steps.calls(), RoutineStep::ALL.to_vec());
        assert_eq!(run.current_step, 9);
        assert_eq!(run.reports.len(), 9);

        let replayed = orchestrator.get_run_status(run.id).await.unwrap();
        assert_eq!(replayed.state, RunState::Completed);
        assert_eq!(replayed.routine_name, ROUTINE_NAME);
        assert_eq!(replayed.reports["sync_everything"].succeeded, 2);
        assert_eq!(
            replayed.step_order,
            RoutineStep::ALL.iter().map(|s| s.as_str().to_string()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_skip_parse_records_skipped_step() {
        let temp = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp);
        let steps = FakeSteps::new(None, 0);
        let options = RoutineOptions {
            skip_parse: true,
            dry_run: true,
            ..Default::default()
        };

        let run = orchestrator.run_routine(&steps, &options).await.unwrap();

        assert!(!steps.calls().contains(&RoutineStep::Parse));
        assert_eq!(run.step_status("parse"), Some(StepStatus::Skipped));
        assert_eq!(run.current_step, 9);
        assert!(run.reports["speech_summaries"].dry_run);
    }

    #[tokio::test]
    async fn test_step_retried_then_succeeds() {
        let temp = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp);
        let steps = FakeSteps::new(Some(RoutineStep::AgendaSummaries), 1);

        let run = orchestrator.run_routine(&steps, &RoutineOptions::default()).await.unwrap();
        assert_eq!(run.state, RunState::Completed);

        let store = EventStore::open_in(orchestrator.runs_dir(), run.id).await.unwrap();
        let events = store.replay().await.unwrap();
        let retries: Vec<&Event> = events
            .iter()
            .filter(|e| e.event_type == EventType::StepRetrying)
            .collect();
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].step_id.as_deref(), Some("agenda_summaries"));
        assert!(retries[0].error.as_deref().unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn test_failed_step_stops_routine() {
        let temp = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp);
        let steps = FakeSteps::new(Some(RoutineStep::TranslateAgendas), 5);

        let run = orchestrator.run_routine(&steps, &RoutineOptions::default()).await.unwrap();

        match &run.state {
            RunState::Failed { error } => {
                assert!(error.contains("Step 4 (translate_agendas) failed"));
                assert!(error.contains("translate_agendas exploded"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(run.step_status("translate_agendas"), Some(StepStatus::Failed));
        assert!(!steps.calls().contains(&RoutineStep::TranslateSessionTitles));
        // two attempts of step 4
        assert_eq!(steps.calls().len(), 5);

        let store = EventStore::open_in(orchestrator.runs_dir(), run.id).await.unwrap();
        let last = store.replay().await.unwrap().pop().unwrap();
        assert_eq!(last.event_type, EventType::RunFailed);
    }

    #[tokio::test]
    async fn test_lock_prevents_concurrent_routines() {
        let temp = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp);
        let _held = orchestrator.acquire_lock().unwrap();

        let err = orchestrator
            .run_routine(&FakeSteps::new(None, 0), &RoutineOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<RoutineError>(), Some(RoutineError::AlreadyRunning(_))));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_running() {
        let temp = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp);
        let steps = FakeSteps::new(None, 0);
        let options = RoutineOptions {
            batch_size: 0,
            ..Default::default()
        };

        let err = orchestrator.run_routine(&steps, &options).await.unwrap_err();
        assert_eq!(err.downcast_ref::<RoutineError>(), Some(&RoutineError::InvalidBatchSize));
        assert!(steps.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unhealthy_provider_fails_before_any_run() {
        let temp = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp);
        let steps = FakeSteps {
            healthy: false,
            ..FakeSteps::new(None, 0)
        };

        let err = orchestrator
            .run_routine(&steps, &RoutineOptions::default())
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("provider command not found"));
        assert!(steps.calls().is_empty());
        assert!(orchestrator.list_runs(10).await.unwrap().is_empty());
        // lock was never taken
        assert!(orchestrator.acquire_lock().is_ok());
    }

    #[tokio::test]
    async fn test_list_runs_most_recent_first() {
        let temp = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp);
        let steps = FakeSteps::new(None, 0);

        let first = orchestrator.run_routine(&steps, &RoutineOptions::default()).await.unwrap();
        let second = orchestrator.run_routine(&steps, &RoutineOptions::default()).await.unwrap();

        let runs = orchestrator.list_runs(10).await.unwrap();
        assert_eq!(runs.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second.id, first.id]);
        assert_eq!(orchestrator.list_runs(1).await.unwrap().len(), 1);
        assert!(orchestrator.get_run_status(Uuid::new_v4()).await.is_err());
    }
}
