//! Command-line interface for the Riigikogu pipeline.
//!
//! Provides the daily routine, each step as its own command, maintenance
//! commands, and run inspection.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::adapters::{build_adapter, ProviderKind};
use crate::config::{self, ResolvedConfig};
use crate::core::{parse_date, LiveSteps, Orchestrator, RoutineError, RoutineOptions, RoutineStep};
use crate::domain::{Run, RunState, StepReport, StepStatus};
use crate::riigikogu::RiigikoguClient;
use crate::steps::agenda_summaries::{self, AgendaSummaryOptions};
use crate::steps::maintenance::{self, ClearScope};
use crate::steps::parse::{self, ParseOptions};
use crate::steps::profiles::{self, ProfileOptions};
use crate::steps::speech_summaries::{self, SpeechSummaryOptions};
use crate::steps::sync::{self, SyncScope};
use crate::steps::translate::{self, AgendaScope, TargetLanguage, TranslateOptions, TranslateTarget};
use crate::steps::StepContext;
use crate::store::Database;

/// riigikogu - Estonian Parliament data pipeline
#[derive(Parser, Debug)]
#[command(name = "riigikogu")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by the AI-backed commands
#[derive(clap::Args, Debug, Clone)]
pub struct AiArgs {
    /// AI provider (claude, openai, ollama, gemini); defaults to the configured one
    #[arg(long = "ai-provider")]
    provider: Option<ProviderKind>,

    /// Items processed concurrently per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Select and report, but never call the AI provider or write
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the nine-step daily routine
    DailyRoutine {
        /// First day to parse (YYYY-MM-DD); defaults to January 1 of this year
        #[arg(long, value_parser = parse_date)]
        start_date: Option<NaiveDate>,

        /// Skip step 1 (parsing)
        #[arg(long)]
        skip_parse: bool,

        #[command(flatten)]
        ai: AiArgs,
    },

    /// Parse speeches from the Riigikogu API
    Parse {
        /// Days back from the end date when no start date is given
        #[arg(long, default_value = "30")]
        days: i64,

        #[arg(long, value_parser = parse_date)]
        start_date: Option<NaiveDate>,

        /// Defaults to today
        #[arg(long, value_parser = parse_date)]
        end_date: Option<NaiveDate>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize speeches that have no AI summary
    SummarizeSpeeches {
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        overwrite: bool,

        #[command(flatten)]
        ai: AiArgs,
    },

    /// Summarize agendas, their decisions and the most active politician
    SummarizeAgendas {
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        overwrite: bool,

        #[command(flatten)]
        ai: AiArgs,
    },

    /// Translate Estonian texts to English and Russian
    Translate {
        #[arg(value_enum)]
        target: TranslateKind,

        /// en, ru or both
        #[arg(long, default_value = "both")]
        target_language: TargetLanguage,

        /// Agenda texts to translate (titles, summaries, decisions, active-politicians, all)
        #[arg(long, default_value = "all")]
        agenda_scope: AgendaScope,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        overwrite: bool,

        #[command(flatten)]
        ai: AiArgs,
    },

    /// Generate politician profiles
    Profile {
        /// Profile a single politician
        #[arg(long)]
        politician_id: Option<i64>,

        /// Skip politicians with a lower id
        #[arg(long)]
        start_from_id: Option<i64>,

        #[arg(long)]
        limit: Option<usize>,

        /// Politicians profiled concurrently
        #[arg(long, default_value = "5")]
        max_workers: usize,

        #[arg(long)]
        overwrite: bool,

        #[command(flatten)]
        ai: AiArgs,
    },

    /// Recompute total times, profiling counts and statistics
    Sync {
        /// all, total-times, profiling-counts or stats
        #[arg(default_value = "all")]
        scope: SyncScope,

        #[arg(long)]
        dry_run: bool,
    },

    /// Re-derive incompleteness flags for speeches, agendas and sessions
    FixIncompleteFlags,

    /// Delete AI summaries and their translations
    ClearSummaries {
        /// speeches, agendas or all
        scope: ClearScope,
    },

    /// Check the status of a routine run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent routine runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Translation targets for the CLI (maps to TranslateTarget)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TranslateKind {
    Agendas,
    SessionTitles,
    SpeechSummaries,
    Profiles,
}

impl TranslateKind {
    fn target(self, scope: AgendaScope) -> TranslateTarget {
        match self {
            Self::Agendas => TranslateTarget::Agendas(scope),
            Self::SessionTitles => TranslateTarget::SessionTitles,
            Self::SpeechSummaries => TranslateTarget::SpeechSummaries,
            Self::Profiles => TranslateTarget::Profiles,
        }
    }
}

impl Cli {
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let verbose = self.verbose;
        match self.command {
            Commands::DailyRoutine { start_date, skip_parse, ai } => {
                daily_routine(start_date, skip_parse, ai, verbose).await
            }
            Commands::Parse {
                days,
                start_date,
                end_date,
                dry_run,
            } => {
                let options = ParseOptions {
                    start_date,
                    end_date,
                    days,
                };
                run_parse(&options, dry_run).await
            }
            Commands::SummarizeSpeeches { limit, overwrite, ai } => {
                let ctx = step_context(&ai)?;
                let options = SpeechSummaryOptions {
                    limit,
                    overwrite,
                    ..Default::default()
                };
                print_report(&speech_summaries::run(&ctx, &options).await?);
                Ok(())
            }
            Commands::SummarizeAgendas { limit, overwrite, ai } => {
                let ctx = step_context(&ai)?;
                let options = AgendaSummaryOptions { overwrite, limit };
                print_report(&agenda_summaries::run(&ctx, &options).await?);
                Ok(())
            }
            Commands::Translate {
                target,
                target_language,
                agenda_scope,
                limit,
                overwrite,
                ai,
            } => {
                let ctx = step_context(&ai)?;
                let options = TranslateOptions {
                    target_language,
                    overwrite,
                    limit,
                };
                print_report(&translate::run(&ctx, target.target(agenda_scope), &options).await?);
                Ok(())
            }
            Commands::Profile {
                politician_id,
                start_from_id,
                limit,
                max_workers,
                overwrite,
                ai,
            } => {
                let ctx = step_context(&ai)?;
                let options = ProfileOptions {
                    politician_id,
                    start_from_id,
                    limit,
                    max_workers,
                    overwrite,
                };
                print_report(&profiles::run(&ctx, &options).await?);
                Ok(())
            }
            Commands::Sync { scope, dry_run } => {
                let cfg = config::config()?;
                let ctx = StepContext::dry_run(open_database(cfg)?, cfg.ai.provider, cfg.routine.batch_size);
                let ctx = StepContext { dry_run, ..ctx };
                print_report(&sync::run(&ctx, scope).await?);
                Ok(())
            }
            Commands::FixIncompleteFlags => {
                let db = open_database(config::config()?)?;
                let changed = db.with_conn(maintenance::fix_incomplete_flags)?;
                println!("Fixed {} incomplete flags", changed);
                Ok(())
            }
            Commands::ClearSummaries { scope } => {
                let db = open_database(config::config()?)?;
                let cleared = db.with_conn(|conn| maintenance::clear_ai_summaries(conn, scope))?;
                println!("Cleared {} summaries", cleared);
                Ok(())
            }
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Config => show_config(),
        }
    }
}

fn open_database(cfg: &ResolvedConfig) -> Result<Database> {
    Database::open(&cfg.database)
        .with_context(|| format!("Failed to open database: {}", cfg.database.display()))
}

/// Build a step context from the shared AI flags and the configuration
fn step_context(ai: &AiArgs) -> Result<StepContext> {
    let cfg = config::config()?;
    let provider = ai.provider.unwrap_or(cfg.ai.provider);
    let batch_size = ai.batch_size.unwrap_or(cfg.routine.batch_size);
    if batch_size == 0 {
        return Err(RoutineError::InvalidBatchSize.into());
    }
    let adapter = build_adapter(&cfg.ai, provider, ai.dry_run)?;
    Ok(StepContext::new(open_database(cfg)?, adapter, provider, batch_size, ai.dry_run))
}

fn print_report(report: &StepReport) {
    println!("{}", report.summary());
}

/// Run the daily routine and print the per-step summary
async fn daily_routine(start_date: Option<NaiveDate>, skip_parse: bool, ai: AiArgs, verbose: bool) -> Result<()> {
    let cfg = config::config()?;
    let options = RoutineOptions {
        start_date: start_date.unwrap_or_else(crate::core::default_start_date),
        batch_size: ai.batch_size.unwrap_or(cfg.routine.batch_size),
        provider: ai.provider.unwrap_or(cfg.ai.provider),
        dry_run: ai.dry_run,
        skip_parse,
        verbose,
    };
    options.validate()?;

    let steps = LiveSteps::from_config(cfg, &options)?;
    let orchestrator = Orchestrator::from_config(cfg);
    let run = orchestrator.run_routine(&steps, &options).await?;

    print_routine_summary(&run);
    if options.dry_run {
        println!("\nDry run: no AI calls were made and nothing was written.");
    }

    match &run.state {
        RunState::Completed => {
            eprintln!("\n[Run {} completed successfully]", run.id);
            Ok(())
        }
        RunState::Failed { error } => {
            eprintln!("\n[Run {} failed: {}]", run.id, error);
            std::process::exit(1);
        }
        RunState::Running => {
            eprintln!("\n[Run {} in state: {:?}]", run.id, run.state);
            Ok(())
        }
    }
}

fn step_marker(status: Option<StepStatus>) -> &'static str {
    match status {
        Some(StepStatus::Completed) => "✅",
        Some(StepStatus::Skipped) => "⏭️",
        Some(StepStatus::Failed) => "❌",
        Some(StepStatus::Running) => "…",
        Some(StepStatus::Pending) | None => "  ",
    }
}

fn print_routine_summary(run: &Run) {
    println!("\nDaily routine summary ({}):", run.id);
    for step in RoutineStep::ALL {
        let status = run.step_status(step.as_str());
        let marker = step_marker(status);
        match run.reports.get(step.as_str()) {
            Some(report) => println!("{} {}. {} ({})", marker, step.number(), step.description(), report.summary()),
            None => println!("{} {}. {}", marker, step.number(), step.description()),
        }
    }
}

async fn run_parse(options: &ParseOptions, dry_run: bool) -> Result<()> {
    let cfg = config::config()?;
    let client = RiigikoguClient::new(
        cfg.api.base_url.clone(),
        std::time::Duration::from_secs(cfg.api.timeout_seconds),
        std::time::Duration::from_secs(cfg.api.verbatims_timeout_seconds),
    )?;
    let ctx = StepContext::dry_run(open_database(cfg)?, cfg.ai.provider, cfg.routine.batch_size);
    let ctx = StepContext { dry_run, ..ctx };
    print_report(&parse::run(&ctx, &client, options).await?);
    Ok(())
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let orchestrator = Orchestrator::from_config(config::config()?);
    let run = orchestrator.get_run_status(run_id).await?;

    println!("Run ID: {}", run.id);
    println!("Routine: {}", run.routine_name);
    println!("Options: {}", run.options);
    println!("State: {:?}", run.state);
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    println!("Current step: {}", run.current_step);
    println!("\nStep statuses:");
    for step in &run.step_order {
        let status = run.step_status(step);
        println!("  {} {}: {:?}", step_marker(status), step, status.unwrap_or(StepStatus::Pending));
        if let Some(report) = run.reports.get(step) {
            println!("      {}", report.summary());
        }
    }

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config::config()?);
    let runs = orchestrator.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<22} {:<11} {:<6}", "RUN ID", "STARTED", "STATE", "STEPS");
    println!("{}", "-".repeat(80));

    for run in runs {
        let state_str = match &run.state {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed { .. } => "failed",
        };
        println!(
            "{:<38} {:<22} {:<11} {}/{}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            state_str,
            run.current_step,
            RoutineStep::ALL.len()
        );
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;
    let display = |p: &Option<PathBuf>| {
        p.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    };

    println!("Riigikogu pipeline configuration");
    println!();
    println!("Config file: {}", display(&cfg.config_file));
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database.display());
    println!("  Runs:     {}", cfg.home.join("runs").display());
    println!();
    println!("API:");
    println!("  Base URL:          {}", cfg.api.base_url);
    println!("  Timeout:           {}s", cfg.api.timeout_seconds);
    println!("  Verbatims timeout: {}s", cfg.api.verbatims_timeout_seconds);
    println!();
    println!("AI:");
    println!("  Provider:        {}", cfg.ai.provider);
    println!("  Request timeout: {}s", cfg.ai.request_timeout_seconds);
    for kind in ProviderKind::ALL {
        let provider = cfg.ai.provider_config(kind);
        match provider.command {
            Some(command) => println!("  {}: {} {}", kind, command, provider.args.join(" ")),
            None => println!("  {}: (not configured)", kind),
        }
    }
    println!();
    println!("Routine:");
    println!("  Batch size:   {}", cfg.routine.batch_size);
    println!("  Max attempts: {}", cfg.routine.retry.max_attempts);
    println!(
        "  Retry delay:  {}ms (x{}, max {}ms)",
        cfg.routine.retry.initial_delay_ms, cfg.routine.retry.backoff_multiplier, cfg.routine.retry.max_delay_ms
    );

    Ok(())
}
