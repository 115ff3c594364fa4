//! Event Store Integration Tests
//!
//! Tests for the event log format, replay order, and reconstructing a run
//! from its events.

use riigikogu::core::{generate_idempotency_key, EventStore};
use riigikogu::domain::{Event, EventType, Run, RunState, StepReport, StepStatus};
use tempfile::TempDir;
use uuid::Uuid;

fn step_event(run_id: Uuid, step: &str, event_type: EventType, status: StepStatus) -> Event {
    Event::new(
        run_id,
        Some(step.to_string()),
        event_type,
        generate_idempotency_key(run_id, step, "batch_size=10"),
        format!("Step '{}'", step),
        status,
    )
}

fn run_started(run_id: Uuid) -> Event {
    Event::new(
        run_id,
        None,
        EventType::RunStarted,
        format!("{}:start", run_id),
        "Routine 'daily_routine' started: start_date=2024-01-01, batch_size=10, provider=gemini".to_string(),
        StepStatus::Running,
    )
}

#[tokio::test]
async fn test_event_log_is_jsonl() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let store = EventStore::open_in(temp.path(), run_id).await.unwrap();

    store.append(&run_started(run_id)).await.unwrap();
    store
        .append(&step_event(run_id, "parse", EventType::StepStarted, StepStatus::Running))
        .await
        .unwrap();

    assert_eq!(store.run_dir(), temp.path().join(run_id.to_string()));
    let content = std::fs::read_to_string(store.events_path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);

    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["run_id"], run_id.to_string());
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }
}

#[tokio::test]
async fn test_event_types_serialization() {
    let event_types = vec![
        EventType::RunStarted,
        EventType::RunCompleted,
        EventType::RunFailed,
        EventType::StepStarted,
        EventType::StepCompleted,
        EventType::StepFailed,
        EventType::StepRetrying,
        EventType::StepSkipped,
    ];

    for event_type in event_types {
        let json = serde_json::to_string(&event_type).unwrap();
        let parsed: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event_type);
    }
}

#[tokio::test]
async fn test_replay_reconstructs_completed_run() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let store = EventStore::open_in(temp.path(), run_id).await.unwrap();

    let mut report = StepReport::new("speech_summaries", false);
    report.selected = 4;
    report.succeeded = 3;
    report.failed = 1;

    let events = vec![
        run_started(run_id),
        step_event(run_id, "parse", EventType::StepSkipped, StepStatus::Skipped),
        step_event(run_id, "speech_summaries", EventType::StepStarted, StepStatus::Running),
        step_event(run_id, "speech_summaries", EventType::StepRetrying, StepStatus::Running)
            .with_error("provider exited with code 1".to_string()),
        step_event(run_id, "speech_summaries", EventType::StepStarted, StepStatus::Running),
        step_event(run_id, "speech_summaries", EventType::StepCompleted, StepStatus::Completed)
            .with_duration(1200)
            .with_report(report.clone()),
        Event::new(
            run_id,
            None,
            EventType::RunCompleted,
            format!("{}:complete", run_id),
            "Routine 'daily_routine' completed".to_string(),
            StepStatus::Completed,
        ),
    ];
    for event in &events {
        store.append(event).await.unwrap();
    }

    let replayed = store.replay().await.unwrap();
    assert_eq!(replayed.len(), events.len());

    let run = Run::from_events(&replayed).unwrap();
    assert_eq!(run.id, run_id);
    assert_eq!(run.routine_name, "daily_routine");
    assert!(run.options.contains("batch_size=10"));
    assert_eq!(run.state, RunState::Completed);
    assert!(run.completed_at.is_some());
    assert_eq!(run.current_step, 2);
    assert_eq!(run.step_order, vec!["parse", "speech_summaries"]);
    assert_eq!(run.step_status("parse"), Some(StepStatus::Skipped));
    assert_eq!(run.step_status("speech_summaries"), Some(StepStatus::Completed));
    assert_eq!(run.reports["speech_summaries"], report);
}

#[tokio::test]
async fn test_replay_reconstructs_failed_run() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let store = EventStore::open_in(temp.path(), run_id).await.unwrap();

    store.append(&run_started(run_id)).await.unwrap();
    store
        .append(&step_event(run_id, "parse", EventType::StepStarted, StepStatus::Running))
        .await
        .unwrap();
    store
        .append(
            &step_event(run_id, "parse", EventType::StepFailed, StepStatus::Failed)
                .with_error("Failed to fetch verbatims".to_string()),
        )
        .await
        .unwrap();
    store
        .append(
            &Event::new(
                run_id,
                None,
                EventType::RunFailed,
                format!("{}:complete", run_id),
                "Routine 'daily_routine' failed".to_string(),
                StepStatus::Failed,
            )
            .with_error("Step 1 (parse) failed: Failed to fetch verbatims".to_string()),
        )
        .await
        .unwrap();

    let run = Run::from_events(&store.replay().await.unwrap()).unwrap();
    assert_eq!(
        run.state,
        RunState::Failed {
            error: "Step 1 (parse) failed: Failed to fetch verbatims".to_string()
        }
    );
    assert_eq!(run.current_step, 0);
    assert_eq!(run.step_status("parse"), Some(StepStatus::Failed));

    let events = store.replay().await.unwrap();
    let step_failure = events
        .iter()
        .find(|e| e.event_type == EventType::StepFailed)
        .unwrap();
    assert_eq!(step_failure.error.as_deref(), Some("Failed to fetch verbatims"));
}

#[tokio::test]
async fn test_reopening_a_run_appends() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();

    let first = EventStore::open_in(temp.path(), run_id).await.unwrap();
    first.append(&run_started(run_id)).await.unwrap();

    let second = EventStore::open_in(temp.path(), run_id).await.unwrap();
    second
        .append(&step_event(run_id, "parse", EventType::StepStarted, StepStatus::Running))
        .await
        .unwrap();

    assert_eq!(first.replay().await.unwrap().len(), 2);
    assert_eq!(EventStore::list_runs_in(temp.path()).await.unwrap(), vec![run_id]);
}
