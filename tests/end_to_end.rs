//! Review scheduling through a full store, on both backends

use anyhow::Result;
use memoria::actionlog::{ActionLog, ActionLogId};
use memoria::addressing::ContentId;
use memoria::event::Event;
use memoria::prompt::{PromptTask, TaskId, TaskParameters};
use memoria::schedule::{RepetitionOutcome, DAY_MILLIS};
use memoria::reconcile::MergeError;
use memoria::store::{StoreBackend, StoreError};
use memoria::{CoreConfig, PromptState, PromptStore};

const MINIMUM: i64 = 5 * DAY_MILLIS;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn event(log: ActionLog) -> Result<Event<ActionLog>> {
    Ok(log.into_event()?)
}

fn state<B: StoreBackend>(store: &PromptStore<B>, task_id: &TaskId) -> Result<PromptState> {
    let record = store
        .get_entity(task_id.as_str())?
        .ok_or_else(|| anyhow::anyhow!("no state for {}", task_id))?;
    Ok(record.entity)
}

/// Ingest at 0, remember at 1000, forget at 2_000_123
fn remember_then_forget<B: StoreBackend>(
    store: &mut PromptStore<B>,
    task_id: &TaskId,
    task_parameters: Option<TaskParameters>,
) -> Result<(PromptState, PromptState)> {
    let ingest = event(ActionLog::ingest(task_id.clone(), 0))?;
    store.put_events(vec![ingest.clone()])?;
    let ingested = state(store, task_id)?;
    assert_eq!(ingested.due_timestamp_millis, 0);
    assert_eq!(ingested.interval_millis, 0);
    assert_eq!(ingested.head_log_ids, vec![ingest.id.clone()]);

    let mut remembered = ActionLog::repetition(
        task_id.clone(),
        1_000,
        vec![ingest.id.clone()],
        RepetitionOutcome::Remembered,
    );
    if let ActionLog::Repetition(log) = &mut remembered {
        log.task_parameters = task_parameters;
    }
    let remembered = event(remembered)?;
    store.put_events(vec![remembered.clone()])?;
    let after_success = state(store, task_id)?;

    let forgotten = event(ActionLog::repetition(
        task_id.clone(),
        2_000_123,
        vec![remembered.id.clone()],
        RepetitionOutcome::Forgotten,
    ))?;
    let report = store.put_events(vec![forgotten.clone()])?;
    assert_eq!(report.fast_forwarded, 1);
    let after_failure = state(store, task_id)?;
    assert_eq!(after_failure.head_log_ids, vec![forgotten.id]);

    Ok((after_success, after_failure))
}

fn check_basic_and_application<B: StoreBackend>(mut store: PromptStore<B>) -> Result<()> {
    let basic = PromptTask::basic(ContentId::for_canonical_bytes(b"basic")).id();
    let (success, failure) = remember_then_forget(&mut store, &basic, None)?;

    assert_eq!(success.interval_millis, MINIMUM);
    assert_eq!(success.due_timestamp_millis, 1_000 + MINIMUM);
    assert_eq!(success.best_interval_millis, Some(MINIMUM));
    assert_eq!(success.last_review_timestamp_millis, Some(1_000));

    // 123 ms into the second gives 123 * 600 ms of jitter
    assert_eq!(failure.interval_millis, 0);
    assert_eq!(failure.due_timestamp_millis, 2_000_123 + 600_000 + 73_800);
    assert!(failure.needs_retry);
    assert_eq!(failure.best_interval_millis, None);

    let application = PromptTask::application(ContentId::for_canonical_bytes(b"app")).id();
    let (success, failure) =
        remember_then_forget(&mut store, &application, Some(TaskParameters::variant(2)))?;
    assert_eq!(success.last_review_task_parameters, Some(TaskParameters::variant(2)));

    assert_eq!(failure.interval_millis, MINIMUM);
    assert_eq!(failure.due_timestamp_millis, 2_000_123 + 600_000 + 73_800);
    assert!(!failure.needs_retry);
    assert_eq!(failure.best_interval_millis, Some(MINIMUM));
    Ok(())
}

#[test]
fn test_review_cycle_in_memory() -> Result<()> {
    init_logging();
    check_basic_and_application(CoreConfig::default().memory_store())
}

#[test]
fn test_review_cycle_in_sqlite() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let store = CoreConfig::default().open_sqlite_store(dir.path().join("memoria.db"))?;
    check_basic_and_application(store)
}

#[test]
fn test_reschedule_and_retry_pass() -> Result<()> {
    init_logging();
    let mut store = CoreConfig::default().memory_store();
    let task_id = PromptTask::cloze(ContentId::for_canonical_bytes(b"cloze"), 1).id();

    let ingest = event(ActionLog::ingest(task_id.clone(), 0))?;
    let forgotten = event(ActionLog::repetition(
        task_id.clone(),
        10_000,
        vec![ingest.id.clone()],
        RepetitionOutcome::Forgotten,
    ))?;
    // A retry passed a day later keeps at least the minimum interval
    let retried = event(ActionLog::repetition(
        task_id.clone(),
        10_000 + DAY_MILLIS,
        vec![forgotten.id.clone()],
        RepetitionOutcome::Remembered,
    ))?;
    let pushed_back = event(ActionLog::reschedule(
        task_id.clone(),
        10_000 + 2 * DAY_MILLIS,
        vec![retried.id.clone()],
        50 * DAY_MILLIS,
    ))?;
    store.put_events(vec![ingest, forgotten, retried, pushed_back.clone()])?;

    let state = state(&store, &task_id)?;
    assert!(!state.needs_retry);
    assert_eq!(state.interval_millis, MINIMUM);
    assert_eq!(state.best_interval_millis, Some(MINIMUM));
    assert_eq!(state.due_timestamp_millis, 50 * DAY_MILLIS);
    assert_eq!(state.head_log_ids, vec![pushed_back.id.clone()]);

    let record = store
        .get_entity(task_id.as_str())?
        .ok_or_else(|| anyhow::anyhow!("missing"))?;
    let last: &ActionLogId = &record.last_event_id;
    assert_eq!(last, &pushed_back.id);
    Ok(())
}

#[test]
fn test_review_without_its_ingest_is_refused() -> Result<()> {
    init_logging();
    let mut store = CoreConfig::default().memory_store();
    let task_id = PromptTask::basic(ContentId::for_canonical_bytes(b"late")).id();

    let ingest = event(ActionLog::ingest(task_id.clone(), 0))?;
    let review = event(ActionLog::repetition(
        task_id.clone(),
        1_000,
        vec![ingest.id.clone()],
        RepetitionOutcome::Remembered,
    ))?;

    let err = store.put_events(vec![review.clone()]).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Merge(MergeError::MissingParentLog { .. })
    ));
    assert!(store.get_entity(task_id.as_str())?.is_none());

    // Arriving together, in any order, they chain cleanly
    let report = store.put_events(vec![review.clone(), ingest])?;
    assert_eq!(report.inserted, 2);
    assert_eq!(report.fast_forwarded, 1);
    assert_eq!(state(&store, &task_id)?.head_log_ids, vec![review.id]);
    Ok(())
}

#[test]
fn test_reschedule_to_extreme_time_saturates() -> Result<()> {
    init_logging();
    let mut store = CoreConfig::default().memory_store();
    let task_id = PromptTask::basic(ContentId::for_canonical_bytes(b"extreme")).id();

    let ingest = event(ActionLog::ingest(task_id.clone(), 0))?;
    let rescheduled = event(ActionLog::reschedule(
        task_id.clone(),
        500,
        vec![ingest.id.clone()],
        i64::MIN,
    ))?;
    let reviewed = event(ActionLog::repetition(
        task_id.clone(),
        1_000,
        vec![rescheduled.id.clone()],
        RepetitionOutcome::Remembered,
    ))?;
    store.put_events(vec![ingest, rescheduled, reviewed])?;

    let state = state(&store, &task_id)?;
    assert_eq!(state.due_timestamp_millis, i64::MAX);
    assert!(store.list_due_tasks(i64::MAX - 1, None)?.is_empty());
    Ok(())
}
