//! Folding action logs into prompt states

use super::PromptState;
use crate::actionlog::{ActionLog, ActionLogId, IngestLog, RepetitionLog, TaskMetadata};
use crate::event::{Event, EventId, EventReducer, ReduceError};
use crate::prompt::TaskParameters;
use crate::schedule::{Review, SpacedRepetitionScheduler};

/// New head set after applying a log with `parent_ids` to a snapshot whose
/// heads are `heads`. Heads named as parents are superseded; the rest survive
/// in order, and the new log joins unless it is already a head.
pub fn update_head_log_ids(
    heads: &[ActionLogId],
    parent_ids: &[ActionLogId],
    new_id: &ActionLogId,
) -> Vec<ActionLogId> {
    let mut output: Vec<ActionLogId> = heads
        .iter()
        .filter(|head| !parent_ids.contains(head))
        .cloned()
        .collect();
    if !heads.contains(new_id) {
        output.push(new_id.clone());
    }
    output
}

/// The snapshot a non-ingest log applies to
fn existing_state<'a>(
    entity: Option<&'a PromptState>,
    event: &Event<ActionLog>,
) -> Result<&'a PromptState, ReduceError> {
    if event.payload.parent_log_ids().is_empty() {
        return Err(ReduceError::InvalidEvent {
            event_id: event.id.clone(),
            reason: format!("{} log without parents", event.payload.log_type().as_str()),
        });
    }
    entity.ok_or_else(|| ReduceError::UnknownEntity {
        entity_id: event.entity_id.clone(),
        event_id: event.id.clone(),
    })
}

#[derive(Clone, Debug, Default)]
pub struct PromptStateReducer {
    scheduler: SpacedRepetitionScheduler,
}

impl PromptStateReducer {
    pub fn new(scheduler: SpacedRepetitionScheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &SpacedRepetitionScheduler {
        &self.scheduler
    }

    fn ingest(&self, base: Option<&PromptState>, log: &IngestLog, id: &EventId) -> PromptState {
        match base {
            None => PromptState {
                head_log_ids: vec![id.clone()],
                last_review_timestamp_millis: None,
                last_review_task_parameters: None,
                due_timestamp_millis: log.timestamp_millis,
                interval_millis: 0,
                best_interval_millis: None,
                needs_retry: false,
                task_metadata: TaskMetadata {
                    is_deleted: false,
                    provenance: log.provenance.clone(),
                },
            },
            Some(base) => {
                // Re-ingesting a deleted task brings it back under the new provenance
                let task_metadata = if base.task_metadata.is_deleted {
                    TaskMetadata {
                        is_deleted: false,
                        provenance: log.provenance.clone(),
                    }
                } else {
                    base.task_metadata.clone()
                };
                PromptState {
                    head_log_ids: update_head_log_ids(&base.head_log_ids, &[], id),
                    task_metadata,
                    ..base.clone()
                }
            }
        }
    }

    fn repetition(
        &self,
        base: &PromptState,
        log: &RepetitionLog,
        event: &Event<ActionLog>,
    ) -> Result<PromptState, ReduceError> {
        let prompt_type = log
            .task_id
            .prompt_type()
            .map_err(|e| ReduceError::InvalidEvent {
                event_id: event.id.clone(),
                reason: e.to_string(),
            })?;
        if !TaskParameters::is_valid_for(log.task_parameters.as_ref(), prompt_type) {
            return Err(ReduceError::UnsupportedParameters {
                entity_id: event.entity_id.clone(),
                event_id: event.id.clone(),
                reason: format!("{} tasks take no task parameters", prompt_type),
            });
        }

        let outcome = self.scheduler.schedule(
            &base.schedule_state(),
            &Review {
                timestamp_millis: log.timestamp_millis,
                outcome: log.outcome,
                supports_retry: prompt_type.supports_retry(),
            },
        );
        Ok(PromptState {
            head_log_ids: update_head_log_ids(&base.head_log_ids, &log.parent_log_ids, &event.id),
            last_review_timestamp_millis: Some(log.timestamp_millis),
            last_review_task_parameters: log.task_parameters,
            due_timestamp_millis: outcome.due_timestamp_millis,
            interval_millis: outcome.interval_millis,
            best_interval_millis: outcome.best_interval_millis,
            needs_retry: outcome.needs_retry,
            task_metadata: base.task_metadata.clone(),
        })
    }
}

impl EventReducer for PromptStateReducer {
    type Payload = ActionLog;
    type Entity = PromptState;

    fn apply(
        &self,
        entity: Option<&PromptState>,
        event: &Event<ActionLog>,
    ) -> Result<PromptState, ReduceError> {
        match &event.payload {
            ActionLog::Ingest(ingest) => Ok(self.ingest(entity, ingest, &event.id)),
            ActionLog::Repetition(repetition) => {
                let base = existing_state(entity, event)?;
                self.repetition(base, repetition, event)
            }
            ActionLog::Reschedule(reschedule) => {
                let base = existing_state(entity, event)?;
                Ok(PromptState {
                    head_log_ids: update_head_log_ids(
                        &base.head_log_ids,
                        &reschedule.parent_log_ids,
                        &event.id,
                    ),
                    due_timestamp_millis: reschedule.new_timestamp_millis,
                    ..base.clone()
                })
            }
            ActionLog::UpdateMetadata(update) => {
                let base = existing_state(entity, event)?;
                Ok(PromptState {
                    head_log_ids: update_head_log_ids(
                        &base.head_log_ids,
                        &update.parent_log_ids,
                        &event.id,
                    ),
                    task_metadata: base.task_metadata.merged(&update.updates),
                    ..base.clone()
                })
            }
        }
    }

    fn head_ids<'a>(&self, entity: &'a PromptState) -> &'a [EventId] {
        &entity.head_log_ids
    }

    fn with_head_ids(&self, mut entity: PromptState, head_ids: Vec<EventId>) -> PromptState {
        entity.head_log_ids = head_ids;
        entity
    }

    fn due_timestamp_millis(&self, entity: &PromptState) -> Option<i64> {
        if entity.task_metadata.is_deleted {
            None
        } else {
            Some(entity.due_timestamp_millis)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actionlog::{MetadataUpdates, PromptProvenance, ProvenanceType};
    use crate::addressing::ContentId;
    use crate::prompt::{PromptTask, TaskId};
    use crate::schedule::{RepetitionOutcome, DAY_MILLIS, MINUTE_MILLIS};

    fn id(name: &str) -> ActionLogId {
        ContentId::for_canonical_bytes(name.as_bytes())
    }

    fn ids(names: &[&str]) -> Vec<ActionLogId> {
        names.iter().map(|name| id(name)).collect()
    }

    fn basic_task() -> TaskId {
        PromptTask::basic(ContentId::for_canonical_bytes(b"basic")).id()
    }

    fn application_task() -> TaskId {
        PromptTask::application(ContentId::for_canonical_bytes(b"application")).id()
    }

    fn apply(base: Option<&PromptState>, log: ActionLog) -> (PromptState, ActionLogId) {
        let event = log.into_event().unwrap();
        let state = PromptStateReducer::default().apply(base, &event).unwrap();
        (state, event.id)
    }

    #[test]
    fn test_head_update_vectors() {
        let cases: &[(&[&str], &[&str], &str, &[&str])] = &[
            (&["a"], &["a"], "b", &["b"]),
            (&["a", "b"], &["a", "b"], "c", &["c"]),
            (&["a"], &["b"], "c", &["a", "c"]),
            (&["a", "b"], &["a"], "c", &["b", "c"]),
            (&["c", "a"], &["b"], "c", &["c", "a"]),
        ];
        for (heads, parents, new, expected) in cases {
            assert_eq!(
                update_head_log_ids(&ids(heads), &ids(parents), &id(new)),
                ids(expected),
                "update({:?}, {:?}, {})",
                heads,
                parents,
                new
            );
        }
    }

    #[test]
    fn test_ingest_initializes_state() {
        let (state, ingest_id) = apply(None, ActionLog::ingest(basic_task(), 0));
        assert_eq!(state.head_log_ids, vec![ingest_id]);
        assert_eq!(state.interval_millis, 0);
        assert_eq!(state.due_timestamp_millis, 0);
        assert_eq!(state.last_review_timestamp_millis, None);
        assert!(!state.needs_retry);
        assert!(!state.is_deleted());
    }

    #[test]
    fn test_reingest_only_adds_head() {
        let (state, first) = apply(None, ActionLog::ingest(basic_task(), 0));
        let (again, second) = apply(Some(&state), ActionLog::ingest(basic_task(), 50));
        assert_eq!(again.head_log_ids, vec![first, second]);
        assert_eq!(again.due_timestamp_millis, state.due_timestamp_millis);
    }

    #[test]
    fn test_reingest_restores_deleted_task() {
        let (state, ingest_id) = apply(None, ActionLog::ingest(basic_task(), 0));
        let (deleted, delete_id) = apply(
            Some(&state),
            ActionLog::update_metadata(basic_task(), 10, vec![ingest_id], MetadataUpdates::deleted(true)),
        );
        assert!(deleted.is_deleted());
        assert_eq!(deleted.head_log_ids, vec![delete_id]);

        let provenance = PromptProvenance::new(ProvenanceType::Note, "note-1");
        let reingest = ActionLog::Ingest(IngestLog {
            task_id: basic_task(),
            timestamp_millis: 20,
            provenance: Some(provenance.clone()),
        });
        let (restored, _) = apply(Some(&deleted), reingest);
        assert!(!restored.is_deleted());
        assert_eq!(restored.task_metadata.provenance, Some(provenance));
    }

    #[test]
    fn test_repetition_schedules() {
        let (state, ingest_id) = apply(None, ActionLog::ingest(basic_task(), 0));
        let (reviewed, rep_id) = apply(
            Some(&state),
            ActionLog::repetition(basic_task(), 1_000, vec![ingest_id], RepetitionOutcome::Remembered),
        );
        assert_eq!(reviewed.head_log_ids, vec![rep_id.clone()]);
        assert_eq!(reviewed.interval_millis, 5 * DAY_MILLIS);
        assert_eq!(reviewed.best_interval_millis, Some(5 * DAY_MILLIS));
        assert_eq!(reviewed.last_review_timestamp_millis, Some(1_000));
        assert_eq!(reviewed.due_timestamp_millis, 1_000 + 5 * DAY_MILLIS);

        let (forgotten, _) = apply(
            Some(&reviewed),
            ActionLog::repetition(basic_task(), 2_000, vec![rep_id], RepetitionOutcome::Forgotten),
        );
        assert_eq!(forgotten.interval_millis, 0);
        assert!(forgotten.needs_retry);
        assert_eq!(forgotten.due_timestamp_millis, 2_000 + 10 * MINUTE_MILLIS);
    }

    #[test]
    fn test_reschedule_and_metadata_keep_schedule() {
        let (state, ingest_id) = apply(None, ActionLog::ingest(basic_task(), 0));
        let (moved, moved_id) = apply(
            Some(&state),
            ActionLog::reschedule(basic_task(), 5, vec![ingest_id], 99_000),
        );
        assert_eq!(moved.due_timestamp_millis, 99_000);
        assert_eq!(moved.interval_millis, state.interval_millis);
        assert_eq!(moved.head_log_ids, vec![moved_id.clone()]);

        let (deleted, _) = apply(
            Some(&moved),
            ActionLog::update_metadata(basic_task(), 6, vec![moved_id], MetadataUpdates::deleted(true)),
        );
        assert!(deleted.is_deleted());
        assert_eq!(deleted.due_timestamp_millis, 99_000);
        assert_eq!(PromptStateReducer::default().due_timestamp_millis(&deleted), None);
    }

    #[test]
    fn test_unknown_task_requires_replay() {
        let event = ActionLog::repetition(basic_task(), 1, vec![id("x")], RepetitionOutcome::Remembered)
            .into_event()
            .unwrap();
        let err = PromptStateReducer::default().apply(None, &event).unwrap_err();
        assert!(err.requires_replay());
    }

    #[test]
    fn test_task_parameters_checked_against_prompt_type() {
        let reducer = PromptStateReducer::default();
        for task_id in [basic_task(), application_task()] {
            let (state, ingest_id) = apply(None, ActionLog::ingest(task_id.clone(), 0));
            let mut log = ActionLog::repetition(task_id.clone(), 1_000, vec![ingest_id], RepetitionOutcome::Remembered);
            if let ActionLog::Repetition(rep) = &mut log {
                rep.task_parameters = Some(TaskParameters::variant(1));
            }
            let result = reducer.apply(Some(&state), &log.into_event().unwrap());
            if task_id == application_task() {
                assert_eq!(result.unwrap().last_review_task_parameters, Some(TaskParameters::variant(1)));
            } else {
                assert!(matches!(result, Err(ReduceError::UnsupportedParameters { .. })));
            }
        }
    }

    #[test]
    fn test_application_forgotten_never_retries() {
        let (state, ingest_id) = apply(None, ActionLog::ingest(application_task(), 0));
        let (reviewed, rep_id) = apply(
            Some(&state),
            ActionLog::repetition(application_task(), 1_000, vec![ingest_id], RepetitionOutcome::Remembered),
        );
        let (forgotten, _) = apply(
            Some(&reviewed),
            ActionLog::repetition(application_task(), 2_000, vec![rep_id], RepetitionOutcome::Forgotten),
        );
        assert!(!forgotten.needs_retry);
        assert_eq!(forgotten.interval_millis, 5 * DAY_MILLIS);
        assert_eq!(forgotten.best_interval_millis, Some(5 * DAY_MILLIS));
    }
}
