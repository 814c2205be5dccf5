//! Merging divergent log sets into one prompt state

use super::{PromptState, PromptStateReducer};
use crate::actionlog::ActionLog;
use crate::event::{Event, ReduceError};
use crate::reconcile::{replay, MergeError};
use std::collections::HashSet;

/// Rebuild a task's state from `logs`, a complete history for one task.
///
/// `base` is a snapshot the caller already holds. If its heads are not all
/// among `logs`, it was derived from history the caller hasn't supplied (a
/// cache downloaded from elsewhere, say), and the merge is refused rather
/// than silently dropping those logs.
pub fn merge_action_logs(
    reducer: &PromptStateReducer,
    logs: &[Event<ActionLog>],
    base: Option<&PromptState>,
) -> Result<PromptState, MergeError> {
    let first = logs
        .first()
        .ok_or_else(|| MergeError::EmptyHistory("merge".to_string()))?;
    let task_id = first.entity_id.as_str();

    if let Some(stray) = logs.iter().find(|log| log.entity_id != task_id) {
        return Err(MergeError::Reduce {
            event_id: stray.id.clone(),
            source: ReduceError::InvalidEvent {
                event_id: stray.id.clone(),
                reason: format!("belongs to {}, not {}", stray.entity_id, task_id),
            },
        });
    }

    if let Some(base) = base {
        let known: HashSet<_> = logs.iter().map(|log| &log.id).collect();
        if let Some(head_id) = base.head_log_ids.iter().find(|id| !known.contains(id)) {
            return Err(MergeError::DisconnectedBase {
                entity_id: task_id.to_string(),
                head_id: head_id.clone(),
            });
        }
    }

    Ok(replay(reducer, task_id, logs)?.entity)
}
