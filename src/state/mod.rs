//! Prompt scheduling state
//!
//! A [`PromptState`] is the derived snapshot of one task: where its schedule
//! stands and which logs it reflects. It is never hashed and never edited in
//! place; each log produces a replacement (see [`reducer`]), and divergent
//! histories are rebuilt through [`merge`].

pub mod merge;
pub mod reducer;

pub use merge::merge_action_logs;
pub use reducer::{update_head_log_ids, PromptStateReducer};

use crate::actionlog::{ActionLogId, TaskMetadata};
use crate::addressing::{AddressingError, Canonical, CanonicalMap, CanonicalValue};
use crate::prompt::TaskParameters;
use crate::schedule::ScheduleState;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptState {
    /// Logs not yet superseded by a descendant
    #[serde(rename = "headActionLogIDs")]
    pub head_log_ids: Vec<ActionLogId>,
    pub last_review_timestamp_millis: Option<i64>,
    pub last_review_task_parameters: Option<TaskParameters>,
    pub due_timestamp_millis: i64,
    pub interval_millis: i64,
    pub best_interval_millis: Option<i64>,
    pub needs_retry: bool,
    pub task_metadata: TaskMetadata,
}

impl PromptState {
    pub fn schedule_state(&self) -> ScheduleState {
        ScheduleState {
            interval_millis: self.interval_millis,
            due_timestamp_millis: self.due_timestamp_millis,
            last_review_timestamp_millis: self.last_review_timestamp_millis,
            best_interval_millis: self.best_interval_millis,
            needs_retry: self.needs_retry,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.task_metadata.is_deleted
    }

    /// Due at or before `threshold_millis` and not deleted
    pub fn is_due(&self, threshold_millis: i64) -> bool {
        !self.is_deleted() && self.due_timestamp_millis <= threshold_millis
    }
}

// Encoded for comparison between replicas; a snapshot has no content ID
impl Canonical for PromptState {
    fn canonical_form(&self) -> Result<CanonicalValue, AddressingError> {
        Ok(CanonicalMap::new()
            .field("headActionLogIDs", CanonicalValue::link_set(&self.head_log_ids))
            .nullable(
                "lastReviewTimestampMillis",
                self.last_review_timestamp_millis.map(CanonicalValue::timestamp),
            )
            .nullable(
                "lastReviewTaskParameters",
                self.last_review_task_parameters
                    .as_ref()
                    .map(Canonical::canonical_form)
                    .transpose()?,
            )
            .field(
                "dueTimestampMillis",
                CanonicalValue::timestamp(self.due_timestamp_millis),
            )
            .field("intervalMillis", self.interval_millis)
            .nullable("bestIntervalMillis", self.best_interval_millis)
            .field("needsRetry", self.needs_retry)
            .field("taskMetadata", self.task_metadata.canonical_form()?)
            .into())
    }
}
