//! Review queues
//!
//! Picks which due tasks to show in a session. A session looks a little into
//! the future: a task that will come due later today is better reviewed now
//! than in a separate session hours from now.

use crate::config::ConfigError;
use crate::prompt::{PromptId, PromptType, TaskId, TaskIdError};
use crate::state::PromptState;
use crate::store::{PromptStore, StoreBackend, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const HOUR_MILLIS: i64 = 60 * 60 * 1000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Most tasks in one session
    pub session_card_limit: usize,
    /// How far past now a task may be due and still join the session
    pub due_lookahead_millis: i64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            session_card_limit: 50,
            due_lookahead_millis: 16 * HOUR_MILLIS,
        }
    }
}

impl ReviewConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_card_limit == 0 {
            return Err(ConfigError::Invalid(
                "review.session_card_limit must be positive".into(),
            ));
        }
        if self.due_lookahead_millis < 0 {
            return Err(ConfigError::Invalid(
                "review.due_lookahead_millis must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Due-time threshold for a session starting at `now`
pub fn due_threshold(now: DateTime<Utc>, lookahead_millis: i64) -> i64 {
    now.timestamp_millis().saturating_add(lookahead_millis)
}

/// Task IDs for a session: due by `threshold_millis`, not deleted, soonest
/// first, at most `limit`, and at most one task per cloze prompt.
pub fn due_task_ids<'a, I>(
    states: I,
    threshold_millis: i64,
    limit: usize,
) -> Result<Vec<TaskId>, TaskIdError>
where
    I: IntoIterator<Item = (TaskId, &'a PromptState)>,
{
    let mut due: Vec<(i64, TaskId)> = states
        .into_iter()
        .filter(|(_, state)| state.is_due(threshold_millis))
        .map(|(task_id, state)| (state.due_timestamp_millis, task_id))
        .collect();
    due.sort();

    let mut occupied_prompts: HashSet<PromptId> = HashSet::new();
    let mut output = Vec::new();
    for (_, task_id) in due {
        if output.len() == limit {
            break;
        }
        let task = task_id.task()?;
        if task.prompt_type == PromptType::Cloze && !occupied_prompts.insert(task.prompt_id) {
            continue;
        }
        output.push(task_id);
    }
    Ok(output)
}

impl<B: StoreBackend> PromptStore<B> {
    /// Build the queue for a session starting at `now`
    pub fn review_queue(
        &self,
        now: DateTime<Utc>,
        config: &ReviewConfig,
    ) -> Result<Vec<TaskId>, StoreError> {
        let threshold = due_threshold(now, config.due_lookahead_millis);
        let records = self.list_due_tasks(threshold, None)?;
        let states = records
            .iter()
            .map(|record| {
                record
                    .entity_id
                    .parse::<TaskId>()
                    .map(|task_id| (task_id, &record.entity))
            })
            .collect::<Result<Vec<_>, TaskIdError>>()?;
        Ok(due_task_ids(states, threshold, config.session_card_limit)?)
    }
}
