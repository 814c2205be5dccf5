//! Action logs
//!
//! Every change to a task's scheduling state is recorded as an immutable,
//! content-addressed log. Logs other than ingests name the logs they supersede,
//! so a task's history forms a DAG rooted at its ingest. Two devices reviewing
//! the same task offline produce sibling branches; a later log naming both
//! joins them.

mod metadata;

pub use metadata::{MetadataUpdates, PromptProvenance, ProvenanceType, TaskMetadata};

use crate::addressing::{
    AddressingError, Canonical, CanonicalMap, CanonicalValue, ContentAddressable, ContentId,
};
use crate::event::{Event, EventPayload};
use crate::prompt::{TaskId, TaskParameters};
use crate::schedule::RepetitionOutcome;
use serde::{Deserialize, Serialize};

pub type ActionLogId = ContentId;

const ACTION_LOG_TYPE_KEY: &str = "actionLogType";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionLogType {
    Ingest,
    Repetition,
    Reschedule,
    UpdateMetadata,
}

impl ActionLogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionLogType::Ingest => "ingest",
            ActionLogType::Repetition => "repetition",
            ActionLogType::Reschedule => "reschedule",
            ActionLogType::UpdateMetadata => "updateMetadata",
        }
    }
}

/// Creates a task, or re-registers an existing one
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestLog {
    #[serde(rename = "taskID")]
    pub task_id: TaskId,
    pub timestamp_millis: i64,
    #[serde(default)]
    pub provenance: Option<PromptProvenance>,
}

/// One review attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepetitionLog {
    #[serde(rename = "taskID")]
    pub task_id: TaskId,
    pub timestamp_millis: i64,
    #[serde(rename = "parentActionLogIDs")]
    pub parent_log_ids: Vec<ActionLogId>,
    pub outcome: RepetitionOutcome,
    #[serde(default)]
    pub task_parameters: Option<TaskParameters>,
    #[serde(default)]
    pub context: Option<String>,
}

/// Overrides the due time and nothing else
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleLog {
    #[serde(rename = "taskID")]
    pub task_id: TaskId,
    pub timestamp_millis: i64,
    #[serde(rename = "parentActionLogIDs")]
    pub parent_log_ids: Vec<ActionLogId>,
    pub new_timestamp_millis: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMetadataLog {
    #[serde(rename = "taskID")]
    pub task_id: TaskId,
    pub timestamp_millis: i64,
    #[serde(rename = "parentActionLogIDs")]
    pub parent_log_ids: Vec<ActionLogId>,
    pub updates: MetadataUpdates,
}

/// A log, tagged by `actionLogType` on the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "actionLogType", rename_all = "camelCase")]
pub enum ActionLog {
    Ingest(IngestLog),
    Repetition(RepetitionLog),
    Reschedule(RescheduleLog),
    UpdateMetadata(UpdateMetadataLog),
}

impl ActionLog {
    pub fn ingest(task_id: TaskId, timestamp_millis: i64) -> Self {
        ActionLog::Ingest(IngestLog {
            task_id,
            timestamp_millis,
            provenance: None,
        })
    }

    pub fn repetition(
        task_id: TaskId,
        timestamp_millis: i64,
        parent_log_ids: Vec<ActionLogId>,
        outcome: RepetitionOutcome,
    ) -> Self {
        ActionLog::Repetition(RepetitionLog {
            task_id,
            timestamp_millis,
            parent_log_ids,
            outcome,
            task_parameters: None,
            context: None,
        })
    }

    pub fn reschedule(
        task_id: TaskId,
        timestamp_millis: i64,
        parent_log_ids: Vec<ActionLogId>,
        new_timestamp_millis: i64,
    ) -> Self {
        ActionLog::Reschedule(RescheduleLog {
            task_id,
            timestamp_millis,
            parent_log_ids,
            new_timestamp_millis,
        })
    }

    pub fn update_metadata(
        task_id: TaskId,
        timestamp_millis: i64,
        parent_log_ids: Vec<ActionLogId>,
        updates: MetadataUpdates,
    ) -> Self {
        ActionLog::UpdateMetadata(UpdateMetadataLog {
            task_id,
            timestamp_millis,
            parent_log_ids,
            updates,
        })
    }

    pub fn log_type(&self) -> ActionLogType {
        match self {
            ActionLog::Ingest(_) => ActionLogType::Ingest,
            ActionLog::Repetition(_) => ActionLogType::Repetition,
            ActionLog::Reschedule(_) => ActionLogType::Reschedule,
            ActionLog::UpdateMetadata(_) => ActionLogType::UpdateMetadata,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            ActionLog::Ingest(log) => &log.task_id,
            ActionLog::Repetition(log) => &log.task_id,
            ActionLog::Reschedule(log) => &log.task_id,
            ActionLog::UpdateMetadata(log) => &log.task_id,
        }
    }

    pub fn timestamp_millis(&self) -> i64 {
        match self {
            ActionLog::Ingest(log) => log.timestamp_millis,
            ActionLog::Repetition(log) => log.timestamp_millis,
            ActionLog::Reschedule(log) => log.timestamp_millis,
            ActionLog::UpdateMetadata(log) => log.timestamp_millis,
        }
    }

    pub fn parent_log_ids(&self) -> &[ActionLogId] {
        match self {
            ActionLog::Ingest(_) => &[],
            ActionLog::Repetition(log) => &log.parent_log_ids,
            ActionLog::Reschedule(log) => &log.parent_log_ids,
            ActionLog::UpdateMetadata(log) => &log.parent_log_ids,
        }
    }

    /// Structural checks that don't need any other log
    pub fn validate(&self) -> Result<(), AddressingError> {
        if self.log_type() != ActionLogType::Ingest && self.parent_log_ids().is_empty() {
            return Err(AddressingError::Encoding(format!(
                "{} log for {} has no parent logs",
                self.log_type().as_str(),
                self.task_id()
            )));
        }
        Ok(())
    }

    /// Decode wire JSON, reporting unknown log types as schema errors
    pub fn from_json(json: &str) -> Result<Self, AddressingError> {
        serde_json::from_str(json).map_err(|e| crate::addressing::schema_error("action log", e))
    }

    pub fn to_json(&self) -> Result<String, AddressingError> {
        serde_json::to_string(self).map_err(|e| AddressingError::Encoding(e.to_string()))
    }

    /// Wrap into a storable event with its computed ID
    pub fn into_event(self) -> Result<Event<ActionLog>, AddressingError> {
        self.validate()?;
        Event::new(self)
    }
}

impl Canonical for ActionLog {
    fn canonical_form(&self) -> Result<CanonicalValue, AddressingError> {
        let map = CanonicalMap::tagged(ACTION_LOG_TYPE_KEY, self.log_type().as_str())
            .field("taskID", self.task_id().as_str())
            .field(
                "timestampMillis",
                CanonicalValue::timestamp(self.timestamp_millis()),
            );
        let map = match self {
            ActionLog::Ingest(log) => map.nullable(
                "provenance",
                log.provenance
                    .as_ref()
                    .map(Canonical::canonical_form)
                    .transpose()?,
            ),
            ActionLog::Repetition(log) => map
                .field(
                    "parentActionLogIDs",
                    CanonicalValue::link_set(&log.parent_log_ids),
                )
                .field("outcome", log.outcome.as_str())
                .nullable(
                    "taskParameters",
                    log.task_parameters
                        .as_ref()
                        .map(Canonical::canonical_form)
                        .transpose()?,
                )
                .nullable("context", log.context.as_deref()),
            ActionLog::Reschedule(log) => map
                .field(
                    "parentActionLogIDs",
                    CanonicalValue::link_set(&log.parent_log_ids),
                )
                .field(
                    "newTimestampMillis",
                    CanonicalValue::timestamp(log.new_timestamp_millis),
                ),
            ActionLog::UpdateMetadata(log) => map
                .field(
                    "parentActionLogIDs",
                    CanonicalValue::link_set(&log.parent_log_ids),
                )
                .field("updates", log.updates.canonical_form()?),
        };
        Ok(map.into())
    }
}

impl ContentAddressable for ActionLog {}

impl EventPayload for ActionLog {
    fn entity_id(&self) -> String {
        self.task_id().to_string()
    }

    fn event_type(&self) -> &'static str {
        self.log_type().as_str()
    }

    fn timestamp_millis(&self) -> i64 {
        ActionLog::timestamp_millis(self)
    }

    fn parent_ids(&self) -> &[ActionLogId] {
        self.parent_log_ids()
    }

    fn replay_rank(&self) -> u8 {
        match self {
            ActionLog::Ingest(_) => 0,
            _ => 1,
        }
    }
}
