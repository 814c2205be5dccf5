//! Prompt tasks
//!
//! A task is the unit whose scheduling state is tracked. Basic and application
//! prompts have one task each (all variants of an application prompt share
//! state). A cloze prompt has one task per deletion, so each deletion is an
//! independently scheduled component.
//!
//! Task IDs are `{promptID}/{promptType}` with a trailing `/{clozeIndex}` for
//! cloze tasks.

use super::{PromptId, PromptType};
use crate::addressing::{AddressingError, Canonical, CanonicalMap, CanonicalValue, ContentId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskIdError {
    #[error("Task ID {0} has too few components")]
    TooFewComponents(String),

    #[error("Task ID {0} has too many components")]
    TooManyComponents(String),

    #[error("Task ID {task_id} has unknown prompt type {prompt_type}")]
    UnknownPromptType { task_id: String, prompt_type: String },

    #[error("Task ID {task_id} has invalid cloze index {index}")]
    InvalidClozeIndex { task_id: String, index: String },

    #[error("Task ID {task_id} has invalid prompt ID: {source}")]
    InvalidPromptId {
        task_id: String,
        source: AddressingError,
    },
}

/// Identifier of a task; the entity ID under which its state is stored
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode into the prompt task it names
    pub fn task(&self) -> Result<PromptTask, TaskIdError> {
        PromptTask::parse(&self.0)
    }

    pub fn prompt_type(&self) -> Result<PromptType, TaskIdError> {
        Ok(self.task()?.prompt_type)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = TaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PromptTask::parse(s).map(|task| task.id())
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which part of a prompt a task covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PromptParameters {
    Whole,
    Cloze { cloze_index: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PromptTask {
    pub prompt_id: PromptId,
    pub prompt_type: PromptType,
    pub parameters: PromptParameters,
}

impl PromptTask {
    pub fn basic(prompt_id: PromptId) -> Self {
        Self {
            prompt_id,
            prompt_type: PromptType::Basic,
            parameters: PromptParameters::Whole,
        }
    }

    pub fn application(prompt_id: PromptId) -> Self {
        Self {
            prompt_id,
            prompt_type: PromptType::Application,
            parameters: PromptParameters::Whole,
        }
    }

    pub fn cloze(prompt_id: PromptId, cloze_index: u32) -> Self {
        Self {
            prompt_id,
            prompt_type: PromptType::Cloze,
            parameters: PromptParameters::Cloze { cloze_index },
        }
    }

    pub fn id(&self) -> TaskId {
        let base = format!("{}/{}", self.prompt_id, self.prompt_type);
        match self.parameters {
            PromptParameters::Whole => TaskId(base),
            PromptParameters::Cloze { cloze_index } => TaskId(format!("{}/{}", base, cloze_index)),
        }
    }

    pub fn parse(task_id: &str) -> Result<Self, TaskIdError> {
        let components: Vec<&str> = task_id.split('/').collect();
        if components.len() < 2 {
            return Err(TaskIdError::TooFewComponents(task_id.to_string()));
        }
        let prompt_id =
            ContentId::parse(components[0]).map_err(|source| TaskIdError::InvalidPromptId {
                task_id: task_id.to_string(),
                source,
            })?;
        let prompt_type =
            PromptType::parse(components[1]).ok_or_else(|| TaskIdError::UnknownPromptType {
                task_id: task_id.to_string(),
                prompt_type: components[1].to_string(),
            })?;

        match (prompt_type, components.len()) {
            (PromptType::Basic | PromptType::Application, 2) => Ok(Self {
                prompt_id,
                prompt_type,
                parameters: PromptParameters::Whole,
            }),
            (PromptType::Cloze, 3) => {
                let cloze_index =
                    components[2]
                        .parse::<u32>()
                        .map_err(|_| TaskIdError::InvalidClozeIndex {
                            task_id: task_id.to_string(),
                            index: components[2].to_string(),
                        })?;
                Ok(Self::cloze(prompt_id, cloze_index))
            }
            (PromptType::Cloze, 2) => Err(TaskIdError::TooFewComponents(task_id.to_string())),
            _ => Err(TaskIdError::TooManyComponents(task_id.to_string())),
        }
    }
}

/// Per-review parameters recorded with a repetition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskParameters {
    /// Which application prompt variant was shown
    pub variant_index: u32,
}

impl TaskParameters {
    pub fn variant(variant_index: u32) -> Self {
        Self { variant_index }
    }

    /// Whether a repetition of a task of this type may carry these parameters
    pub fn is_valid_for(parameters: Option<&TaskParameters>, prompt_type: PromptType) -> bool {
        match (prompt_type, parameters) {
            (_, None) => true,
            (PromptType::Application, Some(_)) => true,
            (PromptType::Basic | PromptType::Cloze, Some(_)) => false,
        }
    }
}

impl Canonical for TaskParameters {
    fn canonical_form(&self) -> Result<CanonicalValue, AddressingError> {
        Ok(CanonicalMap::new()
            .field("variantIndex", self.variant_index)
            .into())
    }
}
