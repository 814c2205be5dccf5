//! Prompt content
//!
//! Prompts are the immutable content a learner reviews. A prompt's ID is the
//! hash of its canonical form; attachments appear in that form only as links,
//! never as bytes. Tasks (see [`task`]) are the units of scheduling derived from
//! prompts.

mod attachment;
pub mod task;

pub use attachment::{Attachment, AttachmentId, AttachmentMimeType, AttachmentReference};
pub use task::{PromptParameters, PromptTask, TaskId, TaskIdError, TaskParameters};

use crate::addressing::{
    AddressingError, Canonical, CanonicalMap, CanonicalValue, ContentAddressable, ContentId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type PromptId = ContentId;

const PROMPT_TYPE_KEY: &str = "promptType";

/// The kinds of prompt content
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptType {
    #[serde(rename = "basicPrompt")]
    Basic,
    #[serde(rename = "applicationPrompt")]
    Application,
    #[serde(rename = "clozePrompt")]
    Cloze,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::Basic => "basicPrompt",
            PromptType::Application => "applicationPrompt",
            PromptType::Cloze => "clozePrompt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basicPrompt" => Some(PromptType::Basic),
            "applicationPrompt" => Some(PromptType::Application),
            "clozePrompt" => Some(PromptType::Cloze),
            _ => None,
        }
    }

    /// Whether a forgotten review puts the task into a short retry loop.
    ///
    /// Application prompts show a different variant each time, so an immediate
    /// retry would test a different question; they never retry.
    pub fn supports_retry(&self) -> bool {
        match self {
            PromptType::Basic | PromptType::Cloze => true,
            PromptType::Application => false,
        }
    }
}

impl fmt::Display for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text plus the attachments shown with it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptField {
    pub contents: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentReference>,
}

impl PromptField {
    pub fn text(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentReference) -> Self {
        self.attachments.push(attachment);
        self
    }
}

impl Canonical for PromptField {
    fn canonical_form(&self) -> Result<CanonicalValue, AddressingError> {
        let attachments = self
            .attachments
            .iter()
            .map(Canonical::canonical_form)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CanonicalMap::new()
            .field("contents", self.contents.as_str())
            .field("attachments", attachments)
            .into())
    }
}

/// A question/answer pair, the body of basic prompts and of application variants
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaPrompt {
    pub question: PromptField,
    pub answer: PromptField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<PromptField>,
}

impl QaPrompt {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: PromptField::text(question),
            answer: PromptField::text(answer),
            explanation: None,
        }
    }
}

impl Canonical for QaPrompt {
    fn canonical_form(&self) -> Result<CanonicalValue, AddressingError> {
        Ok(CanonicalMap::new()
            .field("question", self.question.canonical_form()?)
            .field("answer", self.answer.canonical_form()?)
            .optional(
                "explanation",
                self.explanation
                    .as_ref()
                    .map(Canonical::canonical_form)
                    .transpose()?,
            )
            .into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationPrompt {
    pub variants: Vec<QaPrompt>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClozePrompt {
    pub body: PromptField,
}

/// Prompt content, tagged by `promptType` on the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "promptType")]
pub enum Prompt {
    #[serde(rename = "basicPrompt")]
    Basic(QaPrompt),
    #[serde(rename = "applicationPrompt")]
    Application(ApplicationPrompt),
    #[serde(rename = "clozePrompt")]
    Cloze(ClozePrompt),
}

impl Prompt {
    pub fn prompt_type(&self) -> PromptType {
        match self {
            Prompt::Basic(_) => PromptType::Basic,
            Prompt::Application(_) => PromptType::Application,
            Prompt::Cloze(_) => PromptType::Cloze,
        }
    }

    /// Decode wire JSON, reporting unknown prompt types as schema errors
    pub fn from_json(json: &str) -> Result<Self, AddressingError> {
        serde_json::from_str(json).map_err(|e| crate::addressing::schema_error("prompt", e))
    }

    /// Every attachment referenced anywhere in the prompt
    pub fn attachment_ids(&self) -> Vec<&AttachmentId> {
        let fields: Vec<&PromptField> = match self {
            Prompt::Basic(qa) => qa_fields(qa),
            Prompt::Application(app) => app.variants.iter().flat_map(qa_fields).collect(),
            Prompt::Cloze(cloze) => vec![&cloze.body],
        };
        fields
            .into_iter()
            .flat_map(|field| field.attachments.iter().map(|a| &a.id))
            .collect()
    }
}

fn qa_fields(qa: &QaPrompt) -> Vec<&PromptField> {
    let mut fields = vec![&qa.question, &qa.answer];
    if let Some(explanation) = &qa.explanation {
        fields.push(explanation);
    }
    fields
}

impl Canonical for Prompt {
    fn canonical_form(&self) -> Result<CanonicalValue, AddressingError> {
        let map = CanonicalMap::tagged(PROMPT_TYPE_KEY, self.prompt_type().as_str());
        let map = match self {
            Prompt::Basic(qa) => map.field("body", qa.canonical_form()?),
            Prompt::Application(app) => {
                if app.variants.is_empty() {
                    return Err(AddressingError::Encoding(
                        "application prompt without variants".into(),
                    ));
                }
                let variants = app
                    .variants
                    .iter()
                    .map(Canonical::canonical_form)
                    .collect::<Result<Vec<_>, _>>()?;
                map.field("variants", variants)
            }
            Prompt::Cloze(cloze) => map.field("body", cloze.body.canonical_form()?),
        };
        Ok(map.into())
    }
}

impl ContentAddressable for Prompt {}
