//! Task metadata and where a task came from

use crate::addressing::{AddressingError, Canonical, CanonicalMap, CanonicalValue};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvenanceType {
    Anki,
    Note,
    Web,
}

impl ProvenanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvenanceType::Anki => "anki",
            ProvenanceType::Note => "note",
            ProvenanceType::Web => "web",
        }
    }
}

/// The external source a task was ingested from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptProvenance {
    pub provenance_type: ProvenanceType,
    #[serde(rename = "externalID")]
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_timestamp_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl PromptProvenance {
    pub fn new(provenance_type: ProvenanceType, external_id: impl Into<String>) -> Self {
        Self {
            provenance_type,
            external_id: external_id.into(),
            modification_timestamp_millis: None,
            title: None,
            url: None,
        }
    }
}

impl Canonical for PromptProvenance {
    fn canonical_form(&self) -> Result<CanonicalValue, AddressingError> {
        Ok(CanonicalMap::new()
            .field("provenanceType", self.provenance_type.as_str())
            .field("externalID", self.external_id.as_str())
            .optional(
                "modificationTimestampMillis",
                self.modification_timestamp_millis.map(CanonicalValue::timestamp),
            )
            .optional("title", self.title.as_deref())
            .optional("url", self.url.as_deref())
            .into())
    }
}

/// Mutable per-task metadata carried on the snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    pub is_deleted: bool,
    pub provenance: Option<PromptProvenance>,
}

impl TaskMetadata {
    /// Shallow merge: fields present in `updates` replace ours
    pub fn merged(&self, updates: &MetadataUpdates) -> TaskMetadata {
        TaskMetadata {
            is_deleted: updates.is_deleted.unwrap_or(self.is_deleted),
            provenance: match &updates.provenance {
                Some(provenance) => provenance.clone(),
                None => self.provenance.clone(),
            },
        }
    }
}

impl Canonical for TaskMetadata {
    fn canonical_form(&self) -> Result<CanonicalValue, AddressingError> {
        Ok(CanonicalMap::new()
            .field("isDeleted", self.is_deleted)
            .nullable(
                "provenance",
                self.provenance
                    .as_ref()
                    .map(Canonical::canonical_form)
                    .transpose()?,
            )
            .into())
    }
}

/// Partial metadata. An absent field leaves the snapshot untouched; an explicit
/// `"provenance": null` clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetadataUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub provenance: Option<Option<PromptProvenance>>,
}

impl MetadataUpdates {
    pub fn deleted(is_deleted: bool) -> Self {
        Self {
            is_deleted: Some(is_deleted),
            provenance: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_deleted.is_none() && self.provenance.is_none()
    }
}

impl Canonical for MetadataUpdates {
    fn canonical_form(&self) -> Result<CanonicalValue, AddressingError> {
        let provenance = match &self.provenance {
            None => None,
            Some(None) => Some(CanonicalValue::Null),
            Some(Some(provenance)) => Some(provenance.canonical_form()?),
        };
        Ok(CanonicalMap::new()
            .optional("isDeleted", self.is_deleted)
            .optional("provenance", provenance)
            .into())
    }
}

// A field that is present, even as `null`, deserializes to `Some`
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}
