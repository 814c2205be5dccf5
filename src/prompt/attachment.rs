//! Attachments referenced from prompt fields

use crate::addressing::{AddressingError, Canonical, CanonicalMap, CanonicalValue, ContentId};
use serde::{Deserialize, Serialize};

pub type AttachmentId = ContentId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttachmentMimeType {
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/svg+xml")]
    Svg,
}

impl AttachmentMimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentMimeType::Png => "image/png",
            AttachmentMimeType::Jpeg => "image/jpeg",
            AttachmentMimeType::Svg => "image/svg+xml",
        }
    }
}

/// Attachment contents. Its ID covers the raw bytes only, so the same image
/// uploaded twice deduplicates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub mime_type: AttachmentMimeType,
    pub contents: Vec<u8>,
}

impl Attachment {
    pub fn new(mime_type: AttachmentMimeType, contents: Vec<u8>) -> Self {
        Self {
            mime_type,
            contents,
        }
    }

    pub fn id(&self) -> AttachmentId {
        ContentId::for_raw_bytes(&self.contents)
    }

    /// The reference a prompt field stores in place of the bytes
    pub fn reference(&self) -> AttachmentReference {
        AttachmentReference {
            id: self.id(),
            mime_type: self.mime_type,
            byte_length: self.contents.len() as u64,
        }
    }
}

/// A pointer from prompt content to an attachment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentReference {
    pub id: AttachmentId,
    pub mime_type: AttachmentMimeType,
    pub byte_length: u64,
}

impl Canonical for AttachmentReference {
    fn canonical_form(&self) -> Result<CanonicalValue, AddressingError> {
        Ok(CanonicalMap::new()
            .field("id", &self.id)
            .field("mimeType", self.mime_type.as_str())
            .field("byteLength", self.byte_length)
            .into())
    }
}
