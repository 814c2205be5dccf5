//! Content addressing
//!
//! Prompts, attachments and action logs are identified by the hash of their
//! canonical encoding. An ID is a self-describing string: the multibase prefix
//! `f` (lowercase base16) followed by a CIDv1 header (version, content codec,
//! hash algorithm, digest length) and the sha2-256 digest.
//!
//! Equal content always yields an equal ID, and anyone holding the content can
//! recompute the ID to detect tampering.

mod canonical;

pub use canonical::{CanonicalMap, CanonicalValue, LINK_TAG, TIMESTAMP_MILLIS_TAG};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Multibase prefix for lowercase base16
pub const MULTIBASE_BASE16: char = 'f';

const CID_VERSION: u8 = 0x01;
const SHA2_256: u8 = 0x12;
const DIGEST_LENGTH: u8 = 32;
const HEADER_LENGTH: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressingError {
    #[error("Unsupported {kind} variant: {tag}")]
    UnsupportedVariant { kind: &'static str, tag: String },

    #[error("Content ID mismatch: claimed {claimed}, computed {computed}")]
    IdMismatch { claimed: ContentId, computed: ContentId },

    #[error("Malformed content ID: {0}")]
    MalformedId(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// The kind of bytes a content ID was computed over
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Codec {
    /// Canonical CBOR produced by [`CanonicalValue::encode`]
    DagCbor,
    /// Opaque bytes (attachment contents)
    Raw,
}

impl Codec {
    fn code(self) -> u8 {
        match self {
            Codec::DagCbor => 0x71,
            Codec::Raw => 0x55,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0x71 => Some(Codec::DagCbor),
            0x55 => Some(Codec::Raw),
            _ => None,
        }
    }
}

/// Opaque identifier derived from content
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String, Codec);

impl ContentId {
    /// ID for bytes produced by the canonical encoder
    pub fn for_canonical_bytes(bytes: &[u8]) -> Self {
        Self::from_digest(Codec::DagCbor, bytes)
    }

    /// ID for opaque bytes such as attachment contents
    pub fn for_raw_bytes(bytes: &[u8]) -> Self {
        Self::from_digest(Codec::Raw, bytes)
    }

    fn from_digest(codec: Codec, bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut raw = Vec::with_capacity(HEADER_LENGTH + digest.len());
        raw.extend_from_slice(&[CID_VERSION, codec.code(), SHA2_256, DIGEST_LENGTH]);
        raw.extend_from_slice(&digest);
        ContentId(format!("{}{}", MULTIBASE_BASE16, hex::encode(raw)), codec)
    }

    /// Parse and validate an ID string
    pub fn parse(s: &str) -> Result<Self, AddressingError> {
        let body = s
            .strip_prefix(MULTIBASE_BASE16)
            .ok_or_else(|| AddressingError::MalformedId(format!("{}: unknown multibase", s)))?;
        if body.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(AddressingError::MalformedId(format!("{}: not lowercase", s)));
        }
        let raw = hex::decode(body)
            .map_err(|e| AddressingError::MalformedId(format!("{}: {}", s, e)))?;
        if raw.len() != HEADER_LENGTH + DIGEST_LENGTH as usize {
            return Err(AddressingError::MalformedId(format!("{}: wrong length", s)));
        }
        let codec = Codec::from_code(raw[1])
            .filter(|_| raw[0] == CID_VERSION && raw[2] == SHA2_256 && raw[3] == DIGEST_LENGTH)
            .ok_or_else(|| AddressingError::MalformedId(format!("{}: unsupported header", s)))?;
        Ok(ContentId(s.to_string(), codec))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Binary form (CID header plus digest), used when linking from canonical values
    pub fn to_bytes(&self) -> Result<Vec<u8>, AddressingError> {
        hex::decode(&self.0[MULTIBASE_BASE16.len_utf8()..])
            .map_err(|e| AddressingError::MalformedId(format!("{}: {}", self.0, e)))
    }

    pub fn codec(&self) -> Codec {
        self.1
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentId {
    type Err = AddressingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentId {
    type Error = AddressingError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Types with a canonical encoding
pub trait Canonical {
    /// Build the canonical value tree, leaving out computed and volatile fields
    fn canonical_form(&self) -> Result<CanonicalValue, AddressingError>;

    fn canonical_bytes(&self) -> Result<Vec<u8>, AddressingError> {
        self.canonical_form()?.encode()
    }
}

/// Types identified by the hash of their canonical encoding
pub trait ContentAddressable: Canonical {
    fn content_id(&self) -> Result<ContentId, AddressingError> {
        Ok(ContentId::for_canonical_bytes(&self.canonical_bytes()?))
    }

    /// Recompute the ID and compare it against one claimed by a peer or a store
    fn verify_content_id(&self, claimed: &ContentId) -> Result<(), AddressingError> {
        let computed = self.content_id()?;
        if &computed == claimed {
            Ok(())
        } else {
            Err(AddressingError::IdMismatch {
                claimed: claimed.clone(),
                computed,
            })
        }
    }
}

/// Map a serde decoding failure onto the schema error for unknown tags
pub(crate) fn schema_error(kind: &'static str, err: serde_json::Error) -> AddressingError {
    let message = err.to_string();
    match message
        .strip_prefix("unknown variant `")
        .and_then(|rest| rest.split('`').next())
    {
        Some(tag) => AddressingError::UnsupportedVariant {
            kind,
            tag: tag.to_string(),
        },
        None => AddressingError::Encoding(message),
    }
}
