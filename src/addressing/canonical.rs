//! Canonical value trees and their byte encoding
//!
//! Every content ID is a digest over these bytes, so the encoding has to come
//! out identical on every device. Map keys are kept sorted, there is no float
//! variant, timestamps are written as fixed-width integers and references to
//! other content are written as links rather than embedded bytes.

use super::{AddressingError, ContentId};
use ciborium::value::Value as Cbor;
use std::collections::BTreeMap;

/// CBOR tag for content links (the tag dag-cbor uses for CIDs)
pub const LINK_TAG: u64 = 42;

/// CBOR tag wrapping an 8-byte big-endian millisecond timestamp
pub const TIMESTAMP_MILLIS_TAG: u64 = 40_001;

/// A value in canonical form, ready to be encoded and hashed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanonicalValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// Milliseconds since the epoch, always encoded in 8 bytes
    Timestamp(i64),
    Text(String),
    Bytes(Vec<u8>),
    /// A reference to other content by its ID
    Link(ContentId),
    List(Vec<CanonicalValue>),
    Map(CanonicalMap),
}

impl CanonicalValue {
    pub fn text(s: impl Into<String>) -> Self {
        CanonicalValue::Text(s.into())
    }

    pub fn timestamp(millis: i64) -> Self {
        CanonicalValue::Timestamp(millis)
    }

    pub fn link(id: &ContentId) -> Self {
        CanonicalValue::Link(id.clone())
    }

    /// A list of links, sorted so that the order of a set never changes the encoding
    pub fn link_set<'a>(ids: impl IntoIterator<Item = &'a ContentId>) -> Self {
        let mut ids: Vec<&ContentId> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();
        CanonicalValue::List(ids.into_iter().map(CanonicalValue::link).collect())
    }

    fn to_cbor(&self) -> Result<Cbor, AddressingError> {
        Ok(match self {
            CanonicalValue::Null => Cbor::Null,
            CanonicalValue::Bool(b) => Cbor::Bool(*b),
            CanonicalValue::Int(n) => Cbor::Integer((*n).into()),
            CanonicalValue::UInt(n) => Cbor::Integer((*n).into()),
            CanonicalValue::Timestamp(millis) => Cbor::Tag(
                TIMESTAMP_MILLIS_TAG,
                Box::new(Cbor::Bytes(millis.to_be_bytes().to_vec())),
            ),
            CanonicalValue::Text(s) => Cbor::Text(s.clone()),
            CanonicalValue::Bytes(b) => Cbor::Bytes(b.clone()),
            CanonicalValue::Link(id) => Cbor::Tag(LINK_TAG, Box::new(Cbor::Bytes(id.to_bytes()?))),
            CanonicalValue::List(items) => Cbor::Array(
                items
                    .iter()
                    .map(CanonicalValue::to_cbor)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            CanonicalValue::Map(map) => map.to_cbor()?,
        })
    }

    /// Encode to canonical CBOR bytes
    pub fn encode(&self) -> Result<Vec<u8>, AddressingError> {
        let value = self.to_cbor()?;
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&value, &mut bytes)
            .map_err(|e| AddressingError::Encoding(e.to_string()))?;
        Ok(bytes)
    }
}

impl From<bool> for CanonicalValue {
    fn from(b: bool) -> Self {
        CanonicalValue::Bool(b)
    }
}

impl From<i64> for CanonicalValue {
    fn from(n: i64) -> Self {
        CanonicalValue::Int(n)
    }
}

impl From<u32> for CanonicalValue {
    fn from(n: u32) -> Self {
        CanonicalValue::UInt(n.into())
    }
}

impl From<u64> for CanonicalValue {
    fn from(n: u64) -> Self {
        CanonicalValue::UInt(n)
    }
}

impl From<&str> for CanonicalValue {
    fn from(s: &str) -> Self {
        CanonicalValue::Text(s.to_string())
    }
}

impl From<String> for CanonicalValue {
    fn from(s: String) -> Self {
        CanonicalValue::Text(s)
    }
}

impl From<&ContentId> for CanonicalValue {
    fn from(id: &ContentId) -> Self {
        CanonicalValue::Link(id.clone())
    }
}

impl From<CanonicalMap> for CanonicalValue {
    fn from(map: CanonicalMap) -> Self {
        CanonicalValue::Map(map)
    }
}

impl From<Vec<CanonicalValue>> for CanonicalValue {
    fn from(items: Vec<CanonicalValue>) -> Self {
        CanonicalValue::List(items)
    }
}

/// A string-keyed map whose keys are always encoded in sorted order.
///
/// Fields that are absent are left out entirely; fields that are present but
/// empty are written as an explicit null. The two encode differently.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CanonicalMap {
    entries: BTreeMap<String, CanonicalValue>,
}

impl CanonicalMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a map for one variant of a tagged union
    pub fn tagged(tag_key: &str, tag: &str) -> Self {
        Self::new().field(tag_key, tag)
    }

    /// Add a field that is always present
    pub fn field(mut self, key: &str, value: impl Into<CanonicalValue>) -> Self {
        self.entries.insert(key.to_string(), value.into());
        self
    }

    /// Add a field that is written as null when `value` is `None`
    pub fn nullable<V: Into<CanonicalValue>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self.field(key, CanonicalValue::Null),
        }
    }

    /// Add a field that is omitted when `value` is `None`
    pub fn optional<V: Into<CanonicalValue>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&CanonicalValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn to_cbor(&self) -> Result<Cbor, AddressingError> {
        let entries = self
            .entries
            .iter()
            .map(|(key, value)| Ok((Cbor::Text(key.clone()), value.to_cbor()?)))
            .collect::<Result<Vec<_>, AddressingError>>()?;
        Ok(Cbor::Map(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_does_not_change_encoding() {
        let a = CanonicalMap::new()
            .field("zeta", 1i64)
            .field("alpha", "x")
            .field("mid", true);
        let b = CanonicalMap::new()
            .field("mid", true)
            .field("zeta", 1i64)
            .field("alpha", "x");

        assert_eq!(
            CanonicalValue::from(a).encode().unwrap(),
            CanonicalValue::from(b).encode().unwrap()
        );
    }

    #[test]
    fn test_omitted_and_null_encode_differently() {
        let omitted = CanonicalMap::new().optional::<&str>("context", None);
        let null = CanonicalMap::new().nullable::<&str>("context", None);

        assert!(omitted.get("context").is_none());
        assert_eq!(null.get("context"), Some(&CanonicalValue::Null));
        assert_ne!(
            CanonicalValue::from(omitted).encode().unwrap(),
            CanonicalValue::from(null).encode().unwrap()
        );
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let small = CanonicalValue::timestamp(0).encode().unwrap();
        let large = CanonicalValue::timestamp(1_700_000_000_000).encode().unwrap();
        let negative = CanonicalValue::timestamp(-5).encode().unwrap();

        assert_eq!(small.len(), large.len());
        assert_eq!(small.len(), negative.len());
        // Plain integers stay minimal
        assert!(CanonicalValue::Int(0).encode().unwrap().len() < small.len());
    }

    #[test]
    fn test_link_sets_ignore_order_and_duplicates() {
        let a = ContentId::for_raw_bytes(b"a");
        let b = ContentId::for_raw_bytes(b"b");

        let forward = CanonicalValue::link_set([&a, &b]).encode().unwrap();
        let backward = CanonicalValue::link_set([&b, &a, &b]).encode().unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_links_are_tagged() {
        let id = ContentId::for_raw_bytes(b"attachment");
        let encoded = CanonicalValue::link(&id).encode().unwrap();
        let decoded: Cbor = ciborium::de::from_reader(encoded.as_slice()).unwrap();

        match decoded {
            Cbor::Tag(tag, inner) => {
                assert_eq!(tag, LINK_TAG);
                assert_eq!(*inner, Cbor::Bytes(id.to_bytes().unwrap()));
            }
            other => panic!("expected tagged link, got {:?}", other),
        }
    }
}
