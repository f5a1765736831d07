//! Explicitly tagged values for free-form metadata maps.
//!
//! Values round-trip as `{"kind": "bytes"|"timestamp"|"plain", "value": ...}` so
//! binary payloads and instants survive JSON (and Redis) storage without any
//! guessing on the way back in.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Free-form metadata map
pub type MetadataMap = BTreeMap<String, TaggedValue>;

/// A serialized value with its kind made explicit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum TaggedValue {
    /// Raw bytes, base64 encoded on the wire
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    /// RFC 3339 instant
    Timestamp(DateTime<Utc>),
    /// Any other JSON value
    Plain(serde_json::Value),
}

impl TaggedValue {
    /// Plain value from anything serde_json can represent
    pub fn plain(value: impl Into<serde_json::Value>) -> Self {
        TaggedValue::Plain(value.into())
    }

    /// Borrow the plain JSON value, if this is one
    pub fn as_plain(&self) -> Option<&serde_json::Value> {
        match self {
            TaggedValue::Plain(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the timestamp, if this is one
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            TaggedValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Borrow the bytes, if this is one
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            TaggedValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl From<DateTime<Utc>> for TaggedValue {
    fn from(ts: DateTime<Utc>) -> Self {
        TaggedValue::Timestamp(ts)
    }
}

impl From<Vec<u8>> for TaggedValue {
    fn from(bytes: Vec<u8>) -> Self {
        TaggedValue::Bytes(bytes)
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
