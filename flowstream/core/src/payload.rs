//! Payloads and Chunks
//!
//! A [`Payload`] is what a producer offers to [`crate::StreamCore::push`].
//! Once admitted it becomes a [`Chunk`]: the payload after encoding
//! normalization. Chunks are immutable and cheap to clone, so listeners and
//! sinks always receive a read-only view of the buffered data.

use std::sync::Arc;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde_json::Value;

use crate::config::Encoding;

/// Data offered by a producer
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Textual data
    Text(String),
    /// Byte-like data
    Bytes(Bytes),
    /// An opaque value; only admitted in object mode
    Object(Value),
    /// End-of-data sentinel
    End,
}

impl Payload {
    /// Short name of the payload kind, used in diagnostics
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Object(_) => "object",
            Self::End => "end",
        }
    }

    /// Whether this is the end-of-data sentinel
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Object(value)
    }
}

/// `None` is the end-of-data sentinel
impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::End, Into::into)
    }
}

/// An admitted, normalized payload
#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    /// Raw bytes
    Bytes(Bytes),
    /// UTF-8 text
    Text(Arc<str>),
    /// Base64 text
    Base64(Arc<str>),
    /// `u8` array
    Uint8(Arc<[u8]>),
    /// Little-endian `u16` units
    Uint16(Arc<[u16]>),
    /// Opaque object-mode value
    Object(Arc<Value>),
}

impl Chunk {
    /// Normalize raw bytes into the given encoding
    #[must_use]
    pub fn encode(data: Bytes, encoding: Encoding) -> Self {
        match encoding {
            Encoding::RawBytes => Self::Bytes(data),
            Encoding::Utf8String => Self::Text(String::from_utf8_lossy(&data).into()),
            Encoding::Base64 => Self::Base64(BASE64_STANDARD.encode(&data).into()),
            Encoding::Uint8 => Self::Uint8(data.to_vec().into()),
            Encoding::Uint16 => Self::Uint16(
                data.chunks(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
                    .collect::<Vec<_>>()
                    .into(),
            ),
        }
    }

    /// Size in bytes of the normalized representation
    ///
    /// Object chunks report zero; they are never measured.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Bytes(b) => b.len(),
            Self::Text(s) | Self::Base64(s) => s.len(),
            Self::Uint8(a) => a.len(),
            Self::Uint16(a) => a.len() * 2,
            Self::Object(_) => 0,
        }
    }

    /// Serialize the chunk back to bytes for byte-oriented sinks
    ///
    /// Text and base64 chunks yield their UTF-8 text, `u16` chunks their
    /// little-endian bytes, object chunks their JSON encoding.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Bytes(b) => b.clone(),
            Self::Text(s) | Self::Base64(s) => Bytes::copy_from_slice(s.as_bytes()),
            Self::Uint8(a) => Bytes::copy_from_slice(a),
            Self::Uint16(a) => a.iter().flat_map(|u| u.to_le_bytes()).collect(),
            Self::Object(v) => Bytes::from(v.to_string()),
        }
    }

    /// Borrow the raw bytes if this chunk holds raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow the text if this chunk holds UTF-8 or base64 text
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Base64(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the object-mode value
    #[must_use]
    pub fn as_object(&self) -> Option<&Value> {
        match self {
            Self::Object(v) => Some(v),
            _ => None,
        }
    }
}
