//! # Body Codecs
//!
//! Pluggable serializers for the body region of a frame. Framing never looks
//! inside the body; any backend that can turn a `serde` value into bytes and
//! back can be plugged in.
//!
//! ## Backends
//! - **Bincode**: schema-driven, little-endian fixed-width integers (default)
//! - **MessagePack**: compact self-describing binary
//! - **JSON**: document format, handy for debugging and interop
//!
//! ## Usage
//! ```rust
//! use bytes::BytesMut;
//! use packet_gateway::core::serialization::{BodyCodec, BodyFormat, FormatBody};
//!
//! let codec = FormatBody::new(BodyFormat::MessagePack);
//! let mut sink = BytesMut::new();
//! let written = codec.encode_body(&(1u8, "two"), &mut sink).unwrap();
//! assert_eq!(written, sink.len());
//! let back: (u8, String) = codec.decode_body(&sink).unwrap();
//! assert_eq!(back.1, "two");
//! ```

use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Supported body formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Compact binary format (MessagePack)
    MessagePack,
    /// Human-readable document format
    Json,
}

impl BodyFormat {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            BodyFormat::Bincode => "Bincode",
            BodyFormat::MessagePack => "MessagePack",
            BodyFormat::Json => "JSON",
        }
    }
}

/// Serializer for the body region of a frame
pub trait BodyCodec: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Append the serialized message to `sink`, returning the bytes written
    fn encode_body<T: Serialize + ?Sized>(&self, message: &T, sink: &mut BytesMut) -> Result<usize>;

    /// Decode a message from exactly the body bytes
    fn decode_body<T: DeserializeOwned>(&self, source: &[u8]) -> Result<T>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeBody;

impl BodyCodec for BincodeBody {
    fn name(&self) -> &'static str {
        BodyFormat::Bincode.name()
    }

    fn encode_body<T: Serialize + ?Sized>(&self, message: &T, sink: &mut BytesMut) -> Result<usize> {
        let start = sink.len();
        bincode::serialize_into((&mut *sink).writer(), message)
            .map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
        Ok(sink.len() - start)
    }

    fn decode_body<T: DeserializeOwned>(&self, source: &[u8]) -> Result<T> {
        bincode::deserialize(source).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackBody;

impl BodyCodec for MessagePackBody {
    fn name(&self) -> &'static str {
        BodyFormat::MessagePack.name()
    }

    fn encode_body<T: Serialize + ?Sized>(&self, message: &T, sink: &mut BytesMut) -> Result<usize> {
        let start = sink.len();
        let mut writer = (&mut *sink).writer();
        rmp_serde::encode::write(&mut writer, message)
            .map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
        Ok(sink.len() - start)
    }

    fn decode_body<T: DeserializeOwned>(&self, source: &[u8]) -> Result<T> {
        rmp_serde::from_slice(source).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody;

impl BodyCodec for JsonBody {
    fn name(&self) -> &'static str {
        BodyFormat::Json.name()
    }

    fn encode_body<T: Serialize + ?Sized>(&self, message: &T, sink: &mut BytesMut) -> Result<usize> {
        let start = sink.len();
        serde_json::to_writer((&mut *sink).writer(), message)
            .map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
        Ok(sink.len() - start)
    }

    fn decode_body<T: DeserializeOwned>(&self, source: &[u8]) -> Result<T> {
        serde_json::from_slice(source).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
    }
}

/// Body codec chosen at runtime, e.g. from configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatBody {
    format: BodyFormat,
}

impl FormatBody {
    pub fn new(format: BodyFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> BodyFormat {
        self.format
    }
}

impl From<BodyFormat> for FormatBody {
    fn from(format: BodyFormat) -> Self {
        Self::new(format)
    }
}

impl BodyCodec for FormatBody {
    fn name(&self) -> &'static str {
        self.format.name()
    }

    fn encode_body<T: Serialize + ?Sized>(&self, message: &T, sink: &mut BytesMut) -> Result<usize> {
        match self.format {
            BodyFormat::Bincode => BincodeBody.encode_body(message, sink),
            BodyFormat::MessagePack => MessagePackBody.encode_body(message, sink),
            BodyFormat::Json => JsonBody.encode_body(message, sink),
        }
    }

    fn decode_body<T: DeserializeOwned>(&self, source: &[u8]) -> Result<T> {
        match self.format {
            BodyFormat::Bincode => BincodeBody.decode_body(source),
            BodyFormat::MessagePack => MessagePackBody.decode_body(source),
            BodyFormat::Json => JsonBody.decode_body(source),
        }
    }
}
