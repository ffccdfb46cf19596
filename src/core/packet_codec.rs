//! # Packet Codec
//!
//! Typed encode/decode of messages to and from complete frames.
//!
//! The codec owns a dispatch table from packet id to a monomorphized decode
//! function, filled in by [`PacketCodec::register`]. Dynamic decoding
//! ([`PacketCodec::decode_any`]) therefore needs no runtime type inspection.
//!
//! ## Example
//! ```rust
//! use packet_gateway::core::flags::PacketFlags;
//! use packet_gateway::core::packet_codec::PacketCodec;
//! use packet_gateway::core::packet_id::PacketMessage;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct CountTestMessage {
//!     adder: i32,
//! }
//!
//! impl PacketMessage for CountTestMessage {
//!     const TYPE_NAME: &'static str = "demo.CountTestMessage";
//! }
//!
//! let codec = PacketCodec::default();
//! let id = codec.register::<CountTestMessage>().unwrap();
//! let frame = codec.encode(&CountTestMessage { adder: 42 }, PacketFlags::empty()).unwrap();
//! let packet = codec.decode::<CountTestMessage>(&frame).unwrap();
//! assert_eq!(packet.header.packet_id, id);
//! assert_eq!(packet.message.adder, 42);
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::RwLock;
use tracing::trace;

use crate::config::CodecConfig;
use crate::core::custom::CustomCodecProvider;
use crate::core::flags::PacketFlags;
use crate::core::packet::{
    parse_frame, FrameHeader, FrameView, HEADER_SIZE, LENGTH_FIELD_SIZE, MAX_DECLARED_LENGTH,
};
use crate::core::packet_id::{PacketId, PacketIdMapper, PacketMessage};
use crate::core::prefix::{PrefixResolver, SessionId};
use crate::core::serialization::{BodyCodec, FormatBody};
use crate::error::{constants, ProtocolError, Result};

type ErasedDecode<B> = fn(&PacketCodec<B>, &[u8]) -> Result<Box<dyn Any + Send>>;

/// A decoded frame with a statically known message type
#[derive(Debug, Clone, PartialEq)]
pub struct Packet<T> {
    pub header: FrameHeader,
    pub prefix: Option<SessionId>,
    pub message: T,
}

/// A decoded frame whose message type is only known through its packet id
pub struct DecodedPacket {
    pub header: FrameHeader,
    pub prefix: Option<SessionId>,
    pub type_name: &'static str,
    pub message: Box<dyn Any + Send>,
}

impl DecodedPacket {
    pub fn is<T: PacketMessage>(&self) -> bool {
        self.message.is::<T>()
    }

    /// Recover the typed packet, or give `self` back if the type is different
    pub fn downcast<T: PacketMessage>(self) -> std::result::Result<Packet<T>, Self> {
        if !self.message.is::<T>() {
            return Err(self);
        }
        match self.message.downcast::<T>() {
            Ok(message) => Ok(Packet {
                header: self.header,
                prefix: self.prefix,
                message: *message,
            }),
            Err(message) => Err(Self { message, ..self }),
        }
    }
}

impl fmt::Debug for DecodedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedPacket")
            .field("header", &self.header)
            .field("prefix", &self.prefix)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Frames typed messages using a packet id mapper, a body codec and optional
/// serializer overrides and routing prefix
pub struct PacketCodec<B: BodyCodec = FormatBody> {
    mapper: Arc<PacketIdMapper>,
    body: B,
    overrides: CustomCodecProvider,
    prefix: Option<Arc<dyn PrefixResolver>>,
    decoders: RwLock<HashMap<PacketId, ErasedDecode<B>>>,
}

impl Default for PacketCodec<FormatBody> {
    fn default() -> Self {
        Self::new(FormatBody::default())
    }
}

impl PacketCodec<FormatBody> {
    /// Build a codec from configuration
    pub fn from_config(config: &CodecConfig) -> Self {
        let codec = Self::new(FormatBody::new(config.body_format));
        match config.prefix.resolver() {
            Some(resolver) => codec.with_prefix(resolver),
            None => codec,
        }
    }
}

impl<B: BodyCodec> PacketCodec<B> {
    pub fn new(body: B) -> Self {
        Self {
            mapper: Arc::new(PacketIdMapper::new()),
            body,
            overrides: CustomCodecProvider::new(),
            prefix: None,
            decoders: RwLock::new(HashMap::new()),
        }
    }

    /// Use an explicitly owned mapper instead of a fresh one
    pub fn with_mapper(mut self, mapper: Arc<PacketIdMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_overrides(mut self, overrides: CustomCodecProvider) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_prefix(mut self, resolver: Arc<dyn PrefixResolver>) -> Self {
        self.prefix = Some(resolver);
        self
    }

    pub fn mapper(&self) -> &Arc<PacketIdMapper> {
        &self.mapper
    }

    pub fn prefix_resolver(&self) -> Option<&Arc<dyn PrefixResolver>> {
        self.prefix.as_ref()
    }

    pub fn body_codec(&self) -> &B {
        &self.body
    }

    /// Register `T` under its hash-derived packet id.
    ///
    /// If a shared mapper already knows `T`, only the decoder is attached to
    /// this codec and the existing id is returned.
    pub fn register<T: PacketMessage>(&self) -> Result<PacketId> {
        self.attach::<T>(None)
    }

    /// Register `T` under an explicitly assigned packet id
    pub fn register_with_id<T: PacketMessage>(&self, id: PacketId) -> Result<PacketId> {
        self.attach::<T>(Some(id))
    }

    fn attach<T: PacketMessage>(&self, requested: Option<PacketId>) -> Result<PacketId> {
        let mut decoders = self.decoders.write();
        let id = match self.mapper.get_id::<T>() {
            Ok(existing) => {
                if let Some(requested) = requested.filter(|&r| r != existing) {
                    return Err(ProtocolError::IdCollision {
                        id: requested.0,
                        name: T::TYPE_NAME,
                        existing: T::TYPE_NAME,
                    });
                }
                existing
            }
            Err(_) => {
                let registered = match requested {
                    Some(id) => self.mapper.register_with_id::<T>(id),
                    None => self.mapper.register::<T>(),
                };
                match registered {
                    // Another codec on the same mapper got there first
                    Err(ProtocolError::DuplicateRegistration(_)) => self.mapper.get_id::<T>()?,
                    other => other?,
                }
            }
        };

        if decoders.contains_key(&id) {
            return Err(ProtocolError::DuplicateRegistration(T::TYPE_NAME));
        }
        decoders.insert(id, decode_erased::<T, B>);
        Ok(id)
    }

    /// True if this codec can decode frames carrying `id`
    pub fn has_decoder(&self, id: PacketId) -> bool {
        self.decoders.read().contains_key(&id)
    }

    /// Encode a frame. With a prefix resolver configured, the nil token is written.
    pub fn encode<T: PacketMessage>(&self, message: &T, flags: PacketFlags) -> Result<Bytes> {
        self.encode_frame(message, flags, SessionId::NIL)
    }

    /// Encode a frame carrying `token` as its routing prefix
    pub fn encode_routed<T: PacketMessage>(
        &self,
        message: &T,
        flags: PacketFlags,
        token: SessionId,
    ) -> Result<Bytes> {
        if self.prefix.is_none() {
            return Err(ProtocolError::ConfigError(
                constants::ERR_PREFIX_NOT_CONFIGURED.into(),
            ));
        }
        self.encode_frame(message, flags, token)
    }

    fn encode_frame<T: PacketMessage>(
        &self,
        message: &T,
        flags: PacketFlags,
        token: SessionId,
    ) -> Result<Bytes> {
        let packet_id = self.mapper.get_id::<T>()?;

        let mut frame = BytesMut::with_capacity(64);
        // Length is patched once the body size is known
        frame.put_u16_le(0);
        frame.put_u32_le(flags.bits());
        frame.put_u16_le(packet_id.0);
        if let Some(resolver) = &self.prefix {
            resolver.write(token, &mut frame)?;
        }
        self.write_body(message, &mut frame)?;

        let declared = frame.len() - LENGTH_FIELD_SIZE;
        if declared > MAX_DECLARED_LENGTH {
            return Err(ProtocolError::MessageTooLarge(frame.len()));
        }
        frame[..LENGTH_FIELD_SIZE].copy_from_slice(&(declared as u16).to_le_bytes());

        trace!(
            packet_id = %packet_id,
            bytes = frame.len(),
            name = T::TYPE_NAME,
            "Encoded frame"
        );
        Ok(frame.freeze())
    }

    fn write_body<T: PacketMessage>(&self, message: &T, sink: &mut BytesMut) -> Result<usize> {
        let start = sink.len();
        if let Some(serializer) = self.overrides.try_get_override(T::TYPE_NAME, None) {
            serializer.encode(message, sink)?;
            return Ok(sink.len() - start);
        }

        for &field in T::CUSTOM_FIELDS {
            let serializer = self
                .overrides
                .try_get_override(T::TYPE_NAME, Some(field))
                .ok_or(ProtocolError::MissingFieldCodec {
                    type_name: T::TYPE_NAME,
                    field,
                })?;
            let value = message.custom_field(field).ok_or_else(|| {
                ProtocolError::SerializeError(format!("{}.{field} is not readable", T::TYPE_NAME))
            })?;
            serializer.encode(value, sink)?;
        }

        self.body.encode_body(message, sink)?;
        Ok(sink.len() - start)
    }

    fn read_body<T: PacketMessage>(&self, body: &[u8]) -> Result<T> {
        if let Some(serializer) = self.overrides.try_get_override(T::TYPE_NAME, None) {
            let mut source = body;
            let value = serializer.decode(&mut source)?;
            return value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
                ProtocolError::DeserializeError(format!(
                    "{} override produced a different type",
                    serializer.name()
                ))
            });
        }

        let mut source = body;
        let mut fields = Vec::with_capacity(T::CUSTOM_FIELDS.len());
        for &field in T::CUSTOM_FIELDS {
            let serializer = self
                .overrides
                .try_get_override(T::TYPE_NAME, Some(field))
                .ok_or(ProtocolError::MissingFieldCodec {
                    type_name: T::TYPE_NAME,
                    field,
                })?;
            fields.push((field, serializer.decode(&mut source)?));
        }

        let mut message: T = self.body.decode_body(source)?;
        for (field, value) in fields {
            if !message.set_custom_field(field, value) {
                return Err(ProtocolError::DeserializeError(format!(
                    "{}.{field} rejected its decoded value",
                    T::TYPE_NAME
                )));
            }
        }
        Ok(message)
    }

    /// Parse header and prefix only; the body stays undecoded
    pub fn decode_header<'a>(&self, frame: &'a [u8]) -> Result<FrameView<'a>> {
        parse_frame(frame, self.prefix.as_deref())
    }

    /// Decode a frame that must carry a `T`
    pub fn decode<T: PacketMessage>(&self, frame: &[u8]) -> Result<Packet<T>> {
        let view = self.decode_header(frame)?;
        let expected = self.mapper.get_id::<T>()?;
        let actual = view.header.packet_id;
        if actual != expected {
            if !self.mapper.contains_id(actual) {
                return Err(ProtocolError::UnknownPacketId(actual.0));
            }
            return Err(ProtocolError::TypeMismatch {
                expected: expected.0,
                actual: actual.0,
            });
        }

        Ok(Packet {
            header: view.header,
            prefix: view.prefix,
            message: self.read_body(view.body)?,
        })
    }

    /// Decode a frame of any registered type
    pub fn decode_any(&self, frame: &[u8]) -> Result<DecodedPacket> {
        let view = self.decode_header(frame)?;
        let packet_id = view.header.packet_id;
        let decoder = self
            .decoders
            .read()
            .get(&packet_id)
            .copied()
            .ok_or(ProtocolError::UnknownPacketId(packet_id.0))?;
        let registered = self.mapper.get_type(packet_id)?;

        Ok(DecodedPacket {
            header: view.header,
            prefix: view.prefix,
            type_name: registered.name,
            message: decoder(self, view.body)?,
        })
    }

    /// Size of header plus prefix for this codec
    pub fn overhead(&self) -> usize {
        HEADER_SIZE + self.prefix.as_ref().map_or(0, |resolver| resolver.width())
    }
}

fn decode_erased<T: PacketMessage, B: BodyCodec>(
    codec: &PacketCodec<B>,
    body: &[u8],
) -> Result<Box<dyn Any + Send>> {
    Ok(Box::new(codec.read_body::<T>(body)?))
}

impl<B: BodyCodec + fmt::Debug> fmt::Debug for PacketCodec<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketCodec")
            .field("body", &self.body)
            .field("registered", &self.mapper.len())
            .field("overrides", &self.overrides)
            .field("prefix", &self.prefix)
            .finish()
    }
}
