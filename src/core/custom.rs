//! # Custom Serializer Overrides
//!
//! Some values are awkward for a generic body codec, a 128-bit identifier being
//! the usual example. A [`CustomCodecProvider`] maps a message type, or one of
//! its fields, to a hand-written [`CustomSerializer`].
//!
//! Lookup order at encode and decode time:
//! 1. a whole-type override replaces the body codec for that message entirely;
//! 2. otherwise each field named in `PacketMessage::CUSTOM_FIELDS` is written,
//!    in order, by its field override, followed by the body codec's bytes.
//!
//! The table is built once at startup and handed to the packet codec by value.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::error::{ProtocolError, Result};

/// Hand-written encoder/decoder for one value type
pub trait CustomSerializer: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, value: &dyn Any, sink: &mut BytesMut) -> Result<()>;

    /// Decode one value, advancing `source` past the bytes consumed
    fn decode(&self, source: &mut &[u8]) -> Result<Box<dyn Any + Send>>;
}

/// Writes a [`Uuid`] as 16 little-endian bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidSerializer;

impl CustomSerializer for UuidSerializer {
    fn name(&self) -> &'static str {
        "uuid128"
    }

    fn encode(&self, value: &dyn Any, sink: &mut BytesMut) -> Result<()> {
        let uuid = value
            .downcast_ref::<Uuid>()
            .ok_or_else(|| ProtocolError::SerializeError("uuid128 expects a Uuid".into()))?;
        sink.put_u128_le(uuid.as_u128());
        Ok(())
    }

    fn decode(&self, source: &mut &[u8]) -> Result<Box<dyn Any + Send>> {
        if source.remaining() < 16 {
            return Err(ProtocolError::DeserializeError(format!(
                "uuid128 needs 16 bytes, {} left",
                source.remaining()
            )));
        }
        Ok(Box::new(Uuid::from_u128(source.get_u128_le())))
    }
}

#[derive(Default)]
struct TypeOverrides {
    whole: Option<Arc<dyn CustomSerializer>>,
    fields: HashMap<&'static str, Arc<dyn CustomSerializer>>,
}

/// Registry of per-type and per-field serializer overrides
#[derive(Default)]
pub struct CustomCodecProvider {
    types: HashMap<&'static str, TypeOverrides>,
}

impl CustomCodecProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override serialization of one field of `type_name`
    pub fn register_field(
        &mut self,
        type_name: &'static str,
        field: &'static str,
        serializer: Arc<dyn CustomSerializer>,
    ) -> &mut Self {
        self.types
            .entry(type_name)
            .or_default()
            .fields
            .insert(field, serializer);
        self
    }

    /// Override serialization of the whole message `type_name`
    pub fn register_type(
        &mut self,
        type_name: &'static str,
        serializer: Arc<dyn CustomSerializer>,
    ) -> &mut Self {
        self.types.entry(type_name).or_default().whole = Some(serializer);
        self
    }

    /// Field override when `field` is given, whole-type override otherwise
    pub fn try_get_override(
        &self,
        type_name: &str,
        field: Option<&str>,
    ) -> Option<Arc<dyn CustomSerializer>> {
        let overrides = self.types.get(type_name)?;
        match field {
            Some(field) => overrides.fields.get(field).cloned(),
            None => overrides.whole.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Debug for CustomCodecProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.types.keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("CustomCodecProvider")
            .field("types", &names)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_serializer_consumes_sixteen_bytes() {
        let id = Uuid::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff);
        let mut sink = BytesMut::new();
        UuidSerializer.encode(&id, &mut sink).unwrap();
        sink.put_u8(0x42);
        assert_eq!(sink[0], 0xff);

        let mut source: &[u8] = &sink;
        let decoded = UuidSerializer.decode(&mut source).unwrap();
        assert_eq!(*decoded.downcast::<Uuid>().unwrap(), id);
        assert_eq!(source, &[0x42]);
    }

    #[test]
    fn test_uuid_serializer_rejects_wrong_type() {
        let mut sink = BytesMut::new();
        assert!(UuidSerializer.encode(&7u32, &mut sink).is_err());
        let mut short: &[u8] = &[1, 2, 3];
        assert!(UuidSerializer.decode(&mut short).is_err());
    }

    #[test]
    fn test_lookup_by_type_and_field() {
        let mut provider = CustomCodecProvider::new();
        provider
            .register_field("game.Move", "entity", Arc::new(UuidSerializer))
            .register_type("game.Blob", Arc::new(UuidSerializer));

        assert!(provider.try_get_override("game.Move", Some("entity")).is_some());
        assert!(provider.try_get_override("game.Move", Some("x")).is_none());
        assert!(provider.try_get_override("game.Move", None).is_none());
        assert!(provider.try_get_override("game.Blob", None).is_some());
        assert!(provider.try_get_override("game.Other", None).is_none());
    }
}
