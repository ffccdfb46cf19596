//! # Packet Id Registry
//!
//! Maps message types to 16-bit packet ids and back.
//!
//! Ids are derived from the message's fully-qualified type name: the first
//! eight bytes of its SHA-256 digest, read little-endian, reduced modulo
//! [`PACKET_ID_PRIME`]. Two processes that register the same names therefore
//! agree on every id without exchanging registration order.
//!
//! Registration is one-to-one in both directions. Registering a type twice, or
//! a type whose id is already held by another type, fails and must abort
//! startup; nothing is ever overwritten.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ProtocolError, Result};

/// Largest prime below 2^16; hashed ids are reduced modulo this value
pub const PACKET_ID_PRIME: u64 = 65_521;

/// Numeric tag identifying a registered message type on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PacketId(pub u16);

impl PacketId {
    /// Derive the id for a fully-qualified type name
    pub fn from_type_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        PacketId((u64::from_le_bytes(word) % PACKET_ID_PRIME) as u16)
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// A message type that can travel inside a frame.
///
/// `TYPE_NAME` must be the fully-qualified name shared by every peer, e.g.
/// `"game.net.CountTestMessage"`. It is the only input to id derivation.
///
/// Fields listed in `CUSTOM_FIELDS` are written by a registered
/// [`CustomSerializer`](crate::core::custom::CustomSerializer) instead of the
/// body codec. Such fields must be `#[serde(skip)]` and exposed through
/// [`custom_field`](Self::custom_field) / [`set_custom_field`](Self::set_custom_field).
pub trait PacketMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Fully-qualified type name used for packet id derivation
    const TYPE_NAME: &'static str;

    /// Fields serialized through custom field overrides, in wire order
    const CUSTOM_FIELDS: &'static [&'static str] = &[];

    /// Borrow a custom field's value for encoding
    fn custom_field(&self, _field: &str) -> Option<&(dyn Any + Send + Sync)> {
        None
    }

    /// Store a decoded custom field value; returns false if the field or type is wrong
    fn set_custom_field(&mut self, _field: &str, _value: Box<dyn Any + Send>) -> bool {
        false
    }
}

/// Metadata for a registered message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredType {
    pub id: PacketId,
    pub name: &'static str,
    pub type_id: TypeId,
}

#[derive(Debug, Default)]
struct Tables {
    by_type: HashMap<TypeId, RegisteredType>,
    by_id: HashMap<PacketId, RegisteredType>,
}

/// Bidirectional type <-> packet id registry.
///
/// Writes take an exclusive lock; steady-state lookups share a read lock.
#[derive(Debug, Default)]
pub struct PacketIdMapper {
    tables: RwLock<Tables>,
}

impl PacketIdMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its hash-derived id
    pub fn register<T: PacketMessage>(&self) -> Result<PacketId> {
        self.insert::<T>(PacketId::from_type_name(T::TYPE_NAME))
    }

    /// Register `T` under an explicitly assigned id
    pub fn register_with_id<T: PacketMessage>(&self, id: PacketId) -> Result<PacketId> {
        self.insert::<T>(id)
    }

    fn insert<T: PacketMessage>(&self, id: PacketId) -> Result<PacketId> {
        let entry = RegisteredType {
            id,
            name: T::TYPE_NAME,
            type_id: TypeId::of::<T>(),
        };

        let mut tables = self.tables.write();
        if tables.by_type.contains_key(&entry.type_id) {
            return Err(ProtocolError::DuplicateRegistration(T::TYPE_NAME));
        }
        if let Some(existing) = tables.by_id.get(&id) {
            return Err(ProtocolError::IdCollision {
                id: id.0,
                name: T::TYPE_NAME,
                existing: existing.name,
            });
        }

        tables.by_type.insert(entry.type_id, entry);
        tables.by_id.insert(id, entry);
        debug!(packet_id = %id, name = T::TYPE_NAME, "Registered packet type");
        Ok(id)
    }

    /// Look up the id assigned to `T`
    pub fn get_id<T: PacketMessage>(&self) -> Result<PacketId> {
        self.tables
            .read()
            .by_type
            .get(&TypeId::of::<T>())
            .map(|entry| entry.id)
            .ok_or(ProtocolError::UnregisteredType(T::TYPE_NAME))
    }

    /// Look up the type registered under `id`
    pub fn get_type(&self, id: PacketId) -> Result<RegisteredType> {
        self.tables
            .read()
            .by_id
            .get(&id)
            .copied()
            .ok_or(ProtocolError::UnknownPacketId(id.0))
    }

    pub fn contains_id(&self, id: PacketId) -> bool {
        self.tables.read().by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tables.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered types, ordered by packet id
    pub fn registered(&self) -> Vec<RegisteredType> {
        let mut all: Vec<RegisteredType> = self.tables.read().by_id.values().copied().collect();
        all.sort_by_key(|entry| entry.id);
        all
    }
}
