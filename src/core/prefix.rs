//! # Routing Prefix Resolvers
//!
//! A routing prefix is a fixed-width token placed right after the packet id.
//! Its width is not on the wire: both ends of a routing hop must be configured
//! with the same resolver. Every resolver yields a [`SessionId`]; narrower
//! integer tokens are widened.

use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{constants, ProtocolError, Result};

/// 128-bit session identifier, also used as the routing token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SessionId(pub u128);

impl SessionId {
    pub const NIL: SessionId = SessionId(0);

    pub fn random() -> Self {
        SessionId(Uuid::new_v4().as_u128())
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }
}

impl From<u32> for SessionId {
    fn from(value: u32) -> Self {
        SessionId(u128::from(value))
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        SessionId(u128::from(value))
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        SessionId(value.as_u128())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_u128(self.0))
    }
}

/// Which resolver a routing hop uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefixKind {
    #[default]
    None,
    U32,
    U64,
    Uuid,
}

impl PrefixKind {
    pub fn resolver(self) -> Option<Arc<dyn PrefixResolver>> {
        match self {
            PrefixKind::None => None,
            PrefixKind::U32 => Some(Arc::new(U32Prefix)),
            PrefixKind::U64 => Some(Arc::new(U64Prefix)),
            PrefixKind::Uuid => Some(Arc::new(UuidPrefix)),
        }
    }
}

/// Reads and writes the routing token of a frame
pub trait PrefixResolver: Send + Sync + fmt::Debug {
    /// Token width in bytes
    fn width(&self) -> usize;

    fn name(&self) -> &'static str;

    /// Read the token at `cursor`, returning it with the cursor just past it.
    ///
    /// `data` must already be limited to the declared frame length.
    fn resolve(&self, data: &[u8], cursor: usize) -> Result<(SessionId, usize)>;

    /// Append `token` to `sink`; fails if it does not fit the width
    fn write(&self, token: SessionId, sink: &mut BytesMut) -> Result<()>;

    /// Largest token this resolver can carry
    fn max_token(&self) -> u128 {
        match self.width() {
            width if width >= 16 => u128::MAX,
            width => (1u128 << (width * 8)) - 1,
        }
    }

    /// True if `token` can be written by this resolver
    fn fits(&self, token: SessionId) -> bool {
        token.0 <= self.max_token()
    }
}

fn token_bytes(data: &[u8], cursor: usize, width: usize) -> Result<&[u8]> {
    cursor
        .checked_add(width)
        .and_then(|end| data.get(cursor..end))
        .ok_or(ProtocolError::MalformedFrame(
            constants::ERR_PREFIX_OUT_OF_BOUNDS,
        ))
}

/// 32-bit integer session ids
#[derive(Debug, Clone, Copy, Default)]
pub struct U32Prefix;

impl PrefixResolver for U32Prefix {
    fn width(&self) -> usize {
        4
    }

    fn name(&self) -> &'static str {
        "u32"
    }

    fn resolve(&self, data: &[u8], cursor: usize) -> Result<(SessionId, usize)> {
        let raw = token_bytes(data, cursor, 4)?;
        let value = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        Ok((SessionId::from(value), cursor + 4))
    }

    fn write(&self, token: SessionId, sink: &mut BytesMut) -> Result<()> {
        let value = u32::try_from(token.0).map_err(|_| {
            ProtocolError::SerializeError(format!("session {token} does not fit a u32 prefix"))
        })?;
        sink.put_u32_le(value);
        Ok(())
    }
}

/// 64-bit integer session ids
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Prefix;

impl PrefixResolver for U64Prefix {
    fn width(&self) -> usize {
        8
    }

    fn name(&self) -> &'static str {
        "u64"
    }

    fn resolve(&self, data: &[u8], cursor: usize) -> Result<(SessionId, usize)> {
        let raw = token_bytes(data, cursor, 8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(raw);
        Ok((SessionId::from(u64::from_le_bytes(word)), cursor + 8))
    }

    fn write(&self, token: SessionId, sink: &mut BytesMut) -> Result<()> {
        let value = u64::try_from(token.0).map_err(|_| {
            ProtocolError::SerializeError(format!("session {token} does not fit a u64 prefix"))
        })?;
        sink.put_u64_le(value);
        Ok(())
    }
}

/// 128-bit identifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidPrefix;

impl PrefixResolver for UuidPrefix {
    fn width(&self) -> usize {
        16
    }

    fn name(&self) -> &'static str {
        "uuid"
    }

    fn resolve(&self, data: &[u8], cursor: usize) -> Result<(SessionId, usize)> {
        let raw = token_bytes(data, cursor, 16)?;
        let mut word = [0u8; 16];
        word.copy_from_slice(raw);
        Ok((SessionId(u128::from_le_bytes(word)), cursor + 16))
    }

    fn write(&self, token: SessionId, sink: &mut BytesMut) -> Result<()> {
        sink.put_u128_le(token.0);
        Ok(())
    }
}
