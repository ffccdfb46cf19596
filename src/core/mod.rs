//! # Core Protocol Components
//!
//! Packet ids, frame layout, stream framing, body serialization and the packet codec.
//!
//! ## Components
//! - **PacketIdMapper**: deterministic type name to packet id registry
//! - **Packet**: frame header layout and zero-copy frame views
//! - **Codec**: Tokio codec that splits a byte stream into whole frames
//! - **Prefix**: routing token resolvers used by gateway relays
//! - **Serialization**: pluggable body codecs (bincode, MessagePack, JSON)
//! - **Custom**: per-type and per-field serializer overrides
//! - **PacketCodec**: typed encode/decode on top of all of the above
//!
//! ## Wire Format
//! ```text
//! [Length(2)] [Flags(4)] [PacketId(2)] [Prefix(0..N)] [Body(M)]
//! ```
//! All integers are little-endian. `Length` counts every byte after itself,
//! so a single frame never exceeds 65537 bytes on the wire.

pub mod codec;
pub mod custom;
pub mod flags;
pub mod packet;
pub mod packet_codec;
pub mod packet_id;
pub mod prefix;
pub mod serialization;
