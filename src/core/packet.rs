//! # Frame Layout
//!
//! ```text
//! [Length:u16] [Flags:u32] [PacketId:u16] [Prefix:resolver width] [Body]
//! ```
//!
//! `Length` is little-endian and counts everything after itself. Parsing here
//! only touches the header and prefix, never the body, so relays can route a
//! frame without paying for deserialization.

use bytes::{BufMut, BytesMut};

use crate::core::flags::PacketFlags;
use crate::core::packet_id::PacketId;
use crate::core::prefix::{PrefixResolver, SessionId};
use crate::error::{constants, ProtocolError, Result};

/// Size of the length field
pub const LENGTH_FIELD_SIZE: usize = 2;

/// Size of the flags field
pub const FLAGS_SIZE: usize = 4;

/// Size of the packet id field
pub const PACKET_ID_SIZE: usize = 2;

/// Fixed header: length + flags + packet id
pub const HEADER_SIZE: usize = LENGTH_FIELD_SIZE + FLAGS_SIZE + PACKET_ID_SIZE;

/// Smallest legal value of the length field (flags + packet id, empty body)
pub const MIN_DECLARED_LENGTH: usize = FLAGS_SIZE + PACKET_ID_SIZE;

/// Largest legal value of the length field
pub const MAX_DECLARED_LENGTH: usize = u16::MAX as usize;

/// Fixed part of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Bytes following the length field
    pub length: u16,
    pub flags: PacketFlags,
    pub packet_id: PacketId,
}

impl FrameHeader {
    /// Parse the fixed header of one complete frame.
    ///
    /// `frame` must hold exactly one frame: the declared length has to match
    /// the bytes that follow the length field.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < LENGTH_FIELD_SIZE {
            return Err(ProtocolError::MalformedFrame(constants::ERR_TRUNCATED_HEADER));
        }

        let declared = usize::from(u16::from_le_bytes([frame[0], frame[1]]));
        let available = frame.len() - LENGTH_FIELD_SIZE;
        if declared != available {
            return Err(ProtocolError::InvalidFrame {
                declared,
                available,
            });
        }
        if declared < MIN_DECLARED_LENGTH {
            return Err(ProtocolError::MalformedFrame(constants::ERR_TRUNCATED_HEADER));
        }

        let flags = u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]);
        let packet_id = u16::from_le_bytes([frame[6], frame[7]]);

        Ok(Self {
            length: declared as u16,
            flags: PacketFlags::from_wire(flags),
            packet_id: PacketId(packet_id),
        })
    }

    /// Append the header to `out`
    pub fn write(&self, out: &mut BytesMut) {
        out.reserve(HEADER_SIZE);
        out.put_u16_le(self.length);
        out.put_u32_le(self.flags.bits());
        out.put_u16_le(self.packet_id.0);
    }

    /// Total frame size on the wire, including the length field
    pub fn frame_len(&self) -> usize {
        LENGTH_FIELD_SIZE + usize::from(self.length)
    }
}

/// Header, routing token and an unparsed body slice of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView<'a> {
    pub header: FrameHeader,
    pub prefix: Option<SessionId>,
    pub body: &'a [u8],
}

/// Split a complete frame into header, prefix and body without decoding the body
pub fn parse_frame<'a>(
    frame: &'a [u8],
    resolver: Option<&dyn PrefixResolver>,
) -> Result<FrameView<'a>> {
    let header = FrameHeader::parse(frame)?;
    let (prefix, cursor) = match resolver {
        Some(resolver) => {
            let (token, cursor) = resolver.resolve(frame, HEADER_SIZE)?;
            (Some(token), cursor)
        }
        None => (None, HEADER_SIZE),
    };

    Ok(FrameView {
        header,
        prefix,
        body: &frame[cursor..],
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::prefix::U32Prefix;

    fn frame(flags: u32, id: u16, rest: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((MIN_DECLARED_LENGTH + rest.len()) as u16).to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(rest);
        out
    }

    #[test]
    fn test_parse_header_fields() {
        let bytes = frame(0x2, 0x1234, &[9, 9, 9]);
        let header = FrameHeader::parse(&bytes).unwrap();
        assert_eq!(header.length, 9);
        assert!(header.flags.is_broadcast());
        assert_eq!(header.packet_id, PacketId(0x1234));
        assert_eq!(header.frame_len(), bytes.len());
    }

    #[test]
    fn test_short_frame_is_invalid() {
        // declares 10 bytes but only 5 follow the length field
        let bytes = [10u8, 0, 0, 0, 0, 0, 1];
        match FrameHeader::parse(&bytes) {
            Err(ProtocolError::InvalidFrame {
                declared: 10,
                available: 5,
            }) => {}
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_declared_length_below_header() {
        let bytes = [2u8, 0, 0, 0];
        assert!(matches!(
            FrameHeader::parse(&bytes),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_parse_frame_with_prefix() {
        let bytes = frame(0, 1, &[7, 0, 0, 0, 0xEE]);
        let view = parse_frame(&bytes, Some(&U32Prefix)).unwrap();
        assert_eq!(view.prefix, Some(SessionId(7)));
        assert_eq!(view.body, &[0xEE]);

        let plain = parse_frame(&bytes, None).unwrap();
        assert_eq!(plain.prefix, None);
        assert_eq!(plain.body.len(), 5);
    }

    #[test]
    fn test_prefix_longer_than_frame() {
        let bytes = frame(0, 1, &[7, 0]);
        assert!(parse_frame(&bytes, Some(&U32Prefix)).is_err());
    }

    #[test]
    fn test_header_write_matches_parse() {
        let header = FrameHeader {
            length: 6,
            flags: PacketFlags::REDIRECT,
            packet_id: PacketId(42),
        };
        let mut out = BytesMut::new();
        header.write(&mut out);
        assert_eq!(FrameHeader::parse(&out).unwrap(), header);
    }
}
