//! Tokio codec splitting a byte stream into whole frames.
//!
//! Decoding yields each frame as raw `Bytes` (length field included) so a relay
//! can forward it untouched; encoding writes pre-framed bytes as they are.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::packet::{FrameHeader, LENGTH_FIELD_SIZE, MIN_DECLARED_LENGTH};
use crate::error::{constants, ProtocolError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let declared = usize::from(u16::from_le_bytes([src[0], src[1]]));
        if declared < MIN_DECLARED_LENGTH {
            // The stream can no longer be resynchronized
            return Err(ProtocolError::MalformedFrame(constants::ERR_TRUNCATED_HEADER));
        }

        let total = LENGTH_FIELD_SIZE + declared;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(total).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        FrameHeader::parse(&item)?;
        dst.extend_from_slice(&item);
        Ok(())
    }
}
