//! Property-based tests using proptest
//!
//! These tests validate framing and id derivation invariants across a wide
//! range of randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use bytes::BytesMut;
use packet_gateway::core::packet::{parse_frame, FrameHeader, HEADER_SIZE, LENGTH_FIELD_SIZE};
use packet_gateway::core::packet_id::PACKET_ID_PRIME;
use packet_gateway::core::prefix::{PrefixResolver, U32Prefix, U64Prefix, UuidPrefix};
use packet_gateway::core::serialization::{BodyFormat, FormatBody};
use packet_gateway::{FrameCodec, PacketCodec, PacketFlags, PacketId, PacketMessage, SessionId};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::codec::Decoder;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    id: u64,
    name: String,
    values: Vec<i32>,
    flag: bool,
}

impl PacketMessage for Record {
    const TYPE_NAME: &'static str = "props.Record";
}

fn record() -> impl Strategy<Value = Record> {
    (
        any::<u64>(),
        "[a-zA-Z0-9 ]{0,64}",
        prop::collection::vec(any::<i32>(), 0..128),
        any::<bool>(),
    )
        .prop_map(|(id, name, values, flag)| Record {
            id,
            name,
            values,
            flag,
        })
}

fn format() -> impl Strategy<Value = BodyFormat> {
    prop_oneof![
        Just(BodyFormat::Bincode),
        Just(BodyFormat::MessagePack),
        Just(BodyFormat::Json),
    ]
}

fn flags() -> impl Strategy<Value = PacketFlags> {
    (0u32..8).prop_map(PacketFlags::from_wire)
}

// Property: a message decodes to itself under every body format
proptest! {
    #[test]
    fn prop_message_roundtrip(message in record(), format in format(), flags in flags()) {
        let codec = PacketCodec::new(FormatBody::new(format));
        codec.register::<Record>().unwrap();

        let frame = codec.encode(&message, flags).expect("Encoding should not fail");
        let packet = codec.decode::<Record>(&frame).expect("Decoding should not fail");

        prop_assert_eq!(packet.message, message);
        prop_assert_eq!(packet.header.flags, flags);
    }
}

// Property: the length field always counts every byte after itself
proptest! {
    #[test]
    fn prop_length_field_matches_frame(message in record(), format in format()) {
        let codec = PacketCodec::new(FormatBody::new(format));
        codec.register::<Record>().unwrap();
        let frame = codec.encode(&message, PacketFlags::empty()).unwrap();

        let declared = usize::from(u16::from_le_bytes([frame[0], frame[1]]));
        prop_assert_eq!(declared, frame.len() - LENGTH_FIELD_SIZE);
        prop_assert_eq!(FrameHeader::parse(&frame).unwrap().frame_len(), frame.len());
    }
}

// Property: packet ids depend on the name only and stay below the modulus
proptest! {
    #[test]
    fn prop_packet_id_deterministic(name in "[a-z]{1,12}(\\.[A-Za-z]{1,12}){0,3}") {
        let first = PacketId::from_type_name(&name);
        let second = PacketId::from_type_name(&name);
        prop_assert_eq!(first, second);
        prop_assert!(u64::from(first.get()) < PACKET_ID_PRIME);
    }
}

// Property: every resolver reads back the token it wrote, then the body
proptest! {
    #[test]
    fn prop_prefix_roundtrip(token in any::<u32>(), which in 0usize..3, body in prop::collection::vec(any::<u8>(), 0..64)) {
        let resolvers: [Arc<dyn PrefixResolver>; 3] =
            [Arc::new(U32Prefix), Arc::new(U64Prefix), Arc::new(UuidPrefix)];
        let resolver = &resolvers[which];

        let mut frame = BytesMut::new();
        let declared = HEADER_SIZE - LENGTH_FIELD_SIZE + resolver.width() + body.len();
        frame.extend_from_slice(&(declared as u16).to_le_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0, 1, 0]);
        resolver.write(SessionId::from(token), &mut frame).unwrap();
        frame.extend_from_slice(&body);

        let view = parse_frame(&frame, Some(resolver.as_ref())).unwrap();
        prop_assert_eq!(view.prefix, Some(SessionId::from(token)));
        prop_assert_eq!(view.body, &body[..]);
    }
}

// Property: the stream decoder never panics and never yields a frame whose
// length disagrees with its header
proptest! {
    #[test]
    fn prop_stream_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::from(&data[..]);
        while let Ok(Some(frame)) = codec.decode(&mut buffer) {
            let declared = usize::from(u16::from_le_bytes([frame[0], frame[1]]));
            prop_assert_eq!(frame.len(), declared + LENGTH_FIELD_SIZE);
        }
    }
}

// Property: arbitrary bytes handed to decode_any fail cleanly
proptest! {
    #[test]
    fn prop_decode_any_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let codec = PacketCodec::default();
        codec.register::<Record>().unwrap();
        let _ = codec.decode_any(&data);
    }
}
