//! Body format and serializer override integration tests

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::any::Any;
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use packet_gateway::core::custom::{CustomCodecProvider, CustomSerializer, UuidSerializer};
use packet_gateway::core::packet::HEADER_SIZE;
use packet_gateway::core::serialization::{BodyFormat, FormatBody};
use packet_gateway::{PacketCodec, PacketFlags, PacketId, PacketMessage, ProtocolError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatMessage {
    room: u32,
    author: String,
    text: String,
    tags: Vec<String>,
}

impl PacketMessage for ChatMessage {
    const TYPE_NAME: &'static str = "demo.chat.ChatMessage";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PlayerJoined {
    #[serde(skip)]
    player: Uuid,
    #[serde(skip)]
    session: Uuid,
    name: String,
}

impl PacketMessage for PlayerJoined {
    const TYPE_NAME: &'static str = "demo.game.PlayerJoined";
    const CUSTOM_FIELDS: &'static [&'static str] = &["player", "session"];

    fn custom_field(&self, field: &str) -> Option<&(dyn Any + Send + Sync)> {
        match field {
            "player" => Some(&self.player),
            "session" => Some(&self.session),
            _ => None,
        }
    }

    fn set_custom_field(&mut self, field: &str, value: Box<dyn Any + Send>) -> bool {
        let Ok(value) = value.downcast::<Uuid>() else {
            return false;
        };
        match field {
            "player" => self.player = *value,
            "session" => self.session = *value,
            _ => return false,
        }
        true
    }
}

/// Heartbeat with a hand-rolled 4-byte body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Heartbeat {
    sequence: u32,
}

impl PacketMessage for Heartbeat {
    const TYPE_NAME: &'static str = "demo.Heartbeat";
}

struct HeartbeatSerializer;

impl CustomSerializer for HeartbeatSerializer {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn encode(&self, value: &dyn Any, sink: &mut BytesMut) -> packet_gateway::Result<()> {
        let heartbeat = value
            .downcast_ref::<Heartbeat>()
            .ok_or_else(|| ProtocolError::SerializeError("expected Heartbeat".into()))?;
        sink.put_u32(heartbeat.sequence);
        Ok(())
    }

    fn decode(&self, source: &mut &[u8]) -> packet_gateway::Result<Box<dyn Any + Send>> {
        if source.remaining() < 4 {
            return Err(ProtocolError::DeserializeError("short heartbeat".into()));
        }
        Ok(Box::new(Heartbeat {
            sequence: source.get_u32(),
        }))
    }
}

fn chat() -> ChatMessage {
    ChatMessage {
        room: 7,
        author: "ada".into(),
        text: "hello, gateway".into(),
        tags: vec!["greeting".into(), "test".into()],
    }
}

fn joined() -> PlayerJoined {
    PlayerJoined {
        player: Uuid::new_v4(),
        session: Uuid::new_v4(),
        name: "grace".into(),
    }
}

fn overrides() -> CustomCodecProvider {
    let mut overrides = CustomCodecProvider::new();
    overrides
        .register_field(PlayerJoined::TYPE_NAME, "player", Arc::new(UuidSerializer))
        .register_field(PlayerJoined::TYPE_NAME, "session", Arc::new(UuidSerializer))
        .register_type(Heartbeat::TYPE_NAME, Arc::new(HeartbeatSerializer));
    overrides
}

#[test]
fn test_every_format_roundtrips_chat() {
    for format in [BodyFormat::Bincode, BodyFormat::MessagePack, BodyFormat::Json] {
        let codec = PacketCodec::new(FormatBody::new(format));
        codec.register::<ChatMessage>().unwrap();

        let frame = codec.encode(&chat(), PacketFlags::empty()).unwrap();
        let packet = codec
            .decode::<ChatMessage>(&frame)
            .unwrap_or_else(|e| panic!("{} failed: {e}", format.name()));
        assert_eq!(packet.message, chat());
    }
}

#[test]
fn test_json_body_is_readable() {
    let codec = PacketCodec::new(FormatBody::new(BodyFormat::Json));
    codec.register::<ChatMessage>().unwrap();
    let frame = codec.encode(&chat(), PacketFlags::empty()).unwrap();
    let body = std::str::from_utf8(&frame[HEADER_SIZE..]).unwrap();
    assert!(body.contains("\"author\":\"ada\""));
}

#[test]
fn test_formats_disagree_on_bytes_not_ids() {
    let bincode = PacketCodec::new(FormatBody::new(BodyFormat::Bincode));
    let json = PacketCodec::new(FormatBody::new(BodyFormat::Json));
    let a = bincode.register::<ChatMessage>().unwrap();
    let b = json.register::<ChatMessage>().unwrap();
    assert_eq!(a, b);
    assert_eq!(a, PacketId::from_type_name("demo.chat.ChatMessage"));

    let frame = bincode.encode(&chat(), PacketFlags::empty()).unwrap();
    assert!(json.decode::<ChatMessage>(&frame).is_err());
}

#[test]
fn test_field_overrides_write_in_declared_order() {
    let codec = PacketCodec::new(FormatBody::new(BodyFormat::MessagePack)).with_overrides(overrides());
    codec.register::<PlayerJoined>().unwrap();
    let message = joined();

    let frame = codec.encode(&message, PacketFlags::empty()).unwrap();
    let body = &frame[HEADER_SIZE..];
    assert_eq!(&body[..16], &message.player.as_u128().to_le_bytes());
    assert_eq!(&body[16..32], &message.session.as_u128().to_le_bytes());

    let decoded = codec.decode::<PlayerJoined>(&frame).unwrap().message;
    assert_eq!(decoded, message);
}

#[test]
fn test_whole_type_override_replaces_body_codec() {
    let codec = PacketCodec::default().with_overrides(overrides());
    codec.register::<Heartbeat>().unwrap();

    let frame = codec
        .encode(&Heartbeat { sequence: 0x0102_0304 }, PacketFlags::empty())
        .unwrap();
    assert_eq!(frame.len(), HEADER_SIZE + 4);
    assert_eq!(&frame[HEADER_SIZE..], &[1, 2, 3, 4]);

    let packet = codec.decode::<Heartbeat>(&frame).unwrap();
    assert_eq!(packet.message.sequence, 0x0102_0304);
}

#[test]
fn test_missing_field_override_fails_both_ways() {
    let plain = PacketCodec::default();
    plain.register::<PlayerJoined>().unwrap();
    assert!(matches!(
        plain.encode(&joined(), PacketFlags::empty()),
        Err(ProtocolError::MissingFieldCodec { field: "player", .. })
    ));

    let full = PacketCodec::default().with_overrides(overrides());
    full.register::<PlayerJoined>().unwrap();
    let frame = full.encode(&joined(), PacketFlags::empty()).unwrap();
    assert!(matches!(
        plain.decode::<PlayerJoined>(&frame),
        Err(ProtocolError::MissingFieldCodec { .. })
    ));
}

#[test]
fn test_decode_any_across_types() {
    let codec = PacketCodec::default().with_overrides(overrides());
    codec.register::<ChatMessage>().unwrap();
    codec.register::<PlayerJoined>().unwrap();
    codec.register::<Heartbeat>().unwrap();

    let frames = [
        codec.encode(&chat(), PacketFlags::empty()).unwrap(),
        codec.encode(&joined(), PacketFlags::empty()).unwrap(),
        codec.encode(&Heartbeat { sequence: 1 }, PacketFlags::empty()).unwrap(),
    ];
    let names: Vec<&str> = frames
        .iter()
        .map(|frame| codec.decode_any(frame).unwrap().type_name)
        .collect();
    assert_eq!(
        names,
        [ChatMessage::TYPE_NAME, PlayerJoined::TYPE_NAME, Heartbeat::TYPE_NAME]
    );
}

#[test]
fn test_truncated_body_is_deserialize_error() {
    let codec = PacketCodec::default();
    codec.register::<ChatMessage>().unwrap();
    let frame = codec.encode(&chat(), PacketFlags::empty()).unwrap();

    // Rewrite the length so the frame is well formed but the body is cut
    let cut = frame.len() - 3;
    let mut short = BytesMut::from(&frame[..cut]);
    short[..2].copy_from_slice(&((cut - 2) as u16).to_le_bytes());
    assert!(matches!(
        codec.decode::<ChatMessage>(&short),
        Err(ProtocolError::DeserializeError(_))
    ));
}
