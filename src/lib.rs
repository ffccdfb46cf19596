//! # Packet Gateway
//!
//! Binary packet protocol, session routing and gateway relay core.
//!
//! Every message travels in one frame:
//! ```text
//! [Length:u16] [Flags:u32] [PacketId:u16] [Prefix] [Body]
//! ```
//! Packet ids are derived from type names, so peers agree on them without
//! coordination. Bodies are encoded with bincode, MessagePack or JSON, with
//! per-type and per-field serializer overrides. Gateways route frames by
//! header and prefix alone and never decode bodies.
//!
//! ## Modules
//! - [`core`]: packet ids, frame layout, stream framing, body codecs
//! - [`transport`]: sessions, stream wrappers, TLS
//! - [`balancer`]: round-robin backend pools
//! - [`gateway`]: accept loop, relay, balancer policy, observers
//! - [`protocol`]: signed cluster login, service discovery, dispatch
//! - [`config`]: TOML and environment configuration
//! - [`utils`]: crypto, logging, metrics, replay protection, timeouts
//!
//! ## Example
//! ```rust
//! use packet_gateway::{PacketCodec, PacketFlags, PacketMessage};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Chat {
//!     text: String,
//! }
//!
//! impl PacketMessage for Chat {
//!     const TYPE_NAME: &'static str = "demo.Chat";
//! }
//!
//! let codec = PacketCodec::default();
//! codec.register::<Chat>().unwrap();
//! let frame = codec.encode(&Chat { text: "hi".into() }, PacketFlags::empty()).unwrap();
//! assert_eq!(codec.decode::<Chat>(&frame).unwrap().message.text, "hi");
//! ```

pub mod balancer;
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::balancer::LoadBalancer;
pub use crate::config::GatewayConfig;
pub use crate::core::codec::FrameCodec;
pub use crate::core::flags::PacketFlags;
pub use crate::core::packet_codec::{DecodedPacket, Packet, PacketCodec};
pub use crate::core::packet_id::{PacketId, PacketIdMapper, PacketMessage};
pub use crate::core::prefix::{PrefixResolver, SessionId};
pub use crate::error::{ProtocolError, Result};
pub use crate::gateway::{GatewayServer, GatewayState};
pub use crate::transport::session::SessionHandle;
