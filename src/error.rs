//! # Error Types
//!
//! Error handling for the packet codec, routing and cluster layers.
//!
//! ## Error Categories
//! - **Registration Errors**: duplicate types and packet id collisions. These are
//!   startup-time failures and must abort initialization.
//! - **Decode Errors**: malformed frames, unknown packet ids, unregistered types.
//!   Per-frame and recoverable; the frame is dropped and reported.
//! - **Routing Errors**: no session available for a relay decision.
//! - **Transport Errors**: I/O, TLS, closed sessions, backpressure, timeouts.
//!
//! Handshake rejections are *not* errors: a `NodeLoginResp` with a non-success
//! `ErrorCode` is an ordinary response the caller branches on.
//!
//! ## Example Usage
//! ```rust
//! use packet_gateway::error::{ProtocolError, Result};
//!
//! fn check_frame(declared: usize, available: usize) -> Result<()> {
//!     if declared != available {
//!         return Err(ProtocolError::InvalidFrame { declared, available });
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_frame(10, 7).is_err());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Frame validation errors
    pub const ERR_TRUNCATED_HEADER: &str = "Frame shorter than fixed header";
    pub const ERR_PREFIX_OUT_OF_BOUNDS: &str = "Routing prefix extends past frame end";
    pub const ERR_PREFIX_NOT_CONFIGURED: &str = "No prefix resolver configured";

    /// Connection errors
    pub const ERR_QUEUE_FULL: &str = "Session outbound queue is full";
    pub const ERR_MAX_CONNECTIONS: &str = "Connection limit reached";

    /// Gateway lifecycle errors
    pub const ERR_GATEWAY_STOPPED: &str = "Gateway has been stopped";
    pub const ERR_GATEWAY_STARTING: &str = "Gateway is still starting";

    /// Handshake-specific errors
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
    pub const ERR_COORDINATOR_SIGNATURE: &str = "Coordinator response signature is invalid";
    pub const ERR_MISSING_NODE_ID: &str = "Login response carried no node id";
    pub const ERR_COORDINATOR_KEY_MISMATCH: &str = "Login response signed by an unexpected coordinator";
}

/// Primary error type for all codec, routing and cluster operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Type already registered: {0}")]
    DuplicateRegistration(&'static str),

    #[error("Packet id {id} for {name} already maps to {existing}")]
    IdCollision {
        id: u16,
        name: &'static str,
        existing: &'static str,
    },

    #[error("Type not registered: {0}")]
    UnregisteredType(&'static str),

    #[error("Unknown packet id: {0}")]
    UnknownPacketId(u16),

    #[error("Invalid frame: declared {declared} bytes, {available} available")]
    InvalidFrame { declared: usize, available: usize },

    #[error("Malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("No handler for packet id {0}")]
    UnhandledPacket(u16),

    #[error("Packet id {actual} does not match expected {expected}")]
    TypeMismatch { expected: u16, actual: u16 },

    #[error("No custom serializer for {type_name}.{field}")]
    MissingFieldCodec {
        type_name: &'static str,
        field: &'static str,
    },

    #[error("No sessions available")]
    NoSessionsAvailable,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Backpressure: {0}")]
    Backpressure(&'static str),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// True for per-frame failures that drop one frame but leave the connection usable
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidFrame { .. }
                | ProtocolError::MalformedFrame(_)
                | ProtocolError::UnknownPacketId(_)
                | ProtocolError::UnregisteredType(_)
                | ProtocolError::TypeMismatch { .. }
                | ProtocolError::DeserializeError(_)
                | ProtocolError::UnhandledPacket(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
