//! # Transport Layer
//!
//! Sessions over any async byte stream, plus the stream wrappers applied
//! before a connection is handed to the codec layer.
//!
//! ## Components
//! - **Session**: bounded outbound queue with a writer task, framed reader
//! - **Secure**: `StreamWrapper` trait and the identity wrapper
//! - **TLS**: rustls server configuration and the TLS wrapper

pub mod secure;
pub mod session;
pub mod tls;

pub use secure::{AsyncStream, BoxedStream, PlainStream, StreamWrapper};
pub use session::{spawn_session, SessionHandle, SessionReader};
pub use tls::{TlsServerConfig, TlsStreamWrapper};
