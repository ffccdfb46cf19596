//! Stream wrappers applied to raw connections before framing.
//!
//! The gateway only knows [`StreamWrapper`]; plain TCP uses the identity
//! [`PlainStream`], TLS uses [`TlsStreamWrapper`](super::tls::TlsStreamWrapper).

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Any bidirectional byte stream a session can run on
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

#[async_trait]
pub trait StreamWrapper: Send + Sync {
    fn name(&self) -> &'static str;

    /// Secure (or otherwise transform) a freshly accepted stream
    async fn wrap(&self, stream: BoxedStream) -> Result<BoxedStream>;
}

/// Identity wrapper: no security
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainStream;

#[async_trait]
impl StreamWrapper for PlainStream {
    fn name(&self) -> &'static str {
        "plain"
    }

    async fn wrap(&self, stream: BoxedStream) -> Result<BoxedStream> {
        Ok(stream)
    }
}
