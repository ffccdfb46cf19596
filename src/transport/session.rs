//! Sessions: one per connection.
//!
//! A session is split in two. Outbound frames go through a bounded queue
//! drained by a dedicated writer task, so a slow peer never blocks the task
//! that produced the frame. Inbound frames are read with [`FrameCodec`] by
//! whoever owns the [`SessionReader`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::core::codec::FrameCodec;
use crate::core::prefix::SessionId;
use crate::error::{constants, ProtocolError, Result};

/// Frames buffered per session when no capacity is configured
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Inbound half of a session
pub type SessionReader<S> = FramedRead<ReadHalf<S>, FrameCodec>;

/// Cloneable handle used to send frames to a session. Equality is by id.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Bytes>,
}

impl SessionHandle {
    /// In-memory session: the receiver sees every frame sent to the handle
    pub fn channel(id: SessionId, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id,
                peer: None,
                outbound,
            },
            rx,
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queue a frame, waiting for room if the queue is full
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Queue a frame without waiting. A full queue is reported as backpressure.
    pub fn try_forward(&self, frame: Bytes) -> Result<()> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ProtocolError::Backpressure(constants::ERR_QUEUE_FULL)
            }
            mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

impl Hash for SessionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Split `stream` into a session handle and a framed reader.
///
/// The writer task ends when every handle is dropped or the stream fails;
/// it flushes queued frames before closing the write half.
pub fn spawn_session<S>(
    stream: S,
    id: SessionId,
    peer: Option<SocketAddr>,
    capacity: usize,
) -> (SessionHandle, SessionReader<S>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (mut handle, mut rx) = SessionHandle::channel(id, capacity);
    handle.peer = peer;

    tokio::spawn(async move {
        let mut sink = FramedWrite::new(write_half, FrameCodec);
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(frame).await {
                warn!(session = %id, error = %e, "Session write failed");
                return;
            }
        }
        let _ = sink.close().await;
        debug!(session = %id, "Session writer finished");
    });

    (handle, FramedRead::new(read_half, FrameCodec))
}
