use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::core::flags::PacketFlags;
use crate::core::packet_codec::{DecodedPacket, PacketCodec};
use crate::core::packet_id::{PacketId, PacketMessage};
use crate::core::prefix::SessionId;
use crate::core::serialization::{BodyCodec, FormatBody};
use crate::error::{ProtocolError, Result};
use crate::transport::session::{SessionHandle, SessionReader};

type HandlerFn = dyn Fn(DecodedPacket) -> Result<Option<Bytes>> + Send + Sync + 'static;

/// Routes decoded frames to typed handlers by packet id.
///
/// A handler's return value is encoded as the reply frame with the
/// server-to-client flag set. When the codec carries a routing prefix the
/// request's token is echoed back so the reply finds its way through a gateway.
pub struct Dispatcher<B: BodyCodec = FormatBody> {
    codec: Arc<PacketCodec<B>>,
    handlers: RwLock<HashMap<PacketId, Box<HandlerFn>>>,
}

impl<B: BodyCodec + 'static> Dispatcher<B> {
    pub fn new(codec: Arc<PacketCodec<B>>) -> Self {
        Self {
            codec,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn codec(&self) -> &Arc<PacketCodec<B>> {
        &self.codec
    }

    /// Handle requests of type `T`, replying with an `R`.
    ///
    /// Both types are registered with the codec if they are not already.
    /// Registering a second handler for `T` replaces the first.
    pub fn register<T, R, F>(&self, handler: F) -> Result<PacketId>
    where
        T: PacketMessage,
        R: PacketMessage,
        F: Fn(T) -> Result<R> + Send + Sync + 'static,
    {
        let request_id = self.ensure_registered::<T>()?;
        self.ensure_registered::<R>()?;

        let codec = Arc::clone(&self.codec);
        let handler = move |packet: DecodedPacket| -> Result<Option<Bytes>> {
            let packet = packet.downcast::<T>().map_err(|other| {
                ProtocolError::DeserializeError(format!(
                    "handler for {} received {}",
                    T::TYPE_NAME,
                    other.type_name
                ))
            })?;
            let reply = handler(packet.message)?;
            let flags = PacketFlags::SERVER_TO_CLIENT;
            let frame = match codec.prefix_resolver() {
                Some(_) => codec.encode_routed(
                    &reply,
                    flags,
                    packet.prefix.unwrap_or(SessionId::NIL),
                )?,
                None => codec.encode(&reply, flags)?,
            };
            Ok(Some(frame))
        };

        if self
            .handlers
            .write()
            .insert(request_id, Box::new(handler))
            .is_some()
        {
            debug!(name = T::TYPE_NAME, "Replaced packet handler");
        }
        Ok(request_id)
    }

    /// The mapper may be shared with other codecs, so a known type can
    /// still lack a decoder on this one
    fn ensure_registered<T: PacketMessage>(&self) -> Result<PacketId> {
        match self.codec.mapper().get_id::<T>() {
            Ok(id) if self.codec.has_decoder(id) => Ok(id),
            _ => match self.codec.register::<T>() {
                Err(ProtocolError::DuplicateRegistration(_)) => self.codec.mapper().get_id::<T>(),
                other => other,
            },
        }
    }

    pub fn has_handler(&self, id: PacketId) -> bool {
        self.handlers.read().contains_key(&id)
    }

    /// Decode one frame and run its handler, returning the encoded reply
    pub fn dispatch(&self, frame: &[u8]) -> Result<Option<Bytes>> {
        let packet = self.codec.decode_any(frame)?;
        let packet_id = packet.header.packet_id;

        let handlers = self.handlers.read();
        let handler = handlers
            .get(&packet_id)
            .ok_or(ProtocolError::UnhandledPacket(packet_id.0))?;
        handler(packet)
    }

    /// Serve requests read from `reader`, writing replies to `handle`.
    ///
    /// A frame that fails to decode or has no handler is logged and skipped.
    /// Any other failure (stream error, handler error, peer gone) ends the
    /// session and is returned.
    pub async fn serve_session<S>(
        &self,
        mut reader: SessionReader<S>,
        handle: SessionHandle,
    ) -> Result<()>
    where
        S: AsyncRead,
    {
        while let Some(frame) = reader.next().await {
            let frame = frame?;
            match self.dispatch(&frame) {
                Ok(Some(reply)) => handle.send(reply).await?,
                Ok(None) => {}
                Err(e) if e.is_frame_error() => {
                    warn!(session = %handle.id(), error = %e, "Dropping request");
                }
                Err(e) => {
                    warn!(session = %handle.id(), error = %e, "Closing session after failed request");
                    return Err(e);
                }
            }
        }
        debug!(session = %handle.id(), "Request stream ended");
        Ok(())
    }
}
