//! Byte-transparent frame relay.
//!
//! Only the header and routing prefix of a frame are parsed. The original
//! bytes are forwarded unchanged, so bodies are never deserialized here.
//!
//! ## Client to backend
//! - `BROADCAST`: every backend in the client's balancer
//! - `REDIRECT` with a prefix naming a backend in the pool: that backend
//! - otherwise: the next backend in round-robin order
//!
//! ## Backend to client
//! - `BROADCAST`: every connected client
//! - otherwise: the client whose session id is the frame's prefix
//!
//! Sends never wait: a full or closed target queue fails that delivery only.
//! A backend whose session has closed is removed from the balancer and the
//! frame goes to the next one in rotation.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::balancer::LoadBalancer;
use crate::core::packet::{parse_frame, FrameView};
use crate::core::prefix::{PrefixResolver, SessionId};
use crate::error::{constants, ProtocolError, Result};
use crate::gateway::observer::{GatewayObserver, SessionRole};
use crate::transport::session::SessionHandle;
use crate::utils::metrics::Metrics;

pub struct Relay {
    prefix: Option<Arc<dyn PrefixResolver>>,
    clients: RwLock<HashMap<SessionId, SessionHandle>>,
    metrics: Arc<Metrics>,
    observer: Arc<dyn GatewayObserver>,
}

impl Relay {
    pub fn new(
        prefix: Option<Arc<dyn PrefixResolver>>,
        metrics: Arc<Metrics>,
        observer: Arc<dyn GatewayObserver>,
    ) -> Self {
        Self {
            prefix,
            clients: RwLock::new(HashMap::new()),
            metrics,
            observer,
        }
    }

    pub fn add_client(&self, client: SessionHandle) {
        self.clients.write().insert(client.id(), client);
    }

    pub fn remove_client(&self, id: SessionId) -> bool {
        self.clients.write().remove(&id).is_some()
    }

    pub fn client(&self, id: SessionId) -> Option<SessionHandle> {
        self.clients.read().get(&id).cloned()
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn clear_clients(&self) {
        self.clients.write().clear();
    }

    pub fn prefix_resolver(&self) -> Option<&Arc<dyn PrefixResolver>> {
        self.prefix.as_ref()
    }

    pub fn observer(&self) -> &Arc<dyn GatewayObserver> {
        &self.observer
    }

    /// Forward a frame from a client session. Returns the number of deliveries.
    pub fn relay_from_client(
        &self,
        source: SessionId,
        balancer: &LoadBalancer,
        frame: Bytes,
    ) -> Result<usize> {
        self.metrics.frame_received(frame.len());
        let result = self.route_from_client(source, balancer, &frame);
        self.finish(source, &frame, result)
    }

    /// Forward a frame from a backend session. Returns the number of deliveries.
    pub fn relay_from_backend(&self, source: SessionId, frame: Bytes) -> Result<usize> {
        self.metrics.frame_received(frame.len());
        let result = self.route_from_backend(source, &frame);
        self.finish(source, &frame, result)
    }

    fn route_from_client(
        &self,
        source: SessionId,
        balancer: &LoadBalancer,
        frame: &Bytes,
    ) -> Result<usize> {
        let view = self.parse(frame)?;

        if view.header.flags.is_broadcast() {
            let targets = balancer.get_all();
            if targets.is_empty() {
                return Err(ProtocolError::NoSessionsAvailable);
            }
            let delivered = self.fan_out(source, frame, targets.iter());
            for closed in targets.iter().filter(|target| target.is_closed()) {
                self.prune_backend(balancer, closed.id());
            }
            return Ok(delivered);
        }

        let mut redirect_target = view
            .prefix
            .filter(|_| view.header.flags.is_redirect())
            .and_then(|token| balancer.find(token));

        // Each closed backend found here leaves the pool, so this ends
        loop {
            let target = match redirect_target.take() {
                Some(target) => target,
                None => balancer.get()?,
            };

            trace!(
                source = %source,
                target = %target.id(),
                packet_id = %view.header.packet_id,
                "Relaying client frame"
            );
            match target.try_forward(frame.clone()) {
                Ok(()) => return Ok(1),
                Err(ProtocolError::ConnectionClosed) => self.prune_backend(balancer, target.id()),
                Err(e) => return Err(e),
            }
        }
    }

    fn prune_backend(&self, balancer: &LoadBalancer, id: SessionId) {
        if balancer.remove(id) {
            debug!(session = %id, "Removed closed backend from balancer");
            self.observer.session_closed(id, SessionRole::Backend);
        }
    }

    fn route_from_backend(&self, source: SessionId, frame: &Bytes) -> Result<usize> {
        let view = self.parse(frame)?;

        if view.header.flags.is_broadcast() {
            let targets: Vec<SessionHandle> = self.clients.read().values().cloned().collect();
            if targets.is_empty() {
                return Err(ProtocolError::NoSessionsAvailable);
            }
            return Ok(self.fan_out(source, frame, targets.iter()));
        }

        let token = view.prefix.ok_or_else(|| {
            ProtocolError::ConfigError(constants::ERR_PREFIX_NOT_CONFIGURED.into())
        })?;
        let target = self
            .client(token)
            .ok_or_else(|| ProtocolError::UnknownSession(token.to_string()))?;

        trace!(
            source = %source,
            target = %token,
            packet_id = %view.header.packet_id,
            "Relaying backend frame"
        );
        target.try_forward(frame.clone())?;
        Ok(1)
    }

    fn parse<'a>(&self, frame: &'a [u8]) -> Result<FrameView<'a>> {
        parse_frame(frame, self.prefix.as_deref()).map_err(|e| {
            self.metrics.decode_error();
            e
        })
    }

    /// Deliver to each target independently; failures are reported per target
    fn fan_out<'a>(
        &self,
        source: SessionId,
        frame: &Bytes,
        targets: impl Iterator<Item = &'a SessionHandle>,
    ) -> usize {
        let mut delivered = 0;
        for target in targets {
            match target.try_forward(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    self.metrics.frame_dropped();
                    self.observer.frame_dropped(source, frame, &e);
                }
            }
        }
        delivered
    }

    fn finish(&self, source: SessionId, frame: &Bytes, result: Result<usize>) -> Result<usize> {
        match result {
            Ok(delivered) => {
                self.metrics.frames_relayed(delivered);
                Ok(delivered)
            }
            Err(e) => {
                self.metrics.frame_dropped();
                self.observer.frame_dropped(source, frame, &e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::core::flags::PacketFlags;
    use crate::core::prefix::U32Prefix;
    use crate::gateway::observer::{ChannelObserver, GatewayEvent, TracingObserver};
    use tokio::sync::mpsc;

    fn frame(flags: PacketFlags, token: Option<u32>, body: &[u8]) -> Bytes {
        let mut out = Vec::new();
        let prefix_len = if token.is_some() { 4 } else { 0 };
        out.extend_from_slice(&((6 + prefix_len + body.len()) as u16).to_le_bytes());
        out.extend_from_slice(&flags.bits().to_le_bytes());
        out.extend_from_slice(&0x0102u16.to_le_bytes());
        if let Some(token) = token {
            out.extend_from_slice(&token.to_le_bytes());
        }
        out.extend_from_slice(body);
        Bytes::from(out)
    }

    fn backend(balancer: &LoadBalancer, id: u128) -> mpsc::Receiver<Bytes> {
        let (handle, rx) = SessionHandle::channel(SessionId(id), 4);
        balancer.add(handle);
        rx
    }

    fn relay(prefix: bool) -> Relay {
        let resolver: Option<Arc<dyn PrefixResolver>> = if prefix {
            Some(Arc::new(U32Prefix))
        } else {
            None
        };
        Relay::new(resolver, Arc::new(Metrics::new()), Arc::new(TracingObserver))
    }

    #[test]
    fn test_unicast_is_round_robin_and_transparent() {
        let relay = relay(false);
        let balancer = LoadBalancer::new();
        let mut a = backend(&balancer, 1);
        let mut b = backend(&balancer, 2);

        let first = frame(PacketFlags::empty(), None, b"one");
        let second = frame(PacketFlags::empty(), None, b"two");
        assert_eq!(relay.relay_from_client(SessionId(9), &balancer, first.clone()).unwrap(), 1);
        assert_eq!(relay.relay_from_client(SessionId(9), &balancer, second.clone()).unwrap(), 1);

        assert_eq!(a.try_recv().unwrap(), first);
        assert_eq!(b.try_recv().unwrap(), second);
    }

    #[test]
    fn test_broadcast_reaches_every_backend() {
        let relay = relay(false);
        let balancer = LoadBalancer::new();
        let mut receivers: Vec<_> = (1..=3).map(|n| backend(&balancer, n)).collect();

        let bytes = frame(PacketFlags::BROADCAST, None, b"all");
        assert_eq!(relay.relay_from_client(SessionId(9), &balancer, bytes.clone()).unwrap(), 3);
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), bytes);
        }
    }

    #[test]
    fn test_redirect_targets_named_backend() {
        let relay = relay(true);
        let balancer = LoadBalancer::new();
        let mut a = backend(&balancer, 1);
        let mut b = backend(&balancer, 2);

        let bytes = frame(PacketFlags::REDIRECT, Some(2), b"to-b");
        relay.relay_from_client(SessionId(9), &balancer, bytes.clone()).unwrap();
        relay.relay_from_client(SessionId(9), &balancer, bytes.clone()).unwrap();
        assert_eq!(b.try_recv().unwrap(), bytes);
        assert_eq!(b.try_recv().unwrap(), bytes);
        assert!(a.try_recv().is_err());

        // Unknown redirect target falls back to the balancer
        let stray = frame(PacketFlags::REDIRECT, Some(77), b"x");
        relay.relay_from_client(SessionId(9), &balancer, stray.clone()).unwrap();
        assert_eq!(a.try_recv().unwrap(), stray);
    }

    #[test]
    fn test_no_backends_is_reported() {
        let (observer, mut events) = ChannelObserver::channel();
        let metrics = Arc::new(Metrics::new());
        let relay = Relay::new(None, Arc::clone(&metrics), Arc::new(observer));
        let balancer = LoadBalancer::new();

        let bytes = frame(PacketFlags::empty(), None, b"lost");
        assert!(matches!(
            relay.relay_from_client(SessionId(9), &balancer, bytes.clone()),
            Err(ProtocolError::NoSessionsAvailable)
        ));
        match events.try_recv().unwrap() {
            GatewayEvent::FrameDropped { source, frame, .. } => {
                assert_eq!(source, SessionId(9));
                assert_eq!(frame, bytes);
            }
            other => panic!("Unexpected event: {other:?}"),
        }
        assert_eq!(metrics.snapshot().frames_dropped, 1);
    }

    #[test]
    fn test_full_target_does_not_block_others() {
        let relay = relay(false);
        let balancer = LoadBalancer::new();
        let (slow, _slow_rx) = SessionHandle::channel(SessionId(1), 1);
        slow.try_forward(frame(PacketFlags::empty(), None, b"fill")).unwrap();
        balancer.add(slow);
        let mut fast = backend(&balancer, 2);

        let bytes = frame(PacketFlags::BROADCAST, None, b"fan");
        assert_eq!(relay.relay_from_client(SessionId(9), &balancer, bytes.clone()).unwrap(), 1);
        assert_eq!(fast.try_recv().unwrap(), bytes);
    }

    #[test]
    fn test_backend_frame_routed_by_prefix() {
        let relay = relay(true);
        let (client, mut client_rx) = SessionHandle::channel(SessionId(5), 4);
        relay.add_client(client);

        let bytes = frame(PacketFlags::SERVER_TO_CLIENT, Some(5), b"reply");
        assert_eq!(relay.relay_from_backend(SessionId(1), bytes.clone()).unwrap(), 1);
        assert_eq!(client_rx.try_recv().unwrap(), bytes);

        let stray = frame(PacketFlags::SERVER_TO_CLIENT, Some(6), b"reply");
        assert!(matches!(
            relay.relay_from_backend(SessionId(1), stray),
            Err(ProtocolError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_closed_backend_leaves_rotation() {
        let (observer, mut events) = ChannelObserver::channel();
        let relay = Relay::new(None, Arc::new(Metrics::new()), Arc::new(observer));
        let balancer = LoadBalancer::new();
        let gone = backend(&balancer, 1);
        let mut live = backend(&balancer, 2);
        drop(gone);

        for body in [&b"one"[..], b"two", b"three"] {
            let bytes = frame(PacketFlags::empty(), None, body);
            assert_eq!(relay.relay_from_client(SessionId(9), &balancer, bytes.clone()).unwrap(), 1);
            assert_eq!(live.try_recv().unwrap(), bytes);
        }
        assert_eq!(balancer.len(), 1);
        assert!(!balancer.contains(SessionId(1)));
        match events.try_recv().unwrap() {
            GatewayEvent::SessionClosed { session, role } => {
                assert_eq!(session, SessionId(1));
                assert_eq!(role, SessionRole::Backend);
            }
            other => panic!("Unexpected event: {other:?}"),
        }

        drop(live);
        assert!(matches!(
            relay.relay_from_client(SessionId(9), &balancer, frame(PacketFlags::empty(), None, b"x")),
            Err(ProtocolError::NoSessionsAvailable)
        ));
        assert!(balancer.is_empty());
    }

    #[test]
    fn test_broadcast_prunes_closed_backends() {
        let relay = relay(false);
        let balancer = LoadBalancer::new();
        drop(backend(&balancer, 1));
        let mut live = backend(&balancer, 2);

        let bytes = frame(PacketFlags::BROADCAST, None, b"all");
        assert_eq!(relay.relay_from_client(SessionId(9), &balancer, bytes.clone()).unwrap(), 1);
        assert_eq!(live.try_recv().unwrap(), bytes);
        assert_eq!(balancer.len(), 1);
    }

    #[test]
    fn test_malformed_frame_counts_decode_error() {
        let metrics = Arc::new(Metrics::new());
        let relay = Relay::new(
            Some(Arc::new(U32Prefix)),
            Arc::clone(&metrics),
            Arc::new(TracingObserver),
        );
        let balancer = LoadBalancer::new();
        let _rx = backend(&balancer, 1);

        // Declares a prefix-sized payload that is too short for the resolver
        let short = frame(PacketFlags::empty(), None, b"ab");
        assert!(relay.relay_from_client(SessionId(9), &balancer, short).is_err());
        assert_eq!(metrics.snapshot().decode_errors, 1);
    }
}
