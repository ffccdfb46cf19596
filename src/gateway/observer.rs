//! Gateway notifications.
//!
//! The gateway reports through [`GatewayObserver`] instead of callbacks on
//! its internals. `balancer_bound` fires after a client session is fully set
//! up and before its first frame is read.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::balancer::LoadBalancer;
use crate::core::prefix::SessionId;
use crate::error::ProtocolError;
use crate::transport::session::SessionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Backend,
}

pub trait GatewayObserver: Send + Sync {
    /// `balancer` now governs `session`
    fn balancer_bound(&self, _session: &SessionHandle, _balancer: &Arc<LoadBalancer>) {}

    /// A frame from `source` was not delivered (to one target, for broadcasts)
    fn frame_dropped(&self, _source: SessionId, _frame: &Bytes, _error: &ProtocolError) {}

    fn session_closed(&self, _session: SessionId, _role: SessionRole) {}
}

/// Logs every notification through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl GatewayObserver for TracingObserver {
    fn balancer_bound(&self, session: &SessionHandle, balancer: &Arc<LoadBalancer>) {
        info!(
            session = %session.id(),
            peer = ?session.peer(),
            backends = balancer.len(),
            "Load balancer bound to client session"
        );
    }

    fn frame_dropped(&self, source: SessionId, frame: &Bytes, error: &ProtocolError) {
        warn!(session = %source, bytes = frame.len(), error = %error, "Frame dropped");
    }

    fn session_closed(&self, session: SessionId, role: SessionRole) {
        debug!(session = %session, ?role, "Session closed");
    }
}

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    BalancerBound {
        session: SessionId,
        balancer: Arc<LoadBalancer>,
    },
    FrameDropped {
        source: SessionId,
        frame: Bytes,
        error: String,
    },
    SessionClosed {
        session: SessionId,
        role: SessionRole,
    },
}

/// Publishes notifications to a channel, for hosts that consume them as a stream
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl GatewayObserver for ChannelObserver {
    fn balancer_bound(&self, session: &SessionHandle, balancer: &Arc<LoadBalancer>) {
        let _ = self.events.send(GatewayEvent::BalancerBound {
            session: session.id(),
            balancer: Arc::clone(balancer),
        });
    }

    fn frame_dropped(&self, source: SessionId, frame: &Bytes, error: &ProtocolError) {
        let _ = self.events.send(GatewayEvent::FrameDropped {
            source,
            frame: frame.clone(),
            error: error.to_string(),
        });
    }

    fn session_closed(&self, session: SessionId, role: SessionRole) {
        let _ = self
            .events
            .send(GatewayEvent::SessionClosed { session, role });
    }
}
