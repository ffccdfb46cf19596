//! # Gateway Server
//!
//! Accepts client connections, binds each one to a load balancer and relays
//! frames between clients and backend sessions without decoding bodies.
//!
//! ## Lifecycle
//! ```text
//! Uninitialized -> Initializing -> Running -> Stopped
//! ```
//! `start_server` binds the listener and moves to `Running`; starting a running
//! gateway returns the bound address again. `stop_server` is terminal and
//! idempotent. Sessions can also be attached directly (`attach_client`,
//! `attach_backend`, `add_backend`) for hosts that own their own transport.
//!
//! ## Concurrency
//! Every session runs in its own task. The accept loop only hands sockets off,
//! so a slow TLS handshake or a slow peer never stalls other connections.

pub mod observer;
pub mod policy;
pub mod relay;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::balancer::LoadBalancer;
use crate::config::{CodecConfig, GatewayConfig, ServerConfig};
use crate::core::prefix::SessionId;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::secure::{PlainStream, StreamWrapper};
use crate::transport::session::{spawn_session, SessionHandle, SessionReader};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_timeout_error;

pub use observer::{ChannelObserver, GatewayEvent, GatewayObserver, SessionRole, TracingObserver};
pub use policy::{BalancerPolicy, SharedBalancerPolicy};
pub use relay::Relay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Uninitialized,
    Initializing,
    Running,
    Stopped,
}

pub struct GatewayBuilder {
    server: ServerConfig,
    codec: CodecConfig,
    wrapper: Arc<dyn StreamWrapper>,
    policy: Arc<dyn BalancerPolicy>,
    observer: Arc<dyn GatewayObserver>,
    metrics: Arc<Metrics>,
}

impl GatewayBuilder {
    pub fn stream_wrapper(mut self, wrapper: Arc<dyn StreamWrapper>) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn policy(mut self, policy: Arc<dyn BalancerPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn GatewayObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> GatewayServer {
        let relay = Relay::new(
            self.codec.prefix.resolver(),
            Arc::clone(&self.metrics),
            self.observer,
        );
        let connection_limit = Arc::new(Semaphore::new(self.server.max_connections));

        GatewayServer {
            inner: Arc::new(Inner {
                config: self.server,
                wrapper: self.wrapper,
                policy: self.policy,
                relay,
                metrics: self.metrics,
                state: Mutex::new(GatewayState::Uninitialized),
                local_addr: Mutex::new(None),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                connection_limit,
                next_session: AtomicU64::new(0),
            }),
        }
    }
}

struct Inner {
    config: ServerConfig,
    wrapper: Arc<dyn StreamWrapper>,
    policy: Arc<dyn BalancerPolicy>,
    relay: Relay,
    metrics: Arc<Metrics>,
    state: Mutex<GatewayState>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    connection_limit: Arc<Semaphore>,
    next_session: AtomicU64,
}

/// Cheap to clone; clones share the same gateway
#[derive(Clone)]
pub struct GatewayServer {
    inner: Arc<Inner>,
}

impl GatewayServer {
    pub fn builder(config: &GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            server: config.server.clone(),
            codec: config.codec,
            wrapper: Arc::new(PlainStream),
            policy: Arc::new(SharedBalancerPolicy::new()),
            observer: Arc::new(TracingObserver),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn new(config: &GatewayConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn state(&self) -> GatewayState {
        *self.inner.state.lock()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub fn client_count(&self) -> usize {
        self.inner.relay.client_count()
    }

    pub fn backend_count(&self) -> usize {
        self.inner.policy.backend_count()
    }

    /// Bind the listener and start accepting. Cancelling `cancel` stops the gateway.
    #[instrument(skip(self, cancel), fields(address = %self.inner.config.address))]
    pub async fn start_server(&self, cancel: CancellationToken) -> Result<SocketAddr> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                GatewayState::Running => {
                    return (*self.inner.local_addr.lock())
                        .ok_or(ProtocolError::InvalidState(constants::ERR_GATEWAY_STARTING));
                }
                GatewayState::Initializing => {
                    return Err(ProtocolError::InvalidState(constants::ERR_GATEWAY_STARTING));
                }
                GatewayState::Stopped => {
                    return Err(ProtocolError::InvalidState(constants::ERR_GATEWAY_STOPPED));
                }
                GatewayState::Uninitialized => *state = GatewayState::Initializing,
            }
        }

        let bound = match TcpListener::bind(&self.inner.config.address).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                *self.inner.state.lock() = GatewayState::Uninitialized;
                return Err(e.into());
            }
        };
        *self.inner.local_addr.lock() = Some(addr);

        {
            let mut state = self.inner.state.lock();
            if *state == GatewayState::Stopped {
                // Stopped while binding
                return Err(ProtocolError::InvalidState(constants::ERR_GATEWAY_STOPPED));
            }
            *state = GatewayState::Running;
        }

        self.inner
            .tracker
            .spawn(accept_loop(self.clone(), listener));

        let gateway = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = gateway.stop_server().await {
                        warn!(error = %e, "Gateway stop after cancellation failed");
                    }
                }
                _ = gateway.inner.shutdown.cancelled() => {}
            }
        });

        info!(%addr, "Gateway listening");
        Ok(addr)
    }

    /// Stop accepting, close every session and wait for in-flight relays up to
    /// the configured shutdown timeout. Stopping twice is a no-op.
    pub async fn stop_server(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state == GatewayState::Stopped {
                return Ok(());
            }
            *state = GatewayState::Stopped;
        }

        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        // Dropping the handles lets each writer task flush and exit
        self.inner.policy.clear();
        self.inner.relay.clear_clients();

        let drained = with_timeout_error(
            async {
                self.inner.tracker.wait().await;
                Ok(())
            },
            self.inner.config.shutdown_timeout,
        )
        .await;
        if drained.is_err() {
            warn!(
                pending = self.inner.tracker.len(),
                "Shutdown timeout elapsed; abandoning remaining session tasks"
            );
        }

        self.inner.metrics.log_metrics();
        info!("Gateway stopped");
        Ok(())
    }

    /// Serve a client connection. The configured stream wrapper is applied first.
    pub async fn attach_client<S>(&self, stream: S, peer: Option<SocketAddr>) -> Result<SessionId>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.ensure_not_stopped()?;
        let permit = Arc::clone(&self.inner.connection_limit)
            .try_acquire_owned()
            .map_err(|_| ProtocolError::Backpressure(constants::ERR_MAX_CONNECTIONS))?;

        let stream = self.inner.wrapper.wrap(Box::new(stream)).await?;
        let id = self.allocate_session_id();
        let (handle, reader) =
            spawn_session(stream, id, peer, self.inner.config.session_queue_capacity);

        let balancer = self.inner.policy.bind(&handle);
        self.inner.relay.add_client(handle.clone());
        self.inner.metrics.connection_established();
        self.inner.relay.observer().balancer_bound(&handle, &balancer);

        self.inner
            .tracker
            .spawn(client_loop(self.clone(), handle, reader, balancer, permit));
        Ok(id)
    }

    /// Serve a backend connection. Frames it sends are routed to clients.
    pub fn attach_backend<S>(&self, stream: S, peer: Option<SocketAddr>) -> Result<SessionId>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.ensure_not_stopped()?;
        let id = self.allocate_session_id();
        let (handle, reader) =
            spawn_session(stream, id, peer, self.inner.config.session_queue_capacity);

        self.inner.policy.add_backend(handle);
        self.inner.metrics.backend_attached();
        self.inner.tracker.spawn(backend_loop(self.clone(), id, reader));
        Ok(id)
    }

    /// Add a backend that only receives frames (e.g. an in-process worker)
    pub fn add_backend(&self, handle: SessionHandle) -> Result<bool> {
        self.ensure_not_stopped()?;
        let added = self.inner.policy.add_backend(handle);
        if added {
            self.inner.metrics.backend_attached();
        }
        Ok(added)
    }

    pub fn remove_backend(&self, id: SessionId) -> bool {
        self.inner.policy.remove_backend(id)
    }

    /// Dial a backend over TCP and attach it
    #[instrument(skip(self))]
    pub async fn connect_backend(&self, addr: SocketAddr) -> Result<SessionId> {
        let stream = with_timeout_error(
            async { TcpStream::connect(addr).await.map_err(ProtocolError::from) },
            self.inner.config.connect_timeout,
        )
        .await?;
        stream.set_nodelay(true)?;
        self.attach_backend(stream, Some(addr))
    }

    /// Session ids double as routing tokens, so they must fit the configured
    /// prefix. Narrow prefixes get sequential ids, never the nil token.
    fn allocate_session_id(&self) -> SessionId {
        let max = match self.inner.relay.prefix_resolver() {
            Some(resolver) if resolver.max_token() < u128::MAX => resolver.max_token(),
            _ => return SessionId::random(),
        };
        loop {
            let next = u128::from(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
            let id = SessionId(next % max + 1);
            // Only reachable once the counter wraps
            if self.inner.relay.client(id).is_none() {
                return id;
            }
        }
    }

    fn ensure_not_stopped(&self) -> Result<()> {
        if self.state() == GatewayState::Stopped {
            return Err(ProtocolError::InvalidState(constants::ERR_GATEWAY_STOPPED));
        }
        Ok(())
    }
}

async fn accept_loop(gateway: GatewayServer, listener: TcpListener) {
    let shutdown = gateway.inner.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    let gateway = gateway.clone();
                    // Wrapping may involve a TLS handshake; keep it off the accept loop
                    gateway.inner.tracker.clone().spawn(async move {
                        if let Err(e) = gateway.attach_client(stream, Some(peer)).await {
                            gateway.inner.metrics.connection_error();
                            warn!(%peer, error = %e, "Rejected client connection");
                        }
                    });
                }
                Err(e) => {
                    gateway.inner.metrics.connection_error();
                    warn!(error = %e, "Accept failed");
                }
            }
        }
    }
    debug!("Accept loop finished");
}

async fn client_loop<S>(
    gateway: GatewayServer,
    handle: SessionHandle,
    mut reader: SessionReader<S>,
    balancer: Arc<LoadBalancer>,
    _permit: OwnedSemaphorePermit,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = handle.id();
    drop(handle);
    let inner = &gateway.inner;

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = tokio::time::timeout(inner.config.idle_timeout, reader.next()) => match next {
                Err(_) => {
                    debug!(session = %id, "Client idle timeout");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok(frame))) => {
                    // Per-frame failures are already reported by the relay
                    let _ = inner.relay.relay_from_client(id, &balancer, frame);
                }
                Ok(Some(Err(e))) => {
                    // The byte stream cannot be resynchronized after a framing error
                    inner.metrics.decode_error();
                    warn!(session = %id, error = %e, "Closing client after stream error");
                    break;
                }
            }
        }
    }

    inner.relay.remove_client(id);
    inner.policy.release(id);
    inner.metrics.connection_closed();
    inner.relay.observer().session_closed(id, SessionRole::Client);
}

async fn backend_loop<S>(gateway: GatewayServer, id: SessionId, mut reader: SessionReader<S>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let inner = &gateway.inner;

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = reader.next() => match next {
                None => break,
                Some(Ok(frame)) => {
                    let _ = inner.relay.relay_from_backend(id, frame);
                }
                Some(Err(e)) => {
                    inner.metrics.decode_error();
                    warn!(session = %id, error = %e, "Closing backend after stream error");
                    break;
                }
            }
        }
    }

    inner.policy.remove_backend(id);
    inner.relay.observer().session_closed(id, SessionRole::Backend);
}
