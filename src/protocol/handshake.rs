//! Cluster node login and service discovery.
//!
//! A joining node signs its login request (machine id, public key, services,
//! timestamp and a random nonce) with its own key. The coordinator checks, in
//! order:
//! 1. the timestamp is fresh (`StaleRequest`)
//! 2. the public key parses and the signature verifies (`InvalidPublicKey`,
//!    `InvalidSignature`)
//! 3. the nonce was not seen before for this machine (`ReplayDetected`)
//! 4. the machine id is not held by a different key (`MachineKeyMismatch`)
//!    and the registry has room for it (`RegistryFull`)
//!
//! Only then is a node id assigned. Every response is signed by the
//! coordinator over its outcome and the request nonce, so the node can tell a
//! genuine answer from a forged one.
//!
//! Rejections are returned as ordinary responses with a non-success
//! [`ErrorCode`]; they never surface as `Err`.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::config::ClusterConfig;
use crate::core::codec::FrameCodec;
use crate::core::flags::PacketFlags;
use crate::core::packet_codec::PacketCodec;
use crate::core::serialization::BodyCodec;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{
    ErrorCode, NodeId, NodeLoginReq, NodeLoginResp, QueryServiceReq, QueryServiceResp,
    ServiceInfo,
};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::registry::NodeRegistry;
use crate::utils::crypto::{Ed25519Verifier, NodeKeypair, SignatureError, SignatureVerifier};
use crate::utils::metrics::Metrics;
use crate::utils::replay_cache::{ReplayCache, NONCE_SIZE};
use crate::utils::time::{current_timestamp_millis, is_fresh};

/// Cryptographically random login nonce
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    rand::random()
}

/// Sole authority for node ids
pub struct ClusterCoordinator {
    keypair: NodeKeypair,
    verifier: Arc<dyn SignatureVerifier>,
    registry: Arc<NodeRegistry>,
    replay_cache: Mutex<ReplayCache>,
    timestamp_window: Duration,
    metrics: Arc<Metrics>,
}

impl ClusterCoordinator {
    pub fn new(keypair: NodeKeypair, config: &ClusterConfig) -> Self {
        Self {
            keypair,
            verifier: Arc::new(Ed25519Verifier),
            registry: Arc::new(NodeRegistry::with_capacity(config.max_nodes)),
            replay_cache: Mutex::new(ReplayCache::with_settings(
                config.replay_ttl,
                config.replay_capacity,
            )),
            timestamp_window: config.timestamp_window,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_registry(mut self, registry: Arc<NodeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    #[instrument(skip_all, fields(machine_id = %request.machine_id))]
    pub fn handle_login(&self, request: &NodeLoginReq) -> NodeLoginResp {
        let now = match current_timestamp_millis() {
            Ok(now) => now,
            Err(e) => {
                warn!(error = %e, "Cannot read clock for login");
                return self.respond(request, ErrorCode::InternalError, None);
            }
        };
        self.handle_login_at(request, now)
    }

    /// Login validation against an explicit clock reading
    pub fn handle_login_at(&self, request: &NodeLoginReq, now: u64) -> NodeLoginResp {
        let registered = self.validate_login(request, now).and_then(|()| {
            self.registry
                .register(
                    &request.machine_id,
                    request.public_key.clone(),
                    request.services.clone(),
                )
                .map_err(ErrorCode::from)
        });
        match registered {
            Ok(node_id) => {
                self.metrics.login_accepted();
                self.respond(request, ErrorCode::Success, Some(node_id))
            }
            Err(code) => {
                self.metrics.login_rejected();
                info!(?code, "Login rejected");
                self.respond(request, code, None)
            }
        }
    }

    fn validate_login(&self, request: &NodeLoginReq, now: u64) -> std::result::Result<(), ErrorCode> {
        if !is_fresh(request.timestamp, now, self.timestamp_window) {
            return Err(ErrorCode::StaleRequest);
        }

        let payload = request.signing_payload();
        self.verifier
            .verify(&request.public_key, &payload, &request.signature)
            .map_err(|e| match e {
                SignatureError::InvalidPublicKey(_) => ErrorCode::InvalidPublicKey,
                SignatureError::MalformedSignature { .. } | SignatureError::VerifyFailed => {
                    ErrorCode::InvalidSignature
                }
            })?;

        // Checked last so unauthenticated requests cannot fill the cache
        if self.replay_cache.lock().check_and_insert(
            &request.machine_id,
            &request.nonce,
            request.timestamp,
        ) {
            return Err(ErrorCode::ReplayDetected);
        }
        Ok(())
    }

    fn respond(
        &self,
        request: &NodeLoginReq,
        error_code: ErrorCode,
        node_id: Option<NodeId>,
    ) -> NodeLoginResp {
        let mut response = NodeLoginResp {
            error_code,
            signature: Vec::new(),
            public_key: self.keypair.public_key().to_vec(),
            node_id,
        };
        response.signature = self
            .keypair
            .sign(&response.signing_payload(&request.nonce))
            .to_vec();
        response
    }

    #[instrument(skip_all, fields(service = %request.service_name))]
    pub fn handle_query(&self, request: &QueryServiceReq) -> QueryServiceResp {
        match self.registry.find_service(&request.service_name) {
            Some((node_id, service)) => {
                debug!(%node_id, "Service resolved");
                QueryServiceResp {
                    error_code: ErrorCode::Success,
                    node_id: Some(node_id),
                    service_name: service.name,
                    service_address: service.address,
                    service_port: service.port,
                }
            }
            None => QueryServiceResp::not_found(request.service_name.clone()),
        }
    }

    /// Remove a node, e.g. when its session closes
    pub fn unregister(&self, node_id: NodeId) -> bool {
        self.registry.unregister(node_id).is_some()
    }

    /// Serve login and service queries through `dispatcher`
    pub fn install<B: BodyCodec>(self: &Arc<Self>, dispatcher: &Dispatcher<B>) -> Result<()> {
        let coordinator = Arc::clone(self);
        dispatcher.register(move |request: NodeLoginReq| Ok(coordinator.handle_login(&request)))?;
        let coordinator = Arc::clone(self);
        dispatcher
            .register(move |request: QueryServiceReq| Ok(coordinator.handle_query(&request)))?;
        Ok(())
    }
}

/// Result of a login exchange from the joining node's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Registered(NodeId),
    Rejected(ErrorCode),
}

/// The joining side of the handshake
pub struct ClusterNode {
    keypair: NodeKeypair,
    machine_id: String,
    services: Vec<ServiceInfo>,
    verifier: Arc<dyn SignatureVerifier>,
    /// Pinned coordinator key; any coordinator is accepted when unset
    coordinator_key: Option<Vec<u8>>,
    node_id: Option<NodeId>,
}

impl ClusterNode {
    pub fn new(keypair: NodeKeypair, machine_id: impl Into<String>, services: Vec<ServiceInfo>) -> Self {
        Self {
            keypair,
            machine_id: machine_id.into(),
            services,
            verifier: Arc::new(Ed25519Verifier),
            coordinator_key: None,
            node_id: None,
        }
    }

    pub fn with_coordinator_key(mut self, public_key: &[u8]) -> Self {
        self.coordinator_key = Some(public_key.to_vec());
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Set only after a successful, verified login
    pub fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn build_login_request(&self) -> Result<NodeLoginReq> {
        Ok(self.build_login_request_at(current_timestamp_millis()?, generate_nonce()))
    }

    pub fn build_login_request_at(&self, timestamp: u64, nonce: [u8; NONCE_SIZE]) -> NodeLoginReq {
        let mut request = NodeLoginReq {
            signature: Vec::new(),
            public_key: self.keypair.public_key().to_vec(),
            machine_id: self.machine_id.clone(),
            services: self.services.clone(),
            timestamp,
            nonce,
        };
        request.signature = self.keypair.sign(&request.signing_payload()).to_vec();
        request
    }

    /// Dial the coordinator at `config.coordinator_address` and log in.
    ///
    /// `codec` must have the cluster messages registered and match the
    /// coordinator's body format and prefix.
    pub async fn join<B: BodyCodec>(
        &mut self,
        config: &ClusterConfig,
        codec: &PacketCodec<B>,
    ) -> Result<LoginOutcome> {
        let stream = TcpStream::connect(config.coordinator_address.as_str()).await?;
        debug!(coordinator = %config.coordinator_address, "Connected to coordinator");
        self.login_over(stream, codec, config.login_timeout).await
    }

    /// Run one login exchange over an established stream
    pub async fn login_over<S, B>(
        &mut self,
        stream: S,
        codec: &PacketCodec<B>,
        wait: Duration,
    ) -> Result<LoginOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        B: BodyCodec,
    {
        let request = self.build_login_request()?;
        let mut framed = Framed::new(stream, FrameCodec);
        framed
            .send(codec.encode(&request, PacketFlags::empty())?)
            .await?;

        let reply = tokio::time::timeout(wait, framed.next())
            .await
            .map_err(|_| ProtocolError::Timeout)?
            .ok_or(ProtocolError::ConnectionClosed)??;
        let response = codec.decode::<NodeLoginResp>(&reply)?.message;
        self.accept_login_response(&request, &response)
    }

    /// Check the coordinator's answer to `request`.
    ///
    /// A rejection is `Ok(LoginOutcome::Rejected)`. An answer that cannot be
    /// trusted (bad signature, unexpected coordinator, missing id) is `Err`.
    pub fn accept_login_response(
        &mut self,
        request: &NodeLoginReq,
        response: &NodeLoginResp,
    ) -> Result<LoginOutcome> {
        if let Some(expected) = &self.coordinator_key {
            if *expected != response.public_key {
                return Err(ProtocolError::HandshakeError(
                    constants::ERR_COORDINATOR_KEY_MISMATCH.into(),
                ));
            }
        }

        self.verifier
            .verify(
                &response.public_key,
                &response.signing_payload(&request.nonce),
                &response.signature,
            )
            .map_err(|_| {
                ProtocolError::HandshakeError(constants::ERR_COORDINATOR_SIGNATURE.into())
            })?;

        if !response.error_code.is_success() {
            return Ok(LoginOutcome::Rejected(response.error_code));
        }

        let node_id = response
            .node_id
            .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_MISSING_NODE_ID.into()))?;
        self.node_id = Some(node_id);
        info!(%node_id, machine_id = %self.machine_id, "Joined cluster");
        Ok(LoginOutcome::Registered(node_id))
    }
}
