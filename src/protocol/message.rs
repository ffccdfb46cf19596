//! Cluster handshake messages.
//!
//! These are ordinary registered packet types; they travel through the same
//! codec and framing as any application message.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::packet_codec::PacketCodec;
use crate::core::packet_id::{PacketMessage, PacketId};
use crate::core::serialization::BodyCodec;
use crate::error::Result;
use crate::utils::replay_cache::NONCE_SIZE;

const LOGIN_REQUEST_DOMAIN: &[u8] = b"packet-gateway/node-login-req/v1";
const LOGIN_RESPONSE_DOMAIN: &[u8] = b"packet-gateway/node-login-resp/v1";

/// Outcome carried by cluster responses. Anything but `Success` is a normal
/// rejection, not a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Success,
    InvalidSignature,
    InvalidPublicKey,
    StaleRequest,
    ReplayDetected,
    ServiceNotFound,
    InternalError,
    /// The machine id is already bound to a different public key
    MachineKeyMismatch,
    /// The coordinator holds as many nodes as it accepts
    RegistryFull,
}

impl ErrorCode {
    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }

    fn wire_tag(self) -> u8 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::InvalidSignature => 1,
            ErrorCode::InvalidPublicKey => 2,
            ErrorCode::StaleRequest => 3,
            ErrorCode::ReplayDetected => 4,
            ErrorCode::ServiceNotFound => 5,
            ErrorCode::InternalError => 6,
            ErrorCode::MachineKeyMismatch => 7,
            ErrorCode::RegistryFull => 8,
        }
    }
}

/// Identifier assigned by the coordinator on successful login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// A service a node offers to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLoginReq {
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
    pub machine_id: String,
    pub services: Vec<ServiceInfo>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub nonce: [u8; NONCE_SIZE],
}

impl NodeLoginReq {
    /// Digest the node signs: every field except the signature
    pub fn signing_payload(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(LOGIN_REQUEST_DOMAIN);
        hash_bytes(&mut hasher, self.machine_id.as_bytes());
        hash_bytes(&mut hasher, &self.public_key);
        hasher.update((self.services.len() as u32).to_le_bytes());
        for service in &self.services {
            hash_bytes(&mut hasher, service.name.as_bytes());
            hash_bytes(&mut hasher, service.address.as_bytes());
            hasher.update(service.port.to_le_bytes());
        }
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.nonce);
        hasher.finalize().into()
    }
}

impl PacketMessage for NodeLoginReq {
    const TYPE_NAME: &'static str = "cluster.NodeLoginReq";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLoginResp {
    pub error_code: ErrorCode,
    /// Coordinator signature over the outcome and the request nonce
    pub signature: Vec<u8>,
    /// Coordinator public key
    pub public_key: Vec<u8>,
    pub node_id: Option<NodeId>,
}

impl NodeLoginResp {
    /// Digest the coordinator signs. Binding the request nonce ties the
    /// response to exactly one login attempt.
    pub fn signing_payload(&self, request_nonce: &[u8; NONCE_SIZE]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(LOGIN_RESPONSE_DOMAIN);
        hasher.update([self.error_code.wire_tag()]);
        match self.node_id {
            Some(id) => {
                hasher.update([1u8]);
                hasher.update(id.0.to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
        hash_bytes(&mut hasher, &self.public_key);
        hasher.update(request_nonce);
        hasher.finalize().into()
    }
}

impl PacketMessage for NodeLoginResp {
    const TYPE_NAME: &'static str = "cluster.NodeLoginResp";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryServiceReq {
    pub service_name: String,
}

impl PacketMessage for QueryServiceReq {
    const TYPE_NAME: &'static str = "cluster.QueryServiceReq";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryServiceResp {
    pub error_code: ErrorCode,
    pub node_id: Option<NodeId>,
    pub service_name: String,
    pub service_address: String,
    pub service_port: u16,
}

impl QueryServiceResp {
    pub fn not_found(service_name: impl Into<String>) -> Self {
        Self {
            error_code: ErrorCode::ServiceNotFound,
            node_id: None,
            service_name: service_name.into(),
            service_address: String::new(),
            service_port: 0,
        }
    }
}

impl PacketMessage for QueryServiceResp {
    const TYPE_NAME: &'static str = "cluster.QueryServiceResp";
}

fn hash_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}

/// Register the four cluster messages with `codec`
pub fn register_cluster_messages<B: BodyCodec>(codec: &PacketCodec<B>) -> Result<[PacketId; 4]> {
    Ok([
        codec.register::<NodeLoginReq>()?,
        codec.register::<NodeLoginResp>()?,
        codec.register::<QueryServiceReq>()?,
        codec.register::<QueryServiceResp>()?,
    ])
}
