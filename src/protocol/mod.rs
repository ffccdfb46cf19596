//! # Cluster Protocol
//!
//! Node login, service discovery and typed request dispatch, all carried as
//! ordinary registered packets.
//!
//! ## Components
//! - **Message**: login and service query packets, error codes, node ids
//! - **Registry**: the coordinator's table of live nodes and their services
//! - **Handshake**: signed login on both sides, coordinator service lookup
//! - **Dispatcher**: packet id to handler routing with encoded replies

pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use handshake::{ClusterCoordinator, ClusterNode, LoginOutcome};
pub use message::{
    register_cluster_messages, ErrorCode, NodeId, NodeLoginReq, NodeLoginResp, QueryServiceReq,
    QueryServiceResp, ServiceInfo,
};
pub use registry::{NodeRecord, NodeRegistry, RegistrationError};
