//! Live cluster nodes, as seen by the coordinator.
//!
//! A machine id is bound to the public key it registered with for as long as
//! that registration lives. Re-logins must present the same key.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::protocol::message::{ErrorCode, NodeId, ServiceInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub machine_id: String,
    pub public_key: Vec<u8>,
    pub services: Vec<ServiceInfo>,
}

/// Why a node could not be registered
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Machine id is registered under a different public key")]
    KeyMismatch,

    #[error("Registry is full ({0} nodes)")]
    Full(usize),
}

impl From<RegistrationError> for ErrorCode {
    fn from(error: RegistrationError) -> Self {
        match error {
            RegistrationError::KeyMismatch => ErrorCode::MachineKeyMismatch,
            RegistrationError::Full(_) => ErrorCode::RegistryFull,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Ordered so service lookups prefer the lowest node id
    nodes: BTreeMap<NodeId, NodeRecord>,
    by_machine: HashMap<String, NodeId>,
}

#[derive(Debug)]
pub struct NodeRegistry {
    state: RwLock<RegistryState>,
    next_id: AtomicU64,
    capacity: usize,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Registry refusing new machines once `capacity` nodes are registered
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a node under a fresh id. A node logging in again from the
    /// same machine with the same key replaces its previous entry.
    pub fn register(
        &self,
        machine_id: &str,
        public_key: Vec<u8>,
        services: Vec<ServiceInfo>,
    ) -> Result<NodeId, RegistrationError> {
        let mut state = self.state.write();

        let previous = state.by_machine.get(machine_id).copied();
        match previous.and_then(|id| state.nodes.get(&id)) {
            Some(existing) if existing.public_key != public_key => {
                warn!(machine_id, node_id = %existing.node_id, "Login with a different key for a bound machine");
                return Err(RegistrationError::KeyMismatch);
            }
            Some(_) => {}
            None if state.nodes.len() >= self.capacity => {
                warn!(machine_id, capacity = self.capacity, "Node registry full");
                return Err(RegistrationError::Full(self.capacity));
            }
            None => {}
        }

        let node_id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        state.by_machine.insert(machine_id.to_string(), node_id);
        match previous {
            Some(previous) => {
                state.nodes.remove(&previous);
                info!(machine_id, %previous, %node_id, "Node re-registered");
            }
            None => info!(machine_id, %node_id, services = services.len(), "Node registered"),
        }

        state.nodes.insert(
            node_id,
            NodeRecord {
                node_id,
                machine_id: machine_id.to_string(),
                public_key,
                services,
            },
        );
        Ok(node_id)
    }

    pub fn unregister(&self, node_id: NodeId) -> Option<NodeRecord> {
        let mut state = self.state.write();
        let record = state.nodes.remove(&node_id)?;
        if state.by_machine.get(&record.machine_id) == Some(&node_id) {
            state.by_machine.remove(&record.machine_id);
        }
        info!(%node_id, machine_id = %record.machine_id, "Node unregistered");
        Some(record)
    }

    pub fn get(&self, node_id: NodeId) -> Option<NodeRecord> {
        self.state.read().nodes.get(&node_id).cloned()
    }

    pub fn node_for_machine(&self, machine_id: &str) -> Option<NodeId> {
        self.state.read().by_machine.get(machine_id).copied()
    }

    /// First node, by ascending id, that advertises `name`
    pub fn find_service(&self, name: &str) -> Option<(NodeId, ServiceInfo)> {
        self.state.read().nodes.values().find_map(|record| {
            record
                .services
                .iter()
                .find(|service| service.name == name)
                .map(|service| (record.node_id, service.clone()))
        })
    }

    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.state.read().nodes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
