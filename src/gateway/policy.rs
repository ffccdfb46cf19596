//! Which load balancer governs a client session.

use std::sync::Arc;

use crate::balancer::LoadBalancer;
use crate::core::prefix::SessionId;
use crate::transport::session::SessionHandle;

/// Assigns balancers to client sessions and owns the backend pools
pub trait BalancerPolicy: Send + Sync {
    /// Called once per client session, before its first frame is read
    fn bind(&self, client: &SessionHandle) -> Arc<LoadBalancer>;

    /// Called when a client session ends
    fn release(&self, _client: SessionId) {}

    fn add_backend(&self, backend: SessionHandle) -> bool;

    fn remove_backend(&self, backend: SessionId) -> bool;

    fn backend_count(&self) -> usize;

    /// Drop every backend session
    fn clear(&self);
}

/// Every client shares one pool of backends
#[derive(Debug, Clone, Default)]
pub struct SharedBalancerPolicy {
    balancer: Arc<LoadBalancer>,
}

impl SharedBalancerPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balancer(balancer: Arc<LoadBalancer>) -> Self {
        Self { balancer }
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }
}

impl BalancerPolicy for SharedBalancerPolicy {
    fn bind(&self, _client: &SessionHandle) -> Arc<LoadBalancer> {
        Arc::clone(&self.balancer)
    }

    fn add_backend(&self, backend: SessionHandle) -> bool {
        self.balancer.add(backend)
    }

    fn remove_backend(&self, backend: SessionId) -> bool {
        self.balancer.remove(backend)
    }

    fn backend_count(&self) -> usize {
        self.balancer.len()
    }

    fn clear(&self) {
        self.balancer.clear();
    }
}
