//! # Load Balancer
//!
//! Round-robin selection over a pool of sessions.
//!
//! Rotation follows insertion order. The pool lives behind one mutex together
//! with the cursor, so concurrent `get` calls never hand out the same slot
//! twice or skip one. [`LoadBalancer::get_all`] returns a snapshot that stays
//! valid while the pool keeps changing.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::prefix::SessionId;
use crate::error::{ProtocolError, Result};
use crate::transport::session::SessionHandle;

#[derive(Debug, Default)]
struct Pool {
    /// Shared with snapshots; cloned on write only while a snapshot is alive
    sessions: Arc<Vec<SessionHandle>>,
    /// Index of the next session to hand out
    cursor: usize,
}

#[derive(Debug, Default)]
pub struct LoadBalancer {
    pool: Mutex<Pool>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session at the end of the rotation. Returns `false` if it was
    /// already present, in which case nothing changes.
    pub fn add(&self, session: SessionHandle) -> bool {
        let mut pool = self.pool.lock();
        if pool.sessions.iter().any(|s| *s == session) {
            return false;
        }
        debug!(session = %session.id(), "Session added to balancer");
        Arc::make_mut(&mut pool.sessions).push(session);
        true
    }

    /// Remove a session. The rotation continues with the session that would
    /// have followed, so no remaining session is skipped or repeated.
    pub fn remove(&self, id: SessionId) -> bool {
        let mut pool = self.pool.lock();
        let Some(index) = pool.sessions.iter().position(|s| s.id() == id) else {
            return false;
        };

        Arc::make_mut(&mut pool.sessions).remove(index);
        if index < pool.cursor {
            pool.cursor -= 1;
        }
        if pool.cursor >= pool.sessions.len() {
            pool.cursor = 0;
        }
        debug!(session = %id, remaining = pool.sessions.len(), "Session removed from balancer");
        true
    }

    /// Next session in round-robin order
    pub fn get(&self) -> Result<SessionHandle> {
        let mut pool = self.pool.lock();
        let len = pool.sessions.len();
        if len == 0 {
            return Err(ProtocolError::NoSessionsAvailable);
        }
        let session = pool.sessions[pool.cursor].clone();
        pool.cursor = (pool.cursor + 1) % len;
        Ok(session)
    }

    /// Snapshot of the pool in rotation order
    pub fn get_all(&self) -> Arc<Vec<SessionHandle>> {
        Arc::clone(&self.pool.lock().sessions)
    }

    pub fn find(&self, id: SessionId) -> Option<SessionHandle> {
        self.pool.lock().sessions.iter().find(|s| s.id() == id).cloned()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.pool.lock().sessions.iter().any(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.pool.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every session, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut pool = self.pool.lock();
        let removed = pool.sessions.len();
        pool.sessions = Arc::new(Vec::new());
        pool.cursor = 0;
        removed
    }
}
