//! Replay cache for cluster login requests
//!
//! Tracks `(machine id, nonce)` pairs seen within a TTL window. A login request
//! whose pair is already cached is a replay. Entries expire on their own and
//! the cache is capped, evicting in insertion order.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Nonce width carried by login requests
pub const NONCE_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    machine_id: String,
    nonce: [u8; NONCE_SIZE],
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    added_at: Instant,
    timestamp: u64,
}

/// TTL-bounded set of recently seen login nonces
#[derive(Debug)]
pub struct ReplayCache {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Insertion order, front is oldest
    insertion_order: VecDeque<CacheKey>,
    ttl: Duration,
    max_entries: usize,
}

impl ReplayCache {
    /// Five minute TTL, 10,000 entries
    pub fn new() -> Self {
        Self::with_settings(Duration::from_secs(300), 10_000)
    }

    pub fn with_settings(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Record the nonce and report whether it was already seen for this machine.
    ///
    /// Any reuse of a cached nonce counts as a replay, whatever the timestamp:
    /// the timestamp is covered by the signature, so an attacker cannot vary it.
    pub fn check_and_insert(
        &mut self,
        machine_id: &str,
        nonce: &[u8; NONCE_SIZE],
        timestamp: u64,
    ) -> bool {
        self.cleanup_expired();

        let key = CacheKey {
            machine_id: machine_id.to_string(),
            nonce: *nonce,
        };
        if let Some(entry) = self.entries.get(&key) {
            warn!(
                machine_id,
                first_timestamp = entry.timestamp,
                timestamp,
                "Replayed login nonce"
            );
            return true;
        }

        if self.entries.len() >= self.max_entries {
            let excess = self.entries.len() + 1 - self.max_entries;
            self.evict_oldest(excess);
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                added_at: Instant::now(),
                timestamp,
            },
        );
        self.insertion_order.push_back(key);
        false
    }

    fn cleanup_expired(&mut self) {
        let now = Instant::now();
        // Entries are inserted in time order, so expiry proceeds from the front
        while let Some(key) = self.insertion_order.front() {
            let expired = self
                .entries
                .get(key)
                .map_or(true, |entry| now.duration_since(entry.added_at) >= self.ttl);
            if !expired {
                break;
            }
            if let Some(key) = self.insertion_order.pop_front() {
                self.entries.remove(&key);
            }
        }
    }

    fn evict_oldest(&mut self, count: usize) {
        for _ in 0..count {
            match self.insertion_order.pop_front() {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
        debug!(count, "Evicted replay cache entries at capacity");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}
