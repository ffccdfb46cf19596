//! # Utility Modules
//!
//! Supporting pieces shared by the gateway and the cluster handshake.
//!
//! ## Components
//! - **Crypto**: Ed25519 signing and a pluggable signature verifier
//! - **Logging**: `tracing` subscriber setup
//! - **Metrics**: Thread-safe relay and login counters
//! - **Replay Cache**: TTL-based nonce deduplication for login requests
//! - **Time**: Wall-clock timestamps and skew windows
//! - **Timeout**: Async timeout wrappers

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod replay_cache;
pub mod time;
pub mod timeout;

pub use replay_cache::ReplayCache;
