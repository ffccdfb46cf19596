//! Timeout constants and async timeout helpers

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default bound for connect and handshake round trips
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a session may stay silent before the gateway closes it
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period for in-flight relays once shutdown is requested
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future`, mapping an elapsed deadline to [`ProtocolError::Timeout`]
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
