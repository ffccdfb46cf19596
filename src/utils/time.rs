//! Wall-clock helpers for signed timestamps

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{constants, ProtocolError, Result};

/// How far ahead of the local clock a timestamp may be
pub const FUTURE_TOLERANCE: Duration = Duration::from_secs(2);

/// Milliseconds since the Unix epoch
pub fn current_timestamp_millis() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .map_err(|_| ProtocolError::Custom(constants::ERR_SYSTEM_TIME.into()))
}

/// True when `timestamp` is at most `max_age` old and no more than
/// [`FUTURE_TOLERANCE`] ahead of `now`
pub fn is_fresh(timestamp: u64, now: u64, max_age: Duration) -> bool {
    if timestamp > now.saturating_add(FUTURE_TOLERANCE.as_millis() as u64) {
        return false;
    }
    now.saturating_sub(timestamp) <= max_age.as_millis() as u64
}
