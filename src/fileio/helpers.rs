use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, zero if the clock is set before it
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
