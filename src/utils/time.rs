use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

pub fn get_duration_since_epoch() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// return millisecond
pub fn timestamp_millis() -> u64 {
    get_duration_since_epoch().as_millis() as u64
}

/// Milliseconds elapsed since `earlier_ms`, zero if the clock stepped back.
pub fn millis_since(earlier_ms: u64) -> u64 {
    timestamp_millis().saturating_sub(earlier_ms)
}
