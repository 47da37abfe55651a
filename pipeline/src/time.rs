use chrono::{DateTime, TimeZone, Utc};

pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Converts a stored epoch-millisecond column back into a timestamp.
/// Out-of-range values clamp to the epoch rather than failing the row.
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
