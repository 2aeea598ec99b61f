use std::time::SystemTime;

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01)
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// Returns the current time in the coarse "ticks" unit (1/100s, matching the
/// wire representation used by the security challenge timestamp in spec.md
/// §4.7). Wraps at `u32::MAX` the same way the on-wire field does.
#[inline]
pub fn timestamp_ticks() -> u32 {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised");
    (now.as_millis() / 10) as u32
}
