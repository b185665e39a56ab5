use std::time::{Instant, SystemTime};

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("closed timelike curve, reality compromised")
        .as_secs()
}

/// Monotonic millisecond clock. The origin is captured once, at server
/// start, so `now_ms()` already reads as an uptime counter — there is no
/// separate `start_ms` to subtract.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Captures the current instant as the server's start time.
    #[inline]
    pub fn new() -> Clock {
        Clock { origin: Instant::now() }
    }

    /// Milliseconds elapsed since the clock was constructed. Monotonic
    /// non-decreasing by construction (`Instant` never runs backward).
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Time elapsed since server start. Identical to `now_ms` here because
    /// the clock's origin *is* the start time; kept as a separate method so
    /// callers express intent.
    #[inline]
    pub fn uptime_ms(&self) -> u64 {
        self.now_ms()
    }
}

impl Default for Clock {
    #[inline]
    fn default() -> Clock {
        Clock::new()
    }
}
