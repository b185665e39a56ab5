//! Process-wide request statistics, accumulated on the event loop thread.

use std::time::Duration;

/// Running counters plus a Welford-incremental mean latency. Deliberately
/// `Copy`-free and cheap to update; there is exactly one instance per
/// server, owned by the event loop alongside the routing table.
#[derive(Debug, Default)]
pub struct Stats {
    total_requests: u64,
    bad_frames: u64,
    routes_installed: u64,
    last_latency_us: u32,
    mean_latency_us: f64,
}

impl Stats {
    #[inline]
    pub fn new() -> Stats {
        Stats::default()
    }

    #[inline]
    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    #[inline]
    pub fn bad_frames(&self) -> u64 {
        self.bad_frames
    }

    #[inline]
    pub fn routes_installed(&self) -> u64 {
        self.routes_installed
    }

    #[inline]
    pub fn last_latency_us(&self) -> u32 {
        self.last_latency_us
    }

    #[inline]
    pub fn avg_latency_us(&self) -> u32 {
        self.mean_latency_us as u32
    }

    /// Records one successfully dispatched request's latency. Updates
    /// `last_latency_us` and folds it into the running mean via
    /// `mean <- mean + (x - mean) / n`, then increments `total_requests`.
    ///
    /// Must be called exactly once per successful dispatch, and — per the
    /// stats-ordering rule — only *after* any reply payload that itself
    /// reads these counters (e.g. a `GET_STATS` reply) has been built, so
    /// that reply reports the state prior to the request that produced it.
    #[inline]
    pub fn record_request(&mut self, latency: Duration) {
        let latency_us = latency.as_micros().min(u64::from(u32::MAX) as u128) as u32;

        self.last_latency_us = latency_us;
        self.total_requests += 1;
        let n = self.total_requests as f64;
        self.mean_latency_us += (f64::from(latency_us) - self.mean_latency_us) / n;
    }

    #[inline]
    pub fn record_bad_frame(&mut self) {
        self.bad_frames += 1;
    }

    #[inline]
    pub fn record_routes_installed(&mut self, count: u64) {
        self.routes_installed += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_requests_is_strictly_increasing() {
        let mut stats = Stats::new();
        for i in 1..=5u64 {
            stats.record_request(Duration::from_micros(10));
            assert_eq!(stats.total_requests(), i);
        }
    }

    #[test]
    fn mean_matches_welford_reference() {
        let samples_us = [100u64, 200, 50, 400, 10];
        let mut stats = Stats::new();

        let mut reference_mean = 0.0f64;
        for (i, &us) in samples_us.iter().enumerate() {
            stats.record_request(Duration::from_micros(us));
            reference_mean += (us as f64 - reference_mean) / (i as f64 + 1.0);
            assert!((stats.avg_latency_us() as f64 - reference_mean).abs() <= 1.0);
        }
    }

    #[test]
    fn last_latency_reflects_most_recent_sample() {
        let mut stats = Stats::new();
        stats.record_request(Duration::from_micros(100));
        stats.record_request(Duration::from_micros(9000));
        assert_eq!(stats.last_latency_us(), 9000);
    }

    #[test]
    fn bad_frames_and_routes_installed_are_independent() {
        let mut stats = Stats::new();
        stats.record_bad_frame();
        stats.record_bad_frame();
        stats.record_routes_installed(3);

        assert_eq!(stats.bad_frames(), 2);
        assert_eq!(stats.routes_installed(), 3);
        assert_eq!(stats.total_requests(), 0);
    }
}
